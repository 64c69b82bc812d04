//! Trellis thread core
//!
//! The invariant-bearing heart of the engine, repeated with variations
//! across chat, comments, and story/stream discussion surfaces:
//!
//! - [`builder`]: a pure function from a flat set of interaction
//!   records to a forest of comment nodes;
//! - [`merge`]: the incremental engine that applies live change
//!   notifications to a forest without duplication or corruption, with
//!   orphan buffering, gap detection, and a full-resync backstop;
//! - [`engagement`]: derived like/comment counters kept consistent
//!   with the forest and the merge stream.
//!
//! Everything here is synchronous: data is already in memory by the
//! time these types run. Store I/O lives in `trellis-store`, and the
//! async orchestration in `trellis-session`.

pub mod builder;
pub mod engagement;
pub mod merge;

pub use builder::{build_forest, build_forest_detailed, BuildOutcome, CommentNode, Forest};
pub use engagement::{Engagement, LikeLedger};
pub use merge::{ApplyOutcome, MergeEngine};
