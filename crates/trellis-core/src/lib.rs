//! Trellis core types
//!
//! Shared data model for the Trellis threaded-interaction engine:
//! identifier newtypes, millisecond timestamps, the unified error type,
//! interaction records, change events, ephemeral media metadata, and
//! engine configuration.
//!
//! This crate is the interface layer: it has no async code and no
//! storage dependencies. The store boundary lives in `trellis-store`,
//! the tree/merge logic in `trellis-thread`, the disclosure machine in
//! `trellis-media`, and the per-view orchestration in
//! `trellis-session`.

pub mod config;
pub mod error;
pub mod identifiers;
pub mod model;
pub mod time;

pub use config::EngineConfig;
pub use error::{Result, TrellisError};
pub use identifiers::{AuthorId, InteractionId, MessageId, SubjectId};
pub use model::{
    ChangeEvent, ChangeOp, EphemeralMedia, InteractionKind, InteractionRecord, MediaKind,
    NewInteraction, ViewState,
};
pub use time::Timestamp;
