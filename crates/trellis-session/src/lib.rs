//! Trellis subject sessions
//!
//! A [`SubjectSession`] is the engine a view controller talks to: one
//! per open subject (post, stream, story, chat), exclusive owner of
//! that subject's live forest and counters. It snapshots and
//! subscribes on open, applies change notifications in order, falls
//! back to a full resync whenever incremental patching would be
//! unsafe, and reports through an explicit [`SessionObserver`] rather
//! than any ambient event bus.
//!
//! Sessions are disposable by design: closing a view drops the
//! session, which unsubscribes its stream and discards all view state
//! and orphan buffers. Reopening rebuilds from the store, the sole
//! source of truth.

pub mod observer;
pub mod session;

pub use observer::{NullObserver, SessionObserver};
pub use session::SubjectSession;
