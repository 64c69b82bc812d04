//! Session observer interface
//!
//! The view layer registers one observer per session and re-renders
//! from the snapshots it receives. This is an explicit callback
//! object handed in by the caller, deliberately not a global or
//! window-level event bus, so sibling views can never observe (or
//! race) each other's refreshes.

use trellis_core::TrellisError;
use trellis_thread::{Engagement, Forest};

/// Callbacks a session emits as its derived state changes.
///
/// All methods have empty defaults; implementors override what their
/// surface renders. Calls arrive on the task driving the session;
/// implementations should hand off, not block.
pub trait SessionObserver: Send + Sync {
    /// The forest changed structurally (insert, delete, reattach).
    fn forest_updated(&self, _forest: &Forest, _engagement: &Engagement) {}

    /// Counters changed without a structural change (like toggled).
    fn engagement_updated(&self, _engagement: &Engagement) {}

    /// A full refetch-and-rebuild began.
    fn resync_started(&self) {}

    /// A full refetch-and-rebuild finished; re-render from `forest`.
    fn resync_completed(&self, _forest: &Forest, _engagement: &Engagement) {}

    /// A store mutation failed; optimistic state was rolled back and
    /// the operation may be retried.
    fn mutation_failed(&self, _error: &TrellisError) {}
}

/// Observer that ignores everything; useful for headless callers and
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}
