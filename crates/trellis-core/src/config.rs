//! Engine configuration
//!
//! Tunables for the merge engine, disclosure machine, and subscription
//! plumbing. The embedding application constructs one (usually
//! `EngineConfig::default()`) and hands it to `SubjectSession::open`;
//! there is no file parsing at this layer.

use serde::{Deserialize, Serialize};

/// Tunables for one subject session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long an orphaned reply may wait for its parent before being
    /// promoted to a best-effort root, in milliseconds.
    pub orphan_wait_ms: u64,
    /// Reveal window for ephemeral media, in milliseconds. After this
    /// dwell the recipient's view locks, locally only.
    pub dwell_ms: u64,
    /// Capacity of the per-subject change-event channel. A subscriber
    /// that falls further behind than this must resync.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            orphan_wait_ms: 30_000,
            dwell_ms: 10_000,
            event_buffer: 256,
        }
    }
}
