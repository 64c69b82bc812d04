//! Millisecond timestamps
//!
//! The engine never reads the OS clock itself; timestamps are assigned
//! by the record store (for `created_at`) or passed in by the caller
//! (for dwell/orphan bookkeeping), which keeps every state transition
//! deterministic under test.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create from epoch milliseconds
    pub fn from_ms(ms: u64) -> Self {
        Self(ms)
    }

    /// Epoch milliseconds
    pub fn as_ms(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier`
    /// is in the future.
    pub fn elapsed_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Timestamp `ms` milliseconds after `self`, saturating.
    pub fn plus_ms(&self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(ms: u64) -> Self {
        Self(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_saturates() {
        let early = Timestamp::from_ms(1_000);
        let late = Timestamp::from_ms(4_500);
        assert_eq!(late.elapsed_since(early), 3_500);
        assert_eq!(early.elapsed_since(late), 0);
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp::from_ms(1) < Timestamp::from_ms(2));
        assert_eq!(Timestamp::from_ms(7).plus_ms(3), Timestamp::from_ms(10));
    }
}
