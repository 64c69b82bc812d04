//! Derived engagement counters
//!
//! Likes are append-only rows keyed by id (unlike = delete of the
//! row), so the ledger is a map from like id to author: duplicate
//! Insert notifications and replayed Deletes collapse to no-ops by
//! construction. `total_comments` is never stored here; it is
//! recomputed from the live forest after every build or apply, because
//! a derived value that is independently mutated will drift.

use indexmap::IndexMap;
use trellis_core::{AuthorId, InteractionId};

/// Store-confirmed like rows for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LikeLedger {
    likes: IndexMap<InteractionId, AuthorId>,
}

impl LikeLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a like row. Returns false if the id was already present
    /// (duplicate notification).
    pub fn add(&mut self, id: InteractionId, author: AuthorId) -> bool {
        if self.likes.contains_key(&id) {
            return false;
        }
        self.likes.insert(id, author);
        true
    }

    /// Remove a like row. Returns false if the id was unknown
    /// (replayed delete).
    pub fn remove(&mut self, id: InteractionId) -> bool {
        self.likes.shift_remove(&id).is_some()
    }

    /// Number of like rows.
    pub fn count(&self) -> u64 {
        self.likes.len() as u64
    }

    /// Whether this author currently has a like row.
    pub fn has_author(&self, author: &AuthorId) -> bool {
        self.likes.values().any(|a| a == author)
    }

    /// The like row id for an author, if any. The session uses this to
    /// know which row an "unlike" must delete.
    pub fn like_of(&self, author: &AuthorId) -> Option<InteractionId> {
        self.likes
            .iter()
            .find(|(_, a)| *a == author)
            .map(|(id, _)| *id)
    }

    /// Drop everything; used when a resync replaces the snapshot.
    pub fn clear(&mut self) {
        self.likes.clear();
    }
}

/// Denormalized per-subject counters handed to the view layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Engagement {
    /// Number of likes on the subject
    pub like_count: u64,
    /// Whether the current viewer has liked the subject
    pub user_has_liked: bool,
    /// All comments including nested replies (count of forest nodes,
    /// not just roots)
    pub total_comments: u64,
}

impl Engagement {
    /// Snapshot the counters for a viewer.
    pub fn snapshot(ledger: &LikeLedger, viewer: &AuthorId, total_comments: u64) -> Self {
        Self {
            like_count: ledger.count(),
            user_has_liked: ledger.has_author(viewer),
            total_comments,
        }
    }

    /// The same counters with an optimistic local like toggle overlaid
    /// (applied immediately, reconciled when the store confirms or
    /// reverted when it errors).
    pub fn with_pending_toggle(mut self, pending: Option<bool>) -> Self {
        match pending {
            Some(true) if !self.user_has_liked => {
                self.user_has_liked = true;
                self.like_count += 1;
            }
            Some(false) if self.user_has_liked => {
                self.user_has_liked = false;
                self.like_count = self.like_count.saturating_sub(1);
            }
            _ => {}
        }
        self
    }
}
