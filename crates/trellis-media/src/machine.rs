//! Pure disclosure state machine
//!
//! `Unviewed → Viewing → Viewed`, with `Viewed` terminal. The machine
//! never performs I/O and never reads a clock; the controller feeds it
//! store outcomes and timestamps, which keeps every transition
//! deterministic under test.

use thiserror::Error;
use tracing::debug;
use trellis_core::{AuthorId, EphemeralMedia, MessageId, Timestamp, TrellisError, ViewState};

/// Errors from disclosure transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisclosureError {
    /// Only the recipient may spend the one-time view budget.
    #[error("only the recipient may reveal {message_id}")]
    NotRecipient {
        /// The media item in question
        message_id: MessageId,
    },

    /// The budget is already spent, locally or by a concurrent winner.
    #[error("view budget already consumed for {message_id}")]
    AlreadyConsumed {
        /// The media item in question
        message_id: MessageId,
    },
}

impl From<DisclosureError> for TrellisError {
    fn from(err: DisclosureError) -> Self {
        match err {
            DisclosureError::NotRecipient { message_id } => {
                TrellisError::permission_denied(format!("not the recipient of {message_id}"))
            }
            DisclosureError::AlreadyConsumed { message_id } => {
                TrellisError::view_already_consumed(message_id)
            }
        }
    }
}

/// What an actor is allowed to see right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaPresentation {
    /// Budget intact: show the tap-to-view affordance
    Concealed,
    /// Show the media
    Revealed,
    /// Budget spent: show the "viewed" placeholder
    Locked,
}

/// Per-item disclosure state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisclosureMachine {
    media: EphemeralMedia,
    dwell_ms: u64,
}

impl DisclosureMachine {
    /// Wrap freshly fetched media metadata.
    ///
    /// A store copy that already carries `viewed_at` was consumed in an
    /// earlier session (or by another device), so the local state
    /// starts at `Viewed` regardless of what the fetched `view_state`
    /// claims.
    pub fn new(mut media: EphemeralMedia, dwell_ms: u64) -> Self {
        if media.viewed_at.is_some() && media.view_state == ViewState::Unviewed {
            media.view_state = ViewState::Viewed;
        }
        Self { media, dwell_ms }
    }

    /// The media item this machine governs.
    pub fn media(&self) -> &EphemeralMedia {
        &self.media
    }

    /// Id of the governed item.
    pub fn message_id(&self) -> MessageId {
        self.media.message_id
    }

    /// Current state.
    pub fn state(&self) -> ViewState {
        self.media.view_state
    }

    /// Whether this actor is the recipient.
    pub fn is_recipient(&self, actor: &AuthorId) -> bool {
        &self.media.recipient_id == actor
    }

    /// Whether this actor is the sender.
    pub fn is_sender(&self, actor: &AuthorId) -> bool {
        &self.media.sender_id == actor
    }

    /// Enter `Viewing` after the store durably confirmed the reveal.
    ///
    /// Valid only from `Unviewed`; sets `viewed_at` exactly once.
    pub fn reveal_confirmed(&mut self, now: Timestamp) -> Result<(), DisclosureError> {
        match self.media.view_state {
            ViewState::Unviewed => {
                self.media.view_state = ViewState::Viewing { since: now };
                self.media.viewed_at = Some(now);
                Ok(())
            }
            ViewState::Viewing { .. } | ViewState::Viewed => Err(DisclosureError::AlreadyConsumed {
                message_id: self.media.message_id,
            }),
        }
    }

    /// Race-loser path: another trigger won the store's conditional
    /// update, so the budget is spent. Resolves directly to `Viewed`
    /// (never re-opens `Viewing`); the winner's `viewed_at` is
    /// authoritative store-side.
    pub fn force_viewed(&mut self) {
        self.media.view_state = ViewState::Viewed;
    }

    /// Expire the dwell window if it has elapsed. Purely local: this
    /// controls rendering only and never re-touches the store.
    pub fn poll(&mut self, now: Timestamp) -> ViewState {
        if let ViewState::Viewing { since } = self.media.view_state {
            if now.elapsed_since(since) >= self.dwell_ms {
                debug!(message_id = %self.media.message_id, "dwell elapsed, locking media");
                self.media.view_state = ViewState::Viewed;
            }
        }
        self.media.view_state
    }

    /// What `actor` may see at `now`.
    ///
    /// The sender always sees the media; the recipient sees it only
    /// inside an unexpired `Viewing` window; anyone else sees the
    /// locked placeholder.
    pub fn presentation(&self, actor: &AuthorId, now: Timestamp) -> MediaPresentation {
        if self.is_sender(actor) {
            return MediaPresentation::Revealed;
        }
        if !self.is_recipient(actor) {
            return MediaPresentation::Locked;
        }
        match self.media.view_state {
            ViewState::Unviewed => MediaPresentation::Concealed,
            ViewState::Viewing { since } => {
                if now.elapsed_since(since) < self.dwell_ms {
                    MediaPresentation::Revealed
                } else {
                    MediaPresentation::Locked
                }
            }
            ViewState::Viewed => MediaPresentation::Locked,
        }
    }
}
