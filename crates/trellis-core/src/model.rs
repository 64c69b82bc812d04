//! Interaction records, change events, and ephemeral media metadata
//!
//! `InteractionRecord` is the flat, append-only unit the store
//! persists: a Like or a Comment attached to a subject. Records are
//! immutable once written; "unlike" is a delete of the Like row, and
//! comment trees are derived in memory, never stored.
//!
//! `ChangeEvent` is the shape the store's change stream delivers, and
//! `EphemeralMedia` is the metadata for one-time-view message
//! attachments governed by `trellis-media`.

use crate::error::{Result, TrellisError};
use crate::identifiers::{AuthorId, InteractionId, MessageId, SubjectId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// The kind of an interaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    /// A like on the subject; carries no body and no parent.
    Like,
    /// A comment on the subject, or a reply to another comment.
    Comment,
}

/// A single appended interaction: one like or one comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Opaque unique identifier, assigned by the store on create
    pub id: InteractionId,
    /// The content item this interaction attaches to
    pub subject_id: SubjectId,
    /// Author of the interaction
    pub author_id: AuthorId,
    /// Like or Comment
    pub kind: InteractionKind,
    /// Comment text; present only for Comment
    pub body: Option<String>,
    /// Parent comment id; present only for reply Comments
    pub parent_id: Option<InteractionId>,
    /// Assigned by the store, monotonically non-decreasing per store
    pub created_at: Timestamp,
}

impl InteractionRecord {
    /// Whether this record is a comment attached under another comment.
    pub fn is_reply(&self) -> bool {
        self.kind == InteractionKind::Comment && self.parent_id.is_some()
    }

    /// Check the Like/Comment shape invariant.
    ///
    /// A Like has no body and no parent; a Comment has a body. Stores
    /// reject records that fail this before assigning an id.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            InteractionKind::Like => {
                if self.body.is_some() {
                    return Err(TrellisError::invalid("a like cannot carry a body"));
                }
                if self.parent_id.is_some() {
                    return Err(TrellisError::invalid("a like cannot have a parent"));
                }
            }
            InteractionKind::Comment => {
                if self.body.is_none() {
                    return Err(TrellisError::invalid("a comment requires a body"));
                }
            }
        }
        Ok(())
    }
}

/// A not-yet-persisted interaction, as handed to the store's `create`:
/// the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInteraction {
    /// The content item this interaction attaches to
    pub subject_id: SubjectId,
    /// Author of the interaction
    pub author_id: AuthorId,
    /// Like or Comment
    pub kind: InteractionKind,
    /// Comment text; present only for Comment
    pub body: Option<String>,
    /// Parent comment id; present only for reply Comments
    pub parent_id: Option<InteractionId>,
}

impl NewInteraction {
    /// A top-level comment on a subject.
    pub fn comment(subject_id: SubjectId, author_id: AuthorId, body: impl Into<String>) -> Self {
        Self {
            subject_id,
            author_id,
            kind: InteractionKind::Comment,
            body: Some(body.into()),
            parent_id: None,
        }
    }

    /// A reply under an existing comment.
    pub fn reply(
        subject_id: SubjectId,
        author_id: AuthorId,
        parent_id: InteractionId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            subject_id,
            author_id,
            kind: InteractionKind::Comment,
            body: Some(body.into()),
            parent_id: Some(parent_id),
        }
    }

    /// A like on a subject.
    pub fn like(subject_id: SubjectId, author_id: AuthorId) -> Self {
        Self {
            subject_id,
            author_id,
            kind: InteractionKind::Like,
            body: None,
            parent_id: None,
        }
    }
}

/// The operation a change notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    /// A record was appended
    Insert,
    /// A record was replaced in place (transport-level; records are
    /// immutable at this layer, so the engine treats it as
    /// replace-or-insert)
    Update,
    /// A record was removed
    Delete,
}

/// One notification from a subject's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Per-subject contiguous sequence number assigned by the store at
    /// publish time; used for duplicate and gap detection
    pub seq: u64,
    /// What happened
    pub op: ChangeOp,
    /// The affected record (for Delete, the record as it was removed)
    pub record: InteractionRecord,
}

/// Media type of an ephemeral attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Audio clip
    Audio,
}

/// Disclosure state of an ephemeral media item, for the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewState {
    /// Never revealed; the one-time budget is intact
    Unviewed,
    /// Currently revealed; expires after the dwell window
    Viewing {
        /// When the reveal was confirmed by the store
        since: Timestamp,
    },
    /// Budget spent; only the locked placeholder renders
    Viewed,
}

/// One-time-view media attachment on a direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralMedia {
    /// The message carrying this attachment
    pub message_id: MessageId,
    /// Where the (out-of-scope) media host serves the bytes from
    pub media_url: String,
    /// Image, video, or audio
    pub kind: MediaKind,
    /// Sender; may always render the media
    pub sender_id: AuthorId,
    /// Recipient; gets exactly one reveal
    pub recipient_id: AuthorId,
    /// Current disclosure state
    pub view_state: ViewState,
    /// Set exactly once, by the store's conditional update
    pub viewed_at: Option<Timestamp>,
}

impl EphemeralMedia {
    /// Fresh, unviewed attachment metadata.
    pub fn new(
        message_id: MessageId,
        media_url: impl Into<String>,
        kind: MediaKind,
        sender_id: AuthorId,
        recipient_id: AuthorId,
    ) -> Self {
        Self {
            message_id,
            media_url: media_url.into(),
            kind,
            sender_id,
            recipient_id,
            view_state: ViewState::Unviewed,
            viewed_at: None,
        }
    }
}
