//! Store traits and the change-stream subscription handle
//!
//! `InteractionStore` covers the append-only interaction log;
//! `MediaStore` covers ephemeral-media metadata and the single
//! conditional-update primitive that makes one-time views
//! at-most-one-winner under concurrent triggers.
//!
//! Subscriptions are scoped acquisitions: `subscribe` returns a
//! [`ChangeStream`] whose drop unsubscribes, so every exit path of a
//! view (including error paths) releases the channel.

use async_trait::async_trait;
use tokio::sync::broadcast;
use trellis_core::{
    ChangeEvent, EphemeralMedia, InteractionId, InteractionKind, InteractionRecord, MessageId,
    NewInteraction, Result, SubjectId, Timestamp,
};

/// One item from a subject's change stream.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A change notification, in per-subject publish order
    Event(ChangeEvent),
    /// The subscriber fell behind and `skipped` events were dropped;
    /// the forest can no longer be patched incrementally
    Lagged {
        /// Number of events lost to backpressure
        skipped: u64,
    },
    /// The store side of the channel is gone
    Closed,
}

/// Live handle on one subject's change notifications.
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct ChangeStream {
    subject_id: SubjectId,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeStream {
    /// Wrap a broadcast receiver for `subject_id`.
    pub fn new(subject_id: SubjectId, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { subject_id, rx }
    }

    /// The subject this stream watches.
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// Wait for the next item.
    pub async fn next(&mut self) -> StreamItem {
        match self.rx.recv().await {
            Ok(event) => StreamItem::Event(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => StreamItem::Lagged { skipped },
            Err(broadcast::error::RecvError::Closed) => StreamItem::Closed,
        }
    }

    /// Drain one item without waiting; `None` when the channel is
    /// currently empty.
    pub fn try_next(&mut self) -> Option<StreamItem> {
        match self.rx.try_recv() {
            Ok(event) => Some(StreamItem::Event(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Some(StreamItem::Lagged { skipped })
            }
            Err(broadcast::error::TryRecvError::Closed) => Some(StreamItem::Closed),
        }
    }
}

/// Durable, append-only storage for interaction records.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Persist a new interaction. The store validates the Like/Comment
    /// shape, assigns `id` and a monotonically non-decreasing
    /// `created_at`, and fans out an Insert event to subscribers.
    async fn create(&self, new: NewInteraction) -> Result<InteractionRecord>;

    /// Remove a record (the only mutation: unlike, or comment
    /// deletion). Fans out a Delete event carrying the removed record.
    async fn delete(&self, id: InteractionId) -> Result<()>;

    /// Snapshot of a subject's records, optionally filtered by kind,
    /// ordered by `(created_at, id)` ascending.
    async fn query(
        &self,
        subject_id: SubjectId,
        kind: Option<InteractionKind>,
    ) -> Result<Vec<InteractionRecord>>;

    /// Open a live change stream for a subject.
    async fn subscribe(&self, subject_id: SubjectId) -> Result<ChangeStream>;

    /// The latest sequence number published for a subject. A snapshot
    /// taken together with this value anchors duplicate/gap detection
    /// for the events that follow.
    async fn current_seq(&self, subject_id: SubjectId) -> Result<u64>;
}

/// Storage for ephemeral-media metadata.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist attachment metadata for a direct message.
    async fn put_media(&self, media: EphemeralMedia) -> Result<()>;

    /// Fetch attachment metadata.
    async fn get_media(&self, message_id: MessageId) -> Result<EphemeralMedia>;

    /// Atomically set `viewed_at` only if it is currently unset.
    ///
    /// Returns whether this caller won: `true` means the one-time view
    /// is now durably consumed by this trigger, `false` means another
    /// trigger got there first. This is the serialization point for
    /// concurrent recipient triggers from multiple devices.
    async fn set_viewed_at_if_unset(&self, message_id: MessageId, at: Timestamp) -> Result<bool>;
}
