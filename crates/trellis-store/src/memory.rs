//! In-process record store
//!
//! A complete implementation of both store traits behind
//! `parking_lot` locks: per-subject record maps and sequence counters,
//! a `tokio::sync::broadcast` channel per subject for change fan-out,
//! and a clock guard that keeps assigned `created_at` values strictly
//! increasing even if the OS clock steps backwards.
//!
//! Events are published under the same lock that advances the sequence
//! counter, so subscribers observe a contiguous, ordered seq per
//! subject.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;
use trellis_core::{
    ChangeEvent, ChangeOp, EphemeralMedia, InteractionId, InteractionKind, InteractionRecord,
    MessageId, NewInteraction, Result, SubjectId, Timestamp, TrellisError,
};

use crate::traits::{ChangeStream, InteractionStore, MediaStore};

/// Per-subject log state: records, publish cursor, fan-out channel.
#[derive(Debug)]
struct SubjectLog {
    records: IndexMap<InteractionId, InteractionRecord>,
    seq: u64,
    sender: broadcast::Sender<ChangeEvent>,
}

impl SubjectLog {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            records: IndexMap::new(),
            seq: 0,
            sender,
        }
    }

    fn publish(&mut self, op: ChangeOp, record: InteractionRecord) {
        self.seq += 1;
        let event = ChangeEvent {
            seq: self.seq,
            op,
            record,
        };
        // A send error only means no subscriber is listening right now.
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Default)]
struct Inner {
    subjects: HashMap<SubjectId, SubjectLog>,
    subject_of: HashMap<InteractionId, SubjectId>,
    media: HashMap<MessageId, EphemeralMedia>,
    last_ms: u64,
}

/// In-process store backend.
///
/// Cloning is cheap and clones share state, so one instance can serve
/// every open session in a process.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    event_buffer: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store with the default event channel capacity.
    pub fn new() -> Self {
        Self::with_event_buffer(256)
    }

    /// Store with an explicit per-subject channel capacity.
    pub fn with_event_buffer(event_buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            event_buffer,
        }
    }

    /// Strictly increasing wall-clock milliseconds. Strict monotonicity
    /// keeps `(created_at, id)` ordering aligned with append order.
    fn next_timestamp(inner: &mut Inner) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        inner.last_ms = wall.max(inner.last_ms + 1);
        Timestamp::from_ms(inner.last_ms)
    }

    fn log_mut(inner: &mut Inner, subject_id: SubjectId, capacity: usize) -> &mut SubjectLog {
        inner
            .subjects
            .entry(subject_id)
            .or_insert_with(|| SubjectLog::new(capacity))
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn create(&self, new: NewInteraction) -> Result<InteractionRecord> {
        let mut inner = self.inner.lock();
        let created_at = Self::next_timestamp(&mut inner);
        let record = InteractionRecord {
            id: InteractionId::new(),
            subject_id: new.subject_id,
            author_id: new.author_id,
            kind: new.kind,
            body: new.body,
            parent_id: new.parent_id,
            created_at,
        };
        record.validate()?;

        inner.subject_of.insert(record.id, record.subject_id);
        let log = Self::log_mut(&mut inner, record.subject_id, self.event_buffer);
        log.records.insert(record.id, record.clone());
        log.publish(ChangeOp::Insert, record.clone());
        debug!(id = %record.id, subject = %record.subject_id, "record created");
        Ok(record)
    }

    async fn delete(&self, id: InteractionId) -> Result<()> {
        let mut inner = self.inner.lock();
        let subject_id = inner
            .subject_of
            .remove(&id)
            .ok_or_else(|| TrellisError::not_found(format!("no record {id}")))?;
        let log = inner
            .subjects
            .get_mut(&subject_id)
            .ok_or_else(|| TrellisError::internal(format!("no log for {subject_id}")))?;
        let record = log
            .records
            .shift_remove(&id)
            .ok_or_else(|| TrellisError::not_found(format!("no record {id}")))?;
        log.publish(ChangeOp::Delete, record);
        debug!(id = %id, subject = %subject_id, "record deleted");
        Ok(())
    }

    async fn query(
        &self,
        subject_id: SubjectId,
        kind: Option<InteractionKind>,
    ) -> Result<Vec<InteractionRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<InteractionRecord> = match inner.subjects.get(&subject_id) {
            Some(log) => log
                .records
                .values()
                .filter(|r| kind.map_or(true, |k| r.kind == k))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    async fn subscribe(&self, subject_id: SubjectId) -> Result<ChangeStream> {
        let mut inner = self.inner.lock();
        let log = Self::log_mut(&mut inner, subject_id, self.event_buffer);
        Ok(ChangeStream::new(subject_id, log.sender.subscribe()))
    }

    async fn current_seq(&self, subject_id: SubjectId) -> Result<u64> {
        let inner = self.inner.lock();
        Ok(inner.subjects.get(&subject_id).map_or(0, |log| log.seq))
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn put_media(&self, media: EphemeralMedia) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.media.insert(media.message_id, media);
        Ok(())
    }

    async fn get_media(&self, message_id: MessageId) -> Result<EphemeralMedia> {
        let inner = self.inner.lock();
        inner
            .media
            .get(&message_id)
            .cloned()
            .ok_or_else(|| TrellisError::not_found(format!("no media for {message_id}")))
    }

    async fn set_viewed_at_if_unset(&self, message_id: MessageId, at: Timestamp) -> Result<bool> {
        let mut inner = self.inner.lock();
        let media = inner
            .media
            .get_mut(&message_id)
            .ok_or_else(|| TrellisError::not_found(format!("no media for {message_id}")))?;
        if media.viewed_at.is_some() {
            return Ok(false);
        }
        media.viewed_at = Some(at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StreamItem;
    use assert_matches::assert_matches;
    use trellis_core::{AuthorId, MediaKind};

    fn subject() -> SubjectId {
        SubjectId::new()
    }

    #[tokio::test]
    async fn test_create_assigns_monotonic_timestamps() {
        let store = MemoryStore::new();
        let s = subject();
        let a = store
            .create(NewInteraction::comment(s, AuthorId::new("a"), "one"))
            .await
            .unwrap();
        let b = store
            .create(NewInteraction::comment(s, AuthorId::new("a"), "two"))
            .await
            .unwrap();
        assert!(a.created_at < b.created_at);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_shape() {
        let store = MemoryStore::new();
        let bad = NewInteraction {
            subject_id: subject(),
            author_id: AuthorId::new("a"),
            kind: InteractionKind::Like,
            body: Some("likes cannot speak".into()),
            parent_id: None,
        };
        assert_matches!(store.create(bad).await, Err(TrellisError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_query_filters_by_kind() {
        let store = MemoryStore::new();
        let s = subject();
        store
            .create(NewInteraction::comment(s, AuthorId::new("a"), "hi"))
            .await
            .unwrap();
        store
            .create(NewInteraction::like(s, AuthorId::new("b")))
            .await
            .unwrap();

        let all = store.query(s, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let comments = store.query(s, Some(InteractionKind::Comment)).await.unwrap();
        assert_eq!(comments.len(), 1);
        let likes = store.query(s, Some(InteractionKind::Like)).await.unwrap();
        assert_eq!(likes.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_contiguous_seqs() {
        let store = MemoryStore::new();
        let s = subject();
        let mut stream = store.subscribe(s).await.unwrap();

        let created = store
            .create(NewInteraction::comment(s, AuthorId::new("a"), "hi"))
            .await
            .unwrap();
        store.delete(created.id).await.unwrap();

        let first = stream.next().await;
        assert_matches!(first, StreamItem::Event(ChangeEvent { seq: 1, op: ChangeOp::Insert, .. }));
        let second = stream.next().await;
        assert_matches!(
            second,
            StreamItem::Event(ChangeEvent { seq: 2, op: ChangeOp::Delete, .. })
        );
        assert_eq!(store.current_seq(s).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let store = MemoryStore::new();
        assert_matches!(
            store.delete(InteractionId::new()).await,
            Err(TrellisError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_set_viewed_at_wins_exactly_once() {
        let store = MemoryStore::new();
        let media = EphemeralMedia::new(
            MessageId::new(),
            "blob://m1",
            MediaKind::Image,
            AuthorId::new("sender"),
            AuthorId::new("recipient"),
        );
        let id = media.message_id;
        store.put_media(media).await.unwrap();

        assert!(store
            .set_viewed_at_if_unset(id, Timestamp::from_ms(5))
            .await
            .unwrap());
        assert!(!store
            .set_viewed_at_if_unset(id, Timestamp::from_ms(9))
            .await
            .unwrap());

        let stored = store.get_media(id).await.unwrap();
        assert_eq!(stored.viewed_at, Some(Timestamp::from_ms(5)));
    }

    #[tokio::test]
    async fn test_dropped_stream_detaches() {
        let store = MemoryStore::new();
        let s = subject();
        let stream = store.subscribe(s).await.unwrap();
        drop(stream);
        // Publishing with no live subscriber must not error.
        store
            .create(NewInteraction::comment(s, AuthorId::new("a"), "hi"))
            .await
            .unwrap();
    }
}
