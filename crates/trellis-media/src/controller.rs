//! Store-confirming disclosure controller
//!
//! The controller sits between the view layer and the pure machine.
//! Its one hard job: the media must never render before the store has
//! durably marked the view consumed, and a trigger that loses the
//! store race must land on the locked placeholder, not a second
//! reveal.
//!
//! Concurrent triggers from the same process (double-tap, two windows)
//! are serialized by a per-message async mutex; concurrent triggers
//! from other devices are serialized by the store's conditional
//! update, which admits exactly one winner.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use trellis_core::{AuthorId, EphemeralMedia, MessageId, Result, Timestamp, TrellisError, ViewState};
use trellis_store::MediaStore;

use crate::machine::{DisclosureMachine, MediaPresentation};

type SharedMachine = Arc<tokio::sync::Mutex<DisclosureMachine>>;

/// Governs every ephemeral media item one client renders.
pub struct DisclosureController<S> {
    store: Arc<S>,
    dwell_ms: u64,
    items: Mutex<HashMap<MessageId, SharedMachine>>,
}

impl<S: MediaStore> DisclosureController<S> {
    /// Controller over `store` with the given dwell window.
    pub fn new(store: Arc<S>, dwell_ms: u64) -> Self {
        Self {
            store,
            dwell_ms,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Track media the caller already holds (e.g. delivered with the
    /// message payload), skipping the fetch.
    pub fn track(&self, media: EphemeralMedia) {
        let machine = DisclosureMachine::new(media, self.dwell_ms);
        self.items
            .lock()
            .entry(machine.message_id())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(machine)));
    }

    /// The machine for `message_id`, fetching metadata on first use.
    async fn item(&self, message_id: MessageId) -> Result<SharedMachine> {
        if let Some(machine) = self.items.lock().get(&message_id) {
            return Ok(machine.clone());
        }
        let media = self.store.get_media(message_id).await?;
        let machine = DisclosureMachine::new(media, self.dwell_ms);
        // A concurrent fetch may have inserted first; keep that one.
        Ok(self
            .items
            .lock()
            .entry(message_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(machine)))
            .clone())
    }

    /// Spend the one-time view budget as `actor` at `now`.
    ///
    /// On success returns the timestamp at which the reveal window
    /// closes. The local transition happens only after the store's
    /// conditional update confirms; on store failure the state stays
    /// `Unviewed` and the returned `MutationFailed` is retryable.
    pub async fn trigger_view(
        &self,
        message_id: MessageId,
        actor: &AuthorId,
        now: Timestamp,
    ) -> Result<Timestamp> {
        let item = self.item(message_id).await?;
        let mut machine = item.lock().await;

        if !machine.is_recipient(actor) {
            return Err(TrellisError::permission_denied(format!(
                "only the recipient may reveal {message_id}"
            )));
        }
        match machine.state() {
            ViewState::Viewing { .. } | ViewState::Viewed => {
                return Err(TrellisError::view_already_consumed(message_id));
            }
            ViewState::Unviewed => {}
        }

        match self.store.set_viewed_at_if_unset(message_id, now).await {
            Ok(true) => {
                machine.reveal_confirmed(now)?;
                info!(message_id = %message_id, "one-time view consumed");
                Ok(now.plus_ms(self.dwell_ms))
            }
            Ok(false) => {
                // Another device won; the budget is spent.
                warn!(message_id = %message_id, "view race lost, locking locally");
                machine.force_viewed();
                Err(TrellisError::view_already_consumed(message_id))
            }
            Err(err) => {
                // No local transition happened; the reveal is still
                // available once the store is reachable again.
                warn!(message_id = %message_id, error = %err, "view confirmation failed");
                Err(TrellisError::mutation_failed(format!(
                    "could not confirm view of {message_id}: {err}"
                )))
            }
        }
    }

    /// What `actor` may see for `message_id` at `now`, advancing dwell
    /// expiry first.
    pub async fn presentation(
        &self,
        message_id: MessageId,
        actor: &AuthorId,
        now: Timestamp,
    ) -> Result<MediaPresentation> {
        let item = self.item(message_id).await?;
        let mut machine = item.lock().await;
        machine.poll(now);
        Ok(machine.presentation(actor, now))
    }

    /// Current state of one item, advancing dwell expiry first.
    pub async fn view_state(&self, message_id: MessageId, now: Timestamp) -> Result<ViewState> {
        let item = self.item(message_id).await?;
        let mut machine = item.lock().await;
        Ok(machine.poll(now))
    }

    /// Drop local machines; harmless because the store stays
    /// authoritative (a consumed item re-tracks as `Viewed`).
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}
