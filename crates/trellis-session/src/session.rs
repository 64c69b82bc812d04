//! Per-subject session orchestration
//!
//! The session wires the pure thread core to the store boundary:
//! snapshot + subscribe on open, ordered apply on pump, optimistic
//! like toggling with rollback, and the full-resync backstop on gaps,
//! lag, or channel loss.
//!
//! Open-time ordering matters: subscribe first, then read the
//! sequence anchor, then snapshot. Every event the snapshot already
//! contains is dropped by the anchor check, and every event after the
//! anchor is applied idempotently, so the subscribe/snapshot race
//! cannot drop or double-apply a record.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use trellis_core::{
    AuthorId, EngineConfig, InteractionId, InteractionRecord, MessageId, NewInteraction, Result,
    SubjectId, Timestamp, TrellisError,
};
use trellis_media::{DisclosureController, MediaPresentation};
use trellis_store::{ChangeStream, InteractionStore, MediaStore, StreamItem};
use trellis_thread::{ApplyOutcome, Engagement, Forest, MergeEngine};

use crate::observer::SessionObserver;

/// Wall-clock milliseconds; used only for orphan-age and dwell
/// bookkeeping, never for record ordering (the store owns
/// `created_at`).
fn wall_now() -> Timestamp {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Timestamp::from_ms(ms)
}

/// One open subject view: live forest, counters, subscription.
pub struct SubjectSession<S> {
    store: Arc<S>,
    subject_id: SubjectId,
    viewer: AuthorId,
    config: EngineConfig,
    engine: MergeEngine,
    stream: ChangeStream,
    observer: Arc<dyn SessionObserver>,
    media: Option<Arc<DisclosureController<S>>>,
    /// Optimistic like overlay: the target state while a toggle's
    /// store call is in flight or its echo has not landed yet.
    pending_like: Option<bool>,
}

impl<S: InteractionStore> SubjectSession<S> {
    /// Open a session: subscribe, anchor, snapshot, build, and emit
    /// the first `forest_updated`.
    pub async fn open(
        store: Arc<S>,
        subject_id: SubjectId,
        viewer: AuthorId,
        config: EngineConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self> {
        let stream = store.subscribe(subject_id).await?;
        let anchor = store.current_seq(subject_id).await?;
        let records = store.query(subject_id, None).await?;
        let engine = MergeEngine::from_snapshot(subject_id, &config, &records, anchor);
        info!(
            subject = %subject_id,
            records = records.len(),
            anchor,
            "subject session opened"
        );

        let session = Self {
            store,
            subject_id,
            viewer,
            config,
            engine,
            stream,
            observer,
            media: None,
            pending_like: None,
        };
        session
            .observer
            .forest_updated(session.engine.forest(), &session.engagement());
        Ok(session)
    }

    /// The subject this session renders.
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// The actor this session renders for.
    pub fn viewer(&self) -> &AuthorId {
        &self.viewer
    }

    /// The live forest.
    pub fn forest(&self) -> &Forest {
        self.engine.forest()
    }

    /// Counters for the viewer, with any optimistic like overlay
    /// applied.
    pub fn engagement(&self) -> Engagement {
        self.engine
            .engagement(&self.viewer)
            .with_pending_toggle(self.pending_like)
    }

    /// Whether a gap forced the engine to refuse incremental applies.
    pub fn needs_resync(&self) -> bool {
        self.engine.needs_resync()
    }

    /// Wire up disclosure handling for this session's ephemeral media,
    /// using the configured dwell window.
    pub fn attach_media(&mut self)
    where
        S: MediaStore,
    {
        self.media = Some(Arc::new(DisclosureController::new(
            self.store.clone(),
            self.config.dwell_ms,
        )));
    }

    /// Wire up a shared disclosure controller instead (several
    /// sessions rendering the same conversation must agree on local
    /// view state).
    pub fn attach_media_controller(&mut self, controller: Arc<DisclosureController<S>>) {
        self.media = Some(controller);
    }

    /// Add a top-level comment. The forest updates when the store's
    /// echo notification lands (apply is idempotent, so a racing
    /// duplicate is harmless).
    pub async fn add_comment(&mut self, body: impl Into<String>) -> Result<InteractionRecord> {
        let new = NewInteraction::comment(self.subject_id, self.viewer.clone(), body);
        self.create_checked(new).await
    }

    /// Reply under an existing comment. The parent must be present in
    /// the local forest; replying to a node the viewer cannot see is a
    /// caller bug.
    pub async fn add_reply(
        &mut self,
        parent_id: InteractionId,
        body: impl Into<String>,
    ) -> Result<InteractionRecord> {
        if !self.engine.forest().contains(parent_id) {
            return Err(TrellisError::not_found(format!(
                "reply target {parent_id} not in forest"
            )));
        }
        let new = NewInteraction::reply(self.subject_id, self.viewer.clone(), parent_id, body);
        self.create_checked(new).await
    }

    /// Delete one of the viewer's comments.
    pub async fn delete_comment(&mut self, id: InteractionId) -> Result<()> {
        match self.store.delete(id).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report_mutation_failure("delete comment", err)),
        }
    }

    /// Toggle the viewer's like, optimistically.
    ///
    /// The overlay applies (and is reported) before the store call;
    /// on failure it is reverted and reported again along with the
    /// retryable error.
    pub async fn toggle_like(&mut self) -> Result<()> {
        let target = !self.engagement().user_has_liked;
        self.pending_like = Some(target);
        self.observer.engagement_updated(&self.engagement());

        let result = if target {
            self.store
                .create(NewInteraction::like(self.subject_id, self.viewer.clone()))
                .await
                .map(|_| ())
        } else {
            match self.engine.likes().like_of(&self.viewer) {
                Some(like_id) => self.store.delete(like_id).await,
                // Nothing confirmed store-side; the optimistic unlike
                // already matches reality.
                None => Ok(()),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.pending_like = None;
                self.observer.engagement_updated(&self.engagement());
                Err(self.report_mutation_failure("toggle like", err))
            }
        }
    }

    /// Fold or reopen a subtree. View state only; never persisted.
    pub fn set_collapsed(&mut self, id: InteractionId, collapsed: bool) -> bool {
        let changed = self.engine.set_collapsed(id, collapsed);
        if changed {
            self.observer
                .forest_updated(self.engine.forest(), &self.engagement());
        }
        changed
    }

    /// Clear a subtree's "N new replies" badge without expanding it.
    pub fn acknowledge_replies(&mut self, id: InteractionId) -> bool {
        let changed = self.engine.acknowledge_replies(id);
        if changed {
            self.observer
                .forest_updated(self.engine.forest(), &self.engagement());
        }
        changed
    }

    /// Drain every queued notification and apply it, resyncing if the
    /// stream reports a gap, lag, or loss. Non-blocking.
    pub async fn pump(&mut self) -> Result<()> {
        let mut applied = false;
        let mut resync_needed = self.engine.needs_resync();
        while !resync_needed {
            match self.stream.try_next() {
                None => break,
                Some(item) => match self.process(item) {
                    ProcessOutcome::Applied => applied = true,
                    ProcessOutcome::Ignored => {}
                    ProcessOutcome::ResyncRequired => resync_needed = true,
                },
            }
        }
        if self.engine.promote_stale_orphans(wall_now()) > 0 {
            applied = true;
        }
        self.reconcile_pending_like();

        if resync_needed {
            self.resync().await?;
        } else if applied {
            self.observer
                .forest_updated(self.engine.forest(), &self.engagement());
        }
        Ok(())
    }

    /// Wait for the next notification, then drain the rest like
    /// [`pump`](Self::pump).
    pub async fn next_change(&mut self) -> Result<()> {
        let item = self.stream.next().await;
        match self.process(item) {
            ProcessOutcome::ResyncRequired => self.resync().await,
            _ => self.pump().await,
        }
    }

    /// Full refetch-and-rebuild backstop. Also re-subscribes, so it
    /// recovers from a closed or lagged channel; callers invoke it
    /// directly after a local mutation whose server-confirmed shape is
    /// unknown.
    pub async fn resync(&mut self) -> Result<()> {
        self.observer.resync_started();
        // New stream first: events published while we snapshot are
        // queued there and deduplicated by the anchor.
        self.stream = self.store.subscribe(self.subject_id).await.map_err(|err| {
            warn!(subject = %self.subject_id, error = %err, "resubscribe failed");
            err
        })?;
        let anchor = self.store.current_seq(self.subject_id).await?;
        let records = self.store.query(self.subject_id, None).await?;
        self.engine.resync(&records, anchor);
        self.reconcile_pending_like();
        info!(
            subject = %self.subject_id,
            records = records.len(),
            anchor,
            "resync completed"
        );
        self.observer
            .resync_completed(self.engine.forest(), &self.engagement());
        Ok(())
    }

    /// Spend the one-time view budget on an ephemeral media item.
    /// Requires [`attach_media`](Self::attach_media).
    pub async fn trigger_view(&mut self, message_id: MessageId) -> Result<Timestamp>
    where
        S: MediaStore,
    {
        let controller = self.media.clone().ok_or_else(|| {
            TrellisError::invalid("no media controller attached to this session")
        })?;
        match controller
            .trigger_view(message_id, &self.viewer, wall_now())
            .await
        {
            Ok(until) => Ok(until),
            Err(err @ TrellisError::MutationFailed { .. }) => {
                self.observer.mutation_failed(&err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// What the viewer may currently see for an ephemeral media item.
    pub async fn media_presentation(&self, message_id: MessageId) -> Result<MediaPresentation>
    where
        S: MediaStore,
    {
        let controller = self
            .media
            .as_ref()
            .ok_or_else(|| TrellisError::invalid("no media controller attached to this session"))?;
        controller
            .presentation(message_id, &self.viewer, wall_now())
            .await
    }

    /// Close the view. Dropping the session drops its stream, which
    /// unsubscribes; view state and orphan buffers are discarded with
    /// the engine, never persisted.
    pub fn close(self) {
        debug!(subject = %self.subject_id, "subject session closed");
    }

    fn process(&mut self, item: StreamItem) -> ProcessOutcome {
        match item {
            StreamItem::Event(event) => match self.engine.apply(&event, wall_now()) {
                ApplyOutcome::Applied => ProcessOutcome::Applied,
                ApplyOutcome::Duplicate => ProcessOutcome::Ignored,
                ApplyOutcome::GapDetected { expected, got } => {
                    warn!(
                        subject = %self.subject_id,
                        expected,
                        got,
                        "notification gap, falling back to resync"
                    );
                    ProcessOutcome::ResyncRequired
                }
            },
            StreamItem::Lagged { skipped } => {
                warn!(
                    subject = %self.subject_id,
                    skipped,
                    "subscriber lagged, falling back to resync"
                );
                ProcessOutcome::ResyncRequired
            }
            StreamItem::Closed => {
                warn!(subject = %self.subject_id, "change stream closed, resubscribing");
                ProcessOutcome::ResyncRequired
            }
        }
    }

    /// Drop the optimistic overlay once the confirmed ledger agrees
    /// with it.
    fn reconcile_pending_like(&mut self) {
        if let Some(target) = self.pending_like {
            if self.engine.likes().has_author(&self.viewer) == target {
                self.pending_like = None;
            }
        }
    }

    fn report_mutation_failure(&self, what: &str, err: TrellisError) -> TrellisError {
        let wrapped = TrellisError::mutation_failed(format!("{what}: {err}"));
        self.observer.mutation_failed(&wrapped);
        wrapped
    }

    async fn create_checked(&mut self, new: NewInteraction) -> Result<InteractionRecord> {
        match self.store.create(new).await {
            Ok(record) => Ok(record),
            Err(err) => Err(self.report_mutation_failure("create interaction", err)),
        }
    }
}

enum ProcessOutcome {
    Applied,
    Ignored,
    ResyncRequired,
}
