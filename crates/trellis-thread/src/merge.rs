//! Incremental forest maintenance
//!
//! `MergeEngine` owns the live forest for one open subject and applies
//! its change notifications in transport order. Hierarchical
//! attachment is structurally fragile under partial or duplicated
//! delivery, so the engine is built around three defenses:
//!
//! - **idempotent apply**: per-subject sequence numbers make replays
//!   no-ops and expose gaps instead of silently corrupting the tree;
//! - **orphan buffering**: a reply whose parent has not arrived yet
//!   is held pending (never dropped) and re-attached the moment an
//!   insert unlocks it, or promoted to a best-effort root after a
//!   bounded wait;
//! - **full resync**: the correctness backstop, rebuilding from a fresh
//!   snapshot, diffing view state by id so already-rendered nodes do
//!   not flicker.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use trellis_core::{
    AuthorId, ChangeEvent, ChangeOp, EngineConfig, InteractionId, InteractionKind,
    InteractionRecord, SubjectId, Timestamp,
};

use crate::builder::{build_forest_detailed, insert_ordered, CommentNode, Forest};
use crate::engagement::{Engagement, LikeLedger};

/// Result of applying one change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event changed engine state
    Applied,
    /// The event was a replay or otherwise a no-op
    Duplicate,
    /// The event's sequence number implies missed notifications; the
    /// engine refuses further application until [`MergeEngine::resync`]
    GapDetected {
        /// The sequence number the engine expected next
        expected: u64,
        /// The sequence number the event carried
        got: u64,
    },
}

/// A reply waiting for its parent to arrive.
#[derive(Debug, Clone)]
struct PendingOrphan {
    record: InteractionRecord,
    buffered_at: Timestamp,
    /// Global arrival index; promotion processes orphans in arrival
    /// order so the result matches a rebuild over the same sequence.
    arrival: u64,
}

/// Live forest plus the bookkeeping that keeps it convergent.
#[derive(Debug)]
pub struct MergeEngine {
    subject_id: SubjectId,
    orphan_wait_ms: u64,
    forest: Forest,
    /// Comment records currently materialized in the forest.
    comments: IndexMap<InteractionId, InteractionRecord>,
    likes: LikeLedger,
    /// Buffered replies keyed by the parent id they are waiting for.
    orphans: IndexMap<InteractionId, Vec<PendingOrphan>>,
    orphan_arrivals: u64,
    /// Sequence number the next event must carry.
    next_seq: u64,
    needs_resync: bool,
}

impl MergeEngine {
    /// Empty engine for a subject, expecting the stream from seq 1.
    pub fn new(subject_id: SubjectId, config: &EngineConfig) -> Self {
        Self {
            subject_id,
            orphan_wait_ms: config.orphan_wait_ms,
            forest: Forest::new(),
            comments: IndexMap::new(),
            likes: LikeLedger::new(),
            orphans: IndexMap::new(),
            orphan_arrivals: 0,
            next_seq: 1,
            needs_resync: false,
        }
    }

    /// Engine seeded from a snapshot taken at `seq_anchor`: events with
    /// `seq <= seq_anchor` are replays of rows already in the snapshot.
    pub fn from_snapshot(
        subject_id: SubjectId,
        config: &EngineConfig,
        records: &[InteractionRecord],
        seq_anchor: u64,
    ) -> Self {
        let mut engine = Self::new(subject_id, config);
        engine.resync(records, seq_anchor);
        engine
    }

    /// The subject this engine maintains.
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// The live forest.
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// Store-confirmed like rows.
    pub fn likes(&self) -> &LikeLedger {
        &self.likes
    }

    /// All comments including nested replies, recomputed from the
    /// forest (derived, never independently mutated).
    pub fn total_comments(&self) -> u64 {
        self.forest.len() as u64
    }

    /// Counter snapshot for a viewer.
    pub fn engagement(&self, viewer: &AuthorId) -> Engagement {
        Engagement::snapshot(&self.likes, viewer, self.total_comments())
    }

    /// Whether a gap was detected and a resync is required before any
    /// further apply.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Number of replies currently buffered waiting for a parent.
    pub fn pending_orphans(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    /// Sequence number the next event must carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Apply one change notification, in transport order.
    ///
    /// `now` stamps any reply that ends up in the orphan buffer, so
    /// its bounded wait is measured from arrival.
    pub fn apply(&mut self, event: &ChangeEvent, now: Timestamp) -> ApplyOutcome {
        if self.needs_resync {
            return ApplyOutcome::GapDetected {
                expected: self.next_seq,
                got: event.seq,
            };
        }
        if event.seq < self.next_seq {
            debug!(seq = event.seq, expected = self.next_seq, "replayed event, ignoring");
            return ApplyOutcome::Duplicate;
        }
        if event.seq > self.next_seq {
            warn!(
                seq = event.seq,
                expected = self.next_seq,
                subject = %self.subject_id,
                "gap in notification sequence, resync required"
            );
            self.needs_resync = true;
            return ApplyOutcome::GapDetected {
                expected: self.next_seq,
                got: event.seq,
            };
        }
        self.next_seq += 1;

        if event.record.subject_id != self.subject_id {
            warn!(
                subject = %event.record.subject_id,
                engine = %self.subject_id,
                "event for foreign subject on this stream, ignoring"
            );
            return ApplyOutcome::Duplicate;
        }

        match (event.op, event.record.kind) {
            (ChangeOp::Insert | ChangeOp::Update, InteractionKind::Like) => {
                let record = &event.record;
                if self.likes.add(record.id, record.author_id.clone()) {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Duplicate
                }
            }
            (ChangeOp::Delete, InteractionKind::Like) => {
                if self.likes.remove(event.record.id) {
                    ApplyOutcome::Applied
                } else {
                    ApplyOutcome::Duplicate
                }
            }
            (ChangeOp::Insert, InteractionKind::Comment) => {
                self.insert_comment(event.record.clone(), now)
            }
            (ChangeOp::Update, InteractionKind::Comment) => {
                self.update_comment(event.record.clone(), now)
            }
            (ChangeOp::Delete, InteractionKind::Comment) => self.delete_comment(event.record.id),
        }
    }

    /// Surface buffered replies older than the orphan wait bound.
    ///
    /// Each stale reply whose parent has materialized in the meantime
    /// attaches there; the rest become best-effort roots, taken in
    /// arrival order so the outcome matches a full rebuild over the
    /// same record sequence. Returns how many replies were surfaced.
    pub fn promote_stale_orphans(&mut self, now: Timestamp) -> usize {
        let wait = self.orphan_wait_ms;
        let mut stale: Vec<PendingOrphan> = Vec::new();
        let buffered = std::mem::take(&mut self.orphans);
        for (parent, pendings) in buffered {
            let (old, young): (Vec<_>, Vec<_>) = pendings
                .into_iter()
                .partition(|p| now.elapsed_since(p.buffered_at) >= wait);
            stale.extend(old);
            if !young.is_empty() {
                self.orphans.insert(parent, young);
            }
        }
        stale.sort_by_key(|p| p.arrival);

        let promoted = stale.len();
        while !stale.is_empty() {
            // Attach anything whose parent is now in the forest before
            // rooting anyone; a promoted root may make more of the
            // stale set attachable.
            let attachable = stale.iter().position(|p| {
                p.record
                    .parent_id
                    .map_or(false, |parent| {
                        parent != p.record.id && self.comments.contains_key(&parent)
                    })
            });
            let pending = match attachable {
                Some(at) => stale.remove(at),
                None => stale.remove(0),
            };
            let id = pending.record.id;
            let parent = pending
                .record
                .parent_id
                .filter(|p| *p != id && self.comments.contains_key(p));
            self.materialize(pending.record, parent, now);
            self.unlock_orphans(id);
        }
        if promoted > 0 {
            info!(
                count = promoted,
                subject = %self.subject_id,
                "surfaced unresolved orphan replies"
            );
        }
        promoted
    }

    /// Full rebuild from a fresh snapshot taken at `seq_anchor`.
    ///
    /// Still-buffered orphan records missing from the snapshot are
    /// unioned in (a reply delivered by notification must not be lost
    /// to a racing refetch); `collapsed`/`pending_replies` survive by
    /// id so unaffected nodes do not flicker. Resyncing twice with the
    /// same snapshot is a no-op.
    pub fn resync(&mut self, records: &[InteractionRecord], seq_anchor: u64) {
        let mut view: HashMap<InteractionId, (bool, u32)> = HashMap::new();
        self.forest
            .for_each(|node| {
                view.insert(node.id(), (node.collapsed, node.pending_replies));
            });

        let mut union: Vec<InteractionRecord> = records.to_vec();
        let seen: HashSet<InteractionId> = union.iter().map(|r| r.id).collect();
        for pendings in self.orphans.values() {
            for pending in pendings {
                if !seen.contains(&pending.record.id) {
                    union.push(pending.record.clone());
                }
            }
        }

        let outcome = build_forest_detailed(&union);
        let mut forest = outcome.forest;
        restore_view_state(&mut forest.roots, &view);

        self.comments = union
            .iter()
            .filter(|r| r.kind == InteractionKind::Comment)
            .map(|r| (r.id, r.clone()))
            .collect();
        self.likes.clear();
        for record in records {
            if record.kind == InteractionKind::Like {
                self.likes.add(record.id, record.author_id.clone());
            }
        }
        self.forest = forest;
        self.orphans.clear();
        self.next_seq = seq_anchor + 1;
        self.needs_resync = false;
    }

    /// Fold a subtree away, or reopen it. Returns false for unknown
    /// ids.
    pub fn set_collapsed(&mut self, id: InteractionId, collapsed: bool) -> bool {
        match self.forest.get_mut(id) {
            Some(node) => {
                node.collapsed = collapsed;
                if !collapsed {
                    node.pending_replies = 0;
                }
                true
            }
            None => false,
        }
    }

    /// Clear the "N new replies" badge without expanding. Returns
    /// false for unknown ids.
    pub fn acknowledge_replies(&mut self, id: InteractionId) -> bool {
        match self.forest.get_mut(id) {
            Some(node) => {
                node.pending_replies = 0;
                true
            }
            None => false,
        }
    }

    fn is_buffered(&self, id: InteractionId) -> bool {
        self.orphans
            .values()
            .any(|pendings| pendings.iter().any(|p| p.record.id == id))
    }

    fn insert_comment(&mut self, record: InteractionRecord, now: Timestamp) -> ApplyOutcome {
        let id = record.id;
        if self.comments.contains_key(&id) || self.is_buffered(id) {
            debug!(id = %id, "duplicate comment insert, ignoring");
            return ApplyOutcome::Duplicate;
        }

        match record.parent_id {
            Some(parent) if parent != id && !self.comments.contains_key(&parent) => {
                debug!(id = %id, parent = %parent, "parent absent, buffering orphan reply");
                self.orphan_arrivals += 1;
                let arrival = self.orphan_arrivals;
                self.orphans
                    .entry(parent)
                    .or_default()
                    .push(PendingOrphan {
                        record,
                        buffered_at: now,
                        arrival,
                    });
            }
            parent => {
                let parent = parent.filter(|p| *p != id);
                self.materialize(record, parent, now);
                self.unlock_orphans(id);
            }
        }
        ApplyOutcome::Applied
    }

    fn update_comment(&mut self, record: InteractionRecord, now: Timestamp) -> ApplyOutcome {
        let id = record.id;
        if let Some(node) = self.forest.get_mut(id) {
            node.record = record.clone();
            self.comments.insert(id, record);
            return ApplyOutcome::Applied;
        }
        if let Some(pending) = self
            .orphans
            .values_mut()
            .flat_map(|pendings| pendings.iter_mut())
            .find(|p| p.record.id == id)
        {
            pending.record = record;
            return ApplyOutcome::Applied;
        }
        // Never seen: treat like an insert so apply stays total.
        self.insert_comment(record, now)
    }

    fn delete_comment(&mut self, id: InteractionId) -> ApplyOutcome {
        let was_materialized = self.comments.shift_remove(&id).is_some();
        if was_materialized {
            remove_and_reparent(&mut self.forest.roots, id);
        }

        let mut was_buffered = false;
        for pendings in self.orphans.values_mut() {
            let before = pendings.len();
            pendings.retain(|p| p.record.id != id);
            was_buffered |= pendings.len() != before;
        }
        self.orphans.retain(|_, pendings| !pendings.is_empty());

        // Replies waiting on the deleted id will never see their
        // parent arrive; surface them now rather than holding them for
        // the full wait.
        let mut promoted = 0;
        if let Some(pendings) = self.orphans.shift_remove(&id) {
            promoted = pendings.len();
            info!(
                count = promoted,
                parent = %id,
                "parent deleted before buffered replies attached, promoting to roots"
            );
            for pending in pendings {
                let orphan_id = pending.record.id;
                self.materialize(pending.record, None, Timestamp::default());
                self.unlock_orphans(orphan_id);
            }
        }

        if was_materialized || was_buffered || promoted > 0 {
            ApplyOutcome::Applied
        } else {
            debug!(id = %id, "delete for unknown comment, ignoring");
            ApplyOutcome::Duplicate
        }
    }

    /// Put a record into the forest (under `parent` when given, as a
    /// root otherwise) and into the comment map.
    fn materialize(
        &mut self,
        record: InteractionRecord,
        parent: Option<InteractionId>,
        _now: Timestamp,
    ) {
        let id = record.id;
        self.comments.insert(id, record.clone());
        let node = CommentNode::new(record);
        match parent.and_then(|p| self.forest.get_mut(p)) {
            Some(parent_node) => {
                if parent_node.collapsed {
                    parent_node.pending_replies += 1;
                }
                parent_node.insert_child(node);
            }
            None => self.forest.insert_root(node),
        }
    }

    /// Attach every buffered reply that was waiting for `id`, and
    /// transitively any replies waiting for those.
    fn unlock_orphans(&mut self, id: InteractionId) {
        let mut stack = vec![id];
        while let Some(parent) = stack.pop() {
            let Some(pendings) = self.orphans.shift_remove(&parent) else {
                continue;
            };
            debug!(
                count = pendings.len(),
                parent = %parent,
                "parent arrived, attaching buffered replies"
            );
            for pending in pendings {
                let child_id = pending.record.id;
                self.materialize(pending.record, Some(parent), pending.buffered_at);
                stack.push(child_id);
            }
        }
    }
}

/// Remove `id` from the (sub)forest, splicing its children into the
/// sibling list it occupied (the deleted node's own parent, or the
/// root list. Returns whether the node was found.
fn remove_and_reparent(nodes: &mut Vec<CommentNode>, id: InteractionId) -> bool {
    if let Some(at) = nodes.iter().position(|n| n.id() == id) {
        let removed = nodes.remove(at);
        for child in removed.children {
            insert_ordered(nodes, child);
        }
        return true;
    }
    for node in nodes.iter_mut() {
        if remove_and_reparent(&mut node.children, id) {
            return true;
        }
    }
    false
}

/// Re-apply `collapsed`/`pending_replies` by id after a rebuild.
fn restore_view_state(nodes: &mut [CommentNode], view: &HashMap<InteractionId, (bool, u32)>) {
    for node in nodes {
        if let Some((collapsed, pending)) = view.get(&node.id()) {
            node.collapsed = *collapsed;
            node.pending_replies = *pending;
        }
        restore_view_state(&mut node.children, view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_forest;
    use assert_matches::assert_matches;

    fn iid(id: u128) -> InteractionId {
        InteractionId::from_uuid(uuid::Uuid::from_u128(id))
    }

    fn comment(subject: SubjectId, id: u128, parent: Option<u128>, at: u64) -> InteractionRecord {
        InteractionRecord {
            id: iid(id),
            subject_id: subject,
            author_id: AuthorId::new("tester"),
            kind: InteractionKind::Comment,
            body: Some(format!("comment {id}")),
            parent_id: parent.map(iid),
            created_at: Timestamp::from_ms(at),
        }
    }

    fn like(subject: SubjectId, id: u128, author: &str, at: u64) -> InteractionRecord {
        InteractionRecord {
            id: iid(id),
            subject_id: subject,
            author_id: AuthorId::new(author),
            kind: InteractionKind::Like,
            body: None,
            parent_id: None,
            created_at: Timestamp::from_ms(at),
        }
    }

    struct Feed {
        subject: SubjectId,
        seq: u64,
    }

    impl Feed {
        fn new(subject: SubjectId) -> Self {
            Self { subject, seq: 0 }
        }

        fn event(&mut self, op: ChangeOp, record: InteractionRecord) -> ChangeEvent {
            self.seq += 1;
            ChangeEvent {
                seq: self.seq,
                op,
                record,
            }
        }
    }

    fn now() -> Timestamp {
        Timestamp::from_ms(1_000_000)
    }

    #[test]
    fn test_insert_roots_and_replies() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        for record in [
            comment(s, 1, None, 10),
            comment(s, 2, Some(1), 20),
            comment(s, 3, Some(2), 30),
        ] {
            let event = feed.event(ChangeOp::Insert, record);
            assert_eq!(engine.apply(&event, now()), ApplyOutcome::Applied);
        }

        assert_eq!(engine.total_comments(), 3);
        assert_eq!(engine.forest().roots.len(), 1);
        assert_eq!(engine.forest().roots[0].children[0].children[0].id(), iid(3));
    }

    #[test]
    fn test_duplicate_apply_is_noop() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let event = feed.event(ChangeOp::Insert, comment(s, 1, None, 10));
        assert_eq!(engine.apply(&event, now()), ApplyOutcome::Applied);
        let before = engine.forest().clone();

        // Same seq replayed verbatim.
        assert_eq!(engine.apply(&event, now()), ApplyOutcome::Duplicate);
        assert_eq!(engine.forest(), &before);
        assert_eq!(engine.total_comments(), 1);
    }

    #[test]
    fn test_orphan_buffered_then_unlocked() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let reply = feed.event(ChangeOp::Insert, comment(s, 5, Some(99), 10));
        assert_eq!(engine.apply(&reply, now()), ApplyOutcome::Applied);
        assert_eq!(engine.total_comments(), 0);
        assert_eq!(engine.pending_orphans(), 1);

        let parent = feed.event(ChangeOp::Insert, comment(s, 99, None, 5));
        assert_eq!(engine.apply(&parent, now()), ApplyOutcome::Applied);
        assert_eq!(engine.pending_orphans(), 0);
        assert_eq!(engine.forest().roots.len(), 1);
        assert_eq!(engine.forest().roots[0].id(), iid(99));
        assert_eq!(engine.forest().roots[0].children[0].id(), iid(5));
    }

    #[test]
    fn test_orphan_chain_unlocks_transitively() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        // Grandchild and child arrive before the root.
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 3, Some(2), 30)), now());
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 2, Some(1), 20)), now());
        assert_eq!(engine.pending_orphans(), 2);

        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 1, None, 10)), now());
        assert_eq!(engine.pending_orphans(), 0);
        assert_eq!(engine.total_comments(), 3);
        assert_eq!(engine.forest().roots[0].children[0].children[0].id(), iid(3));
    }

    #[test]
    fn test_delete_reparents_children() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let middle = comment(s, 2, Some(1), 20);
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 1, None, 10)), now());
        engine.apply(&feed.event(ChangeOp::Insert, middle.clone()), now());
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 3, Some(2), 30)), now());
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 4, Some(2), 40)), now());

        let event = feed.event(ChangeOp::Delete, middle);
        assert_eq!(engine.apply(&event, now()), ApplyOutcome::Applied);

        // Children of 2 now hang off 1, still in creation order.
        let root = &engine.forest().roots[0];
        assert_eq!(root.id(), iid(1));
        let ids: Vec<_> = root.children.iter().map(CommentNode::id).collect();
        assert_eq!(ids, vec![iid(3), iid(4)]);
        assert_eq!(engine.total_comments(), 3);
    }

    #[test]
    fn test_delete_root_promotes_children_to_roots() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let root = comment(s, 1, None, 10);
        engine.apply(&feed.event(ChangeOp::Insert, root.clone()), now());
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 2, Some(1), 20)), now());

        engine.apply(&feed.event(ChangeOp::Delete, root), now());
        assert_eq!(engine.forest().roots.len(), 1);
        assert_eq!(engine.forest().roots[0].id(), iid(2));
    }

    #[test]
    fn test_like_insert_then_delete_counts_zero() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());
        let viewer = AuthorId::new("a");

        let row = like(s, 1, "a", 10);
        engine.apply(&feed.event(ChangeOp::Insert, row.clone()), now());
        assert_eq!(engine.engagement(&viewer).like_count, 1);
        assert!(engine.engagement(&viewer).user_has_liked);

        engine.apply(&feed.event(ChangeOp::Delete, row), now());
        let e = engine.engagement(&viewer);
        assert_eq!(e.like_count, 0);
        assert!(!e.user_has_liked);
    }

    #[test]
    fn test_gap_detection_blocks_until_resync() {
        let s = SubjectId::new();
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let skipped = ChangeEvent {
            seq: 3,
            op: ChangeOp::Insert,
            record: comment(s, 1, None, 10),
        };
        assert_matches!(
            engine.apply(&skipped, now()),
            ApplyOutcome::GapDetected { expected: 1, got: 3 }
        );
        assert!(engine.needs_resync());

        // Even a well-formed event is refused until resync.
        let ok = ChangeEvent {
            seq: 1,
            op: ChangeOp::Insert,
            record: comment(s, 1, None, 10),
        };
        assert_matches!(engine.apply(&ok, now()), ApplyOutcome::GapDetected { .. });

        engine.resync(&[comment(s, 1, None, 10), comment(s, 2, Some(1), 20)], 3);
        assert!(!engine.needs_resync());
        assert_eq!(engine.total_comments(), 2);
        assert_eq!(engine.next_seq(), 4);
    }

    #[test]
    fn test_resync_preserves_view_state() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 1, None, 10)), now());
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 2, Some(1), 20)), now());
        assert!(engine.set_collapsed(iid(1), true));

        let snapshot = vec![
            comment(s, 1, None, 10),
            comment(s, 2, Some(1), 20),
            comment(s, 3, Some(1), 30),
        ];
        engine.resync(&snapshot, feed.seq);
        assert!(engine.forest().get(iid(1)).map_or(false, |n| n.collapsed));
        assert_eq!(engine.total_comments(), 3);

        // Idempotent: same snapshot again changes nothing.
        let before = engine.forest().clone();
        engine.resync(&snapshot, feed.seq);
        assert_eq!(engine.forest(), &before);
    }

    #[test]
    fn test_resync_keeps_buffered_orphans() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let reply = feed.event(ChangeOp::Insert, comment(s, 5, Some(99), 50));
        engine.apply(&reply, now());
        assert_eq!(engine.pending_orphans(), 1);

        // Refetch raced the reply: snapshot has neither 5 nor 99.
        engine.resync(&[comment(s, 1, None, 10)], feed.seq);
        assert_eq!(engine.pending_orphans(), 0);
        assert_eq!(engine.total_comments(), 2);
        assert!(engine.forest().contains(iid(5)));
    }

    #[test]
    fn test_pending_badge_on_collapsed_subtree() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 1, None, 10)), now());
        engine.set_collapsed(iid(1), true);

        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 2, Some(1), 20)), now());
        let root = engine.forest().get(iid(1)).expect("root");
        assert!(root.collapsed);
        assert_eq!(root.pending_replies, 1);

        assert!(engine.acknowledge_replies(iid(1)));
        assert_eq!(engine.forest().get(iid(1)).expect("root").pending_replies, 0);
    }

    #[test]
    fn test_promote_stale_orphans_after_bound() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let config = EngineConfig {
            orphan_wait_ms: 1_000,
            ..EngineConfig::default()
        };
        let mut engine = MergeEngine::new(s, &config);

        let t0 = Timestamp::from_ms(10_000);
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 5, Some(99), 50)), t0);
        assert_eq!(engine.promote_stale_orphans(t0.plus_ms(500)), 0);
        assert_eq!(engine.total_comments(), 0);

        assert_eq!(engine.promote_stale_orphans(t0.plus_ms(1_000)), 1);
        assert_eq!(engine.total_comments(), 1);
        assert_eq!(engine.forest().roots[0].id(), iid(5));
    }

    #[test]
    fn test_parent_deleted_promotes_waiting_orphans() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let parent = comment(s, 1, None, 10);
        engine.apply(&feed.event(ChangeOp::Insert, parent.clone()), now());
        engine.apply(&feed.event(ChangeOp::Delete, parent.clone()), now());

        // A reply to the now-deleted parent arrives late.
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 2, Some(1), 20)), now());
        assert_eq!(engine.pending_orphans(), 1);

        // A second delete notification for the same parent is a pure
        // replay for the row, but the buffered reply has already been
        // handled by neither: promote happens on the first delete that
        // sees it.
        engine.apply(&feed.event(ChangeOp::Delete, parent), now());
        assert_eq!(engine.pending_orphans(), 0);
        assert_eq!(engine.total_comments(), 1);
        assert!(engine.forest().contains(iid(2)));
    }

    #[test]
    fn test_update_replaces_body_in_place() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 1, None, 10)), now());
        engine.apply(&feed.event(ChangeOp::Insert, comment(s, 2, Some(1), 20)), now());

        let mut edited = comment(s, 1, None, 10);
        edited.body = Some("edited".into());
        engine.apply(&feed.event(ChangeOp::Update, edited), now());

        let root = engine.forest().get(iid(1)).expect("root");
        assert_eq!(root.record.body.as_deref(), Some("edited"));
        assert_eq!(root.children.len(), 1);
    }

    /// Forest shape as "id(children)" text, for structural comparison
    /// where record contents differ (a reparented node keeps its
    /// original `parent_id`).
    fn shape(nodes: &[CommentNode]) -> String {
        nodes
            .iter()
            .map(|n| {
                if n.children.is_empty() {
                    format!("{}", n.record.id.uuid().as_u128())
                } else {
                    format!("{}({})", n.record.id.uuid().as_u128(), shape(&n.children))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn test_insert_only_merge_matches_rebuild() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        // Out-of-order delivery, including an orphan that resolves.
        let records = vec![
            comment(s, 4, Some(3), 40),
            comment(s, 1, None, 10),
            comment(s, 3, Some(1), 30),
            comment(s, 2, Some(1), 20),
            comment(s, 5, None, 50),
        ];
        for record in &records {
            engine.apply(&feed.event(ChangeOp::Insert, record.clone()), now());
        }

        assert_eq!(engine.forest(), &build_forest(&records));
    }

    #[test]
    fn test_delete_merge_matches_rebuild_shape() {
        let s = SubjectId::new();
        let mut feed = Feed::new(s);
        let mut engine = MergeEngine::new(s, &EngineConfig::default());

        let records = vec![
            comment(s, 1, None, 10),
            comment(s, 2, Some(1), 20),
            comment(s, 3, Some(1), 30),
            comment(s, 4, Some(3), 40),
            comment(s, 5, None, 50),
        ];
        for record in &records {
            engine.apply(&feed.event(ChangeOp::Insert, record.clone()), now());
        }
        // Delete 3: its child 4 must survive, reparented under 1.
        engine.apply(&feed.event(ChangeOp::Delete, records[2].clone()), now());

        let mut implied: Vec<InteractionRecord> = vec![
            records[0].clone(),
            records[1].clone(),
            records[4].clone(),
        ];
        let mut reparented = records[3].clone();
        reparented.parent_id = Some(iid(1));
        implied.push(reparented);

        let rebuilt = build_forest(&implied);
        assert_eq!(shape(&engine.forest().roots), shape(&rebuilt.roots));
    }
}
