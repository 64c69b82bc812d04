//! Pure comment-tree construction
//!
//! `build_forest` turns the complete set of Comment records for one
//! subject into a forest of [`CommentNode`]. It is a pure function:
//! no I/O, no clock, and running it twice on the same input yields a
//! structurally identical forest.
//!
//! A reply whose declared parent is missing from the input (deleted
//! parent, or parent not yet fetched) is promoted to a root rather
//! than dropped: losing a user's reply is a worse failure than
//! misplacing it.

use indexmap::IndexMap;
use tracing::debug;
use trellis_core::{InteractionId, InteractionKind, InteractionRecord, Timestamp};

/// One comment in the derived tree. In-memory only, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    /// The underlying interaction record
    pub record: InteractionRecord,
    /// Replies, ordered by `(created_at, id)` ascending
    pub children: Vec<CommentNode>,
    /// View state: subtree folded away. Discarded with the view.
    pub collapsed: bool,
    /// View state: replies that arrived while the subtree was
    /// collapsed, surfaced as an "N new replies" affordance instead of
    /// silently expanding.
    pub pending_replies: u32,
}

impl CommentNode {
    /// Wrap a record as a leaf node.
    pub fn new(record: InteractionRecord) -> Self {
        Self {
            record,
            children: Vec::new(),
            collapsed: false,
            pending_replies: 0,
        }
    }

    /// Id of the underlying record.
    pub fn id(&self) -> InteractionId {
        self.record.id
    }

    /// Creation time of the underlying record.
    pub fn created_at(&self) -> Timestamp {
        self.record.created_at
    }

    /// Nodes in this subtree, including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(CommentNode::subtree_len).sum::<usize>()
    }

    /// Insert a child at its `(created_at, id)` position.
    pub fn insert_child(&mut self, child: CommentNode) {
        insert_ordered(&mut self.children, child);
    }
}

/// Insert `node` into `nodes` keeping `(created_at, id)` ascending
/// order, regardless of arrival order.
pub(crate) fn insert_ordered(nodes: &mut Vec<CommentNode>, node: CommentNode) {
    let key = (node.created_at(), node.id());
    let at = nodes.partition_point(|n| (n.created_at(), n.id()) <= key);
    nodes.insert(at, node);
}

/// The set of root comments (and their descendants) for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    /// Top-level comments, ordered by `(created_at, id)` ascending.
    /// Presentation may reverse for newest-first surfaces.
    pub roots: Vec<CommentNode>,
}

impl Forest {
    /// Forest with no comments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of nodes, nested replies included.
    pub fn len(&self) -> usize {
        self.roots.iter().map(CommentNode::subtree_len).sum()
    }

    /// Whether the forest has no comments at all.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Find a node anywhere in the forest.
    pub fn get(&self, id: InteractionId) -> Option<&CommentNode> {
        fn walk(nodes: &[CommentNode], id: InteractionId) -> Option<&CommentNode> {
            for node in nodes {
                if node.id() == id {
                    return Some(node);
                }
                if let Some(found) = walk(&node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.roots, id)
    }

    /// Find a node anywhere in the forest, mutably.
    pub fn get_mut(&mut self, id: InteractionId) -> Option<&mut CommentNode> {
        fn walk(nodes: &mut [CommentNode], id: InteractionId) -> Option<&mut CommentNode> {
            for node in nodes {
                if node.id() == id {
                    return Some(node);
                }
                if let Some(found) = walk(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&mut self.roots, id)
    }

    /// Whether any node in the forest has this id.
    pub fn contains(&self, id: InteractionId) -> bool {
        self.get(id).is_some()
    }

    /// Visit every node depth-first, parents before children.
    pub fn for_each(&self, mut f: impl FnMut(&CommentNode)) {
        fn walk(nodes: &[CommentNode], f: &mut impl FnMut(&CommentNode)) {
            for node in nodes {
                f(node);
                walk(&node.children, f);
            }
        }
        walk(&self.roots, &mut f);
    }

    /// Insert a root at its `(created_at, id)` position.
    pub fn insert_root(&mut self, node: CommentNode) {
        insert_ordered(&mut self.roots, node);
    }
}

/// Result of a detailed build: the forest plus which records had to be
/// promoted because their declared parent was absent.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    /// The assembled forest
    pub forest: Forest,
    /// Ids promoted to best-effort roots (declared parent missing)
    pub orphans: Vec<InteractionId>,
}

/// Build the forest for one subject from its flat record set.
///
/// Non-Comment records are ignored. Duplicate ids keep the first
/// occurrence. See [`build_forest_detailed`] for the orphan report.
pub fn build_forest(records: &[InteractionRecord]) -> Forest {
    build_forest_detailed(records).forest
}

/// Two-pass build.
///
/// Pass 1 indexes every comment record by id. Pass 2 assigns each
/// record to its parent's child list when the parent is indexed, and
/// to the root list otherwise (parentless records, orphans, and the
/// degenerate self-parent case all land there). Mutually-parented
/// record cycles cannot arise from an append-only store, but if
/// present every member is still emitted, promoted in index order;
/// no record is ever lost.
pub fn build_forest_detailed(records: &[InteractionRecord]) -> BuildOutcome {
    let mut index: IndexMap<InteractionId, CommentNode> = IndexMap::new();
    for record in records {
        if record.kind != InteractionKind::Comment {
            continue;
        }
        index
            .entry(record.id)
            .or_insert_with(|| CommentNode::new(record.clone()));
    }

    let mut children_of: IndexMap<InteractionId, Vec<InteractionId>> = IndexMap::new();
    let mut root_ids: Vec<InteractionId> = Vec::new();
    let mut orphans: Vec<InteractionId> = Vec::new();
    for (id, node) in &index {
        match node.record.parent_id {
            Some(parent) if parent != *id && index.contains_key(&parent) => {
                children_of.entry(parent).or_default().push(*id);
            }
            Some(_) => {
                debug!(id = %id, "parent absent, promoting reply to root");
                orphans.push(*id);
                root_ids.push(*id);
            }
            None => root_ids.push(*id),
        }
    }

    let mut forest = Forest::new();
    for id in root_ids {
        if let Some(node) = assemble(id, &mut index, &children_of) {
            forest.insert_root(node);
        }
    }
    // Anything left in the index belongs to a parent cycle.
    while let Some(id) = index.keys().next().copied() {
        if let Some(node) = assemble(id, &mut index, &children_of) {
            forest.insert_root(node);
        }
    }

    BuildOutcome { forest, orphans }
}

/// Detach `id` from the index and recursively attach its children.
fn assemble(
    id: InteractionId,
    index: &mut IndexMap<InteractionId, CommentNode>,
    children_of: &IndexMap<InteractionId, Vec<InteractionId>>,
) -> Option<CommentNode> {
    let mut node = index.shift_remove(&id)?;
    if let Some(child_ids) = children_of.get(&id) {
        for child_id in child_ids {
            if let Some(child) = assemble(*child_id, index, children_of) {
                node.insert_child(child);
            }
        }
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{AuthorId, SubjectId};

    fn comment(
        subject: SubjectId,
        id: u128,
        parent: Option<u128>,
        at: u64,
    ) -> InteractionRecord {
        InteractionRecord {
            id: InteractionId::from_uuid(uuid::Uuid::from_u128(id)),
            subject_id: subject,
            author_id: AuthorId::new("tester"),
            kind: InteractionKind::Comment,
            body: Some(format!("comment {id}")),
            parent_id: parent.map(|p| InteractionId::from_uuid(uuid::Uuid::from_u128(p))),
            created_at: Timestamp::from_ms(at),
        }
    }

    fn iid(id: u128) -> InteractionId {
        InteractionId::from_uuid(uuid::Uuid::from_u128(id))
    }

    #[test]
    fn test_single_chain() {
        let s = SubjectId::new();
        let records = vec![
            comment(s, 1, None, 10),
            comment(s, 2, Some(1), 20),
            comment(s, 3, Some(2), 30),
        ];
        let forest = build_forest(&records);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.len(), 3);
        let root = &forest.roots[0];
        assert_eq!(root.id(), iid(1));
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].id(), iid(2));
        assert_eq!(root.children[0].children[0].id(), iid(3));
    }

    #[test]
    fn test_orphan_promoted_to_root() {
        let s = SubjectId::new();
        let records = vec![comment(s, 5, Some(99), 10)];
        let outcome = build_forest_detailed(&records);
        assert_eq!(outcome.forest.roots.len(), 1);
        assert_eq!(outcome.forest.roots[0].id(), iid(5));
        assert_eq!(outcome.orphans, vec![iid(5)]);
    }

    #[test]
    fn test_orphan_reattaches_when_parent_present() {
        let s = SubjectId::new();
        let records = vec![comment(s, 5, Some(99), 10), comment(s, 99, None, 5)];
        let forest = build_forest(&records);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.roots[0].id(), iid(99));
        assert_eq!(forest.roots[0].children[0].id(), iid(5));
    }

    #[test]
    fn test_children_ordered_by_created_at() {
        let s = SubjectId::new();
        // Children supplied out of creation order.
        let records = vec![
            comment(s, 1, None, 10),
            comment(s, 3, Some(1), 30),
            comment(s, 2, Some(1), 20),
        ];
        let forest = build_forest(&records);
        let ids: Vec<_> = forest.roots[0].children.iter().map(CommentNode::id).collect();
        assert_eq!(ids, vec![iid(2), iid(3)]);
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_id() {
        let s = SubjectId::new();
        let records = vec![
            comment(s, 1, None, 10),
            comment(s, 7, Some(1), 20),
            comment(s, 4, Some(1), 20),
        ];
        let forest = build_forest(&records);
        let ids: Vec<_> = forest.roots[0].children.iter().map(CommentNode::id).collect();
        assert_eq!(ids, vec![iid(4), iid(7)]);
    }

    #[test]
    fn test_idempotent_and_input_order_independent() {
        let s = SubjectId::new();
        let records = vec![
            comment(s, 1, None, 10),
            comment(s, 2, Some(1), 20),
            comment(s, 3, Some(1), 30),
            comment(s, 4, Some(2), 40),
        ];
        let forest_a = build_forest(&records);
        let forest_b = build_forest(&records);
        assert_eq!(forest_a, forest_b);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(build_forest(&reversed), forest_a);
    }

    #[test]
    fn test_likes_are_ignored() {
        let s = SubjectId::new();
        let mut like = comment(s, 9, None, 5);
        like.kind = InteractionKind::Like;
        like.body = None;
        let records = vec![like, comment(s, 1, None, 10)];
        let forest = build_forest(&records);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest.roots[0].id(), iid(1));
    }

    #[test]
    fn test_self_parent_becomes_root() {
        let s = SubjectId::new();
        let records = vec![comment(s, 1, Some(1), 10)];
        let forest = build_forest(&records);
        assert_eq!(forest.roots.len(), 1);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn test_parent_cycle_loses_nothing() {
        let s = SubjectId::new();
        let records = vec![comment(s, 1, Some(2), 10), comment(s, 2, Some(1), 20)];
        let forest = build_forest(&records);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let s = SubjectId::new();
        let mut dup = comment(s, 1, None, 99);
        dup.body = Some("late duplicate".into());
        let records = vec![comment(s, 1, None, 10), dup];
        let forest = build_forest(&records);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest.roots[0].record.created_at, Timestamp::from_ms(10));
    }
}
