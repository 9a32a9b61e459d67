//! Leaf and internal node representations (spec.md §3, §4.2).
//!
//! Both node kinds store their payload in a [`DenseMap`] rather than a
//! `Vec`: leaves map key → value directly; internal nodes map each
//! child's separator key (the minimum key reachable through that child)
//! → child [`NodeId`]. `children_are_leaves` records, once per internal
//! node, whether those ids index `leaf_arena` or `internal_arena` — every
//! child of one internal node lives at the same tree level, so a single
//! per-node flag is enough and avoids tagging every entry individually.

use crate::comparator::DefaultComparator;
use crate::dense_map::DenseMap;
use crate::policy_allocator::NodeKind;
use crate::search::Linear;

use crate::arena::{NodeId, NULL_NODE};

/// A leaf node: the actual key/value data, plus the doubly-linked chain
/// pointers that make forward/reverse iteration and range scans possible
/// without climbing back up through `parent` (spec.md §4.2).
pub struct LeafNode<K, V, const LEAF_CAP: usize, Cmp = DefaultComparator<K>, S = Linear> {
    pub entries: DenseMap<K, V, LEAF_CAP, Cmp, S>,
    pub next_leaf: NodeId,
    pub prev_leaf: NodeId,
    pub parent: NodeId,
}

impl<K, V, const LEAF_CAP: usize, Cmp: Default, S> LeafNode<K, V, LEAF_CAP, Cmp, S> {
    pub fn new() -> Self {
        Self {
            entries: DenseMap::new(),
            next_leaf: NULL_NODE,
            prev_leaf: NULL_NODE,
            parent: NULL_NODE,
        }
    }
}

impl<K, V, const LEAF_CAP: usize, Cmp, S> NodeKind for LeafNode<K, V, LEAF_CAP, Cmp, S> {
    const IS_LEAF: bool = true;
}

/// An internal node: separator keys mapped to child ids, with no value
/// payload of its own (spec.md §3: "internal nodes hold only routing
/// information").
pub struct InternalNode<K, const INTERNAL_CAP: usize, Cmp = DefaultComparator<K>, S = Linear> {
    pub children: DenseMap<K, NodeId, INTERNAL_CAP, Cmp, S>,
    pub children_are_leaves: bool,
    pub parent: NodeId,
}

impl<K, const INTERNAL_CAP: usize, Cmp: Default, S> InternalNode<K, INTERNAL_CAP, Cmp, S> {
    pub fn new(children_are_leaves: bool) -> Self {
        Self {
            children: DenseMap::new(),
            children_are_leaves,
            parent: NULL_NODE,
        }
    }
}

impl<K, const INTERNAL_CAP: usize, Cmp, S> NodeKind for InternalNode<K, INTERNAL_CAP, Cmp, S> {
    const IS_LEAF: bool = false;
}

/// A tagged reference to either arena, used for the tree's root pointer
/// and wherever code needs to talk about "a child" without yet knowing
/// which arena it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Leaf(NodeId),
    Internal(NodeId),
}

impl NodeRef {
    #[inline]
    pub fn id(self) -> NodeId {
        match self {
            NodeRef::Leaf(id) | NodeRef::Internal(id) => id,
        }
    }

    #[inline]
    pub fn is_leaf(self) -> bool {
        matches!(self, NodeRef::Leaf(_))
    }
}
