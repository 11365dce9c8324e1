//! Replicated Growable Array: the ordered node list behind a document.
//!
//! Nodes are kept in document order in a flat vector. Deleted nodes stay
//! in place as tombstones so later inserts can still anchor to them.
//!
//! ```text
//! head ─► [H] ─► [e] ─► [l]† ─► [l] ─► [o]
//!                        └── tombstone, still addressable as an origin
//! ```
//!
//! Integration of a node with origin `o` starts right after `o` and skips
//! every node whose order key `(logical_time, actor, seq)` is greater than
//! the new node's. Because a node is always younger than its origin, a
//! skipped sibling's whole subtree is skipped with it, and every replica
//! lands on the same index regardless of arrival order.

use std::collections::HashMap;

use crate::id::{LogicalTime, NodeId};
use crate::op::NodeRecord;

#[derive(Debug, Clone, Default)]
pub struct Rga {
    nodes: Vec<NodeRecord>,
    /// Logical time of every known node, tombstones included.
    known: HashMap<NodeId, LogicalTime>,
    visible: usize,
}

impl Rga {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-deleted nodes.
    pub fn visible_len(&self) -> usize {
        self.visible
    }

    /// Number of nodes including tombstones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tombstones(&self) -> usize {
        self.nodes.len() - self.visible
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.known.contains_key(id)
    }

    pub fn logical_time_of(&self, id: &NodeId) -> Option<LogicalTime> {
        self.known.get(id).copied()
    }

    pub fn is_deleted(&self, id: &NodeId) -> Option<bool> {
        self.index_of(id).map(|i| self.nodes[i].deleted)
    }

    fn index_of(&self, id: &NodeId) -> Option<usize> {
        if !self.known.contains_key(id) {
            return None;
        }
        self.nodes.iter().position(|n| &n.id == id)
    }

    /// Id of the visible node at `position`.
    pub fn visible_id_at(&self, position: usize) -> Option<&NodeId> {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .nth(position)
            .map(|n| &n.id)
    }

    /// Visible index the node occupies, or would occupy if it were visible.
    pub fn visible_position_of(&self, id: &NodeId) -> Option<usize> {
        let index = self.index_of(id)?;
        Some(self.nodes[..index].iter().filter(|n| !n.deleted).count())
    }

    /// Place a node after its origin. The caller guarantees the id is new
    /// and the origin is present.
    pub fn integrate(&mut self, node: NodeRecord) -> usize {
        let mut index = match &node.origin {
            Some(origin) => self.index_of(origin).map_or(self.nodes.len(), |i| i + 1),
            None => 0,
        };
        let key = node.order_key();
        while index < self.nodes.len() && self.nodes[index].order_key() > key {
            index += 1;
        }
        self.known.insert(node.id.clone(), node.logical_time);
        if !node.deleted {
            self.visible += 1;
        }
        self.nodes.insert(index, node);
        index
    }

    /// Append a node without ordering checks. Used when rebuilding from an
    /// exported node list that is already in document order.
    pub fn push_ordered(&mut self, node: NodeRecord) {
        self.known.insert(node.id.clone(), node.logical_time);
        if !node.deleted {
            self.visible += 1;
        }
        self.nodes.push(node);
    }

    /// Mark a node deleted. Returns `None` when the node is unknown and
    /// `Some(false)` when it was already a tombstone.
    pub fn tombstone(&mut self, id: &NodeId) -> Option<bool> {
        let index = self.index_of(id)?;
        let node = &mut self.nodes[index];
        if node.deleted {
            return Some(false);
        }
        node.deleted = true;
        self.visible -= 1;
        Some(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    /// Concatenation of visible values.
    pub fn text(&self) -> String {
        self.nodes
            .iter()
            .filter(|n| !n.deleted)
            .map(|n| n.value)
            .collect()
    }
}
