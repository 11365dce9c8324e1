//! Buffer for operations whose dependency has not arrived yet.
//!
//! A delete can overtake the insert it targets, and an insert can overtake
//! its origin. Such operations wait here keyed by the missing node and are
//! released as soon as that node is integrated. Entries that wait longer
//! than the configured window, or overflow the capacity, are dropped.

use std::time::{Duration, Instant};

use crate::id::NodeId;
use crate::op::Operation;

#[derive(Debug, Clone)]
pub struct PendingOp {
    pub op: Operation,
    pub missing: NodeId,
    pub received_at: Instant,
}

#[derive(Debug, Clone)]
pub struct PendingBuffer {
    entries: Vec<PendingOp>,
    capacity: usize,
}

impl PendingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, op: &Operation) -> bool {
        self.entries.iter().any(|p| &p.op == op)
    }

    /// Park an operation. Returns the oldest entry when the buffer overflows.
    pub fn push(&mut self, op: Operation, missing: NodeId, now: Instant) -> Option<PendingOp> {
        if self.contains(&op) {
            return None;
        }
        self.entries.push(PendingOp {
            op,
            missing,
            received_at: now,
        });
        if self.entries.len() > self.capacity {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }

    /// Remove and return every operation waiting on `id`, oldest first.
    pub fn take_ready(&mut self, id: &NodeId) -> Vec<Operation> {
        if !self.entries.iter().any(|p| &p.missing == id) {
            return Vec::new();
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|p| &p.missing == id);
        self.entries = waiting;
        ready.into_iter().map(|p| p.op).collect()
    }

    /// Drop entries older than `ttl`.
    pub fn prune(&mut self, now: Instant, ttl: Duration) -> Vec<PendingOp> {
        let (expired, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|p| now.saturating_duration_since(p.received_at) >= ttl);
        self.entries = alive;
        expired
    }
}
