//! Per-document CRDT engine.
//!
//! [`DocumentEngine`] owns the [`Rga`] sequence, a Lamport clock, per-actor
//! sequence counters and the pending buffer. Local edits are minted from
//! visible positions; remote operations are integrated by node id.
//!
//! Every applied operation bumps the version counter. The version starts at
//! the value the document was loaded with, so it stays monotonic across
//! engine lifetimes. The version the engine was created at is its *epoch*:
//! two engines seeded at the same epoch share node ids.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::delta::Delta;
use crate::diff;
use crate::id::{ActorId, LogicalTime, NodeId};
use crate::op::{NodeRecord, Operation};
use crate::pending::PendingBuffer;
use crate::rga::Rga;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an operation may wait for its dependency.
    pub pending_ttl: Duration,
    /// Maximum number of waiting operations per document.
    pub pending_capacity: usize,
    /// How far a remote logical time may run ahead of the local clock.
    pub max_clock_skew: LogicalTime,
    /// How far a remote sequence number may run ahead of the last one seen
    /// from the same actor.
    pub max_seq_gap: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(30),
            pending_capacity: 10_000,
            max_clock_skew: 1 << 32,
            max_seq_gap: 1 << 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("position {position} is out of range for length {len}")]
    PositionOutOfRange { position: usize, len: usize },
    #[error("insert {id} is not newer than its origin")]
    CausalityViolation { id: NodeId },
    #[error("insert {id} uses logical time 0")]
    ZeroLogicalTime { id: NodeId },
    #[error("operation by {actor} at logical time {logical_time} is too far ahead")]
    LogicalTimeOutOfRange {
        actor: ActorId,
        logical_time: LogicalTime,
    },
    #[error("insert {id} skips too far ahead of its actor's sequence")]
    SeqOutOfRange { id: NodeId },
    #[error("logical clock exhausted")]
    ClockExhausted,
    #[error("invalid node list: {0}")]
    InvalidSnapshot(String),
}

/// Result of integrating a batch of remote operations.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Every operation that changed the sequence, including buffered ones
    /// released by this batch, in application order.
    pub applied: Vec<Operation>,
    pub duplicates: usize,
    pub buffered: usize,
    pub rejected: Vec<(Operation, EngineError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub nodes: usize,
    pub tombstones: usize,
    pub pending: usize,
    pub version: u64,
    pub logical_time: LogicalTime,
}

enum Step {
    Applied,
    Duplicate,
    Missing(NodeId),
    Rejected(EngineError),
}

pub struct DocumentEngine {
    rga: Rga,
    pending: PendingBuffer,
    clock: LogicalTime,
    actor_seqs: HashMap<ActorId, u64>,
    version: u64,
    epoch: u64,
    config: EngineConfig,
    text_cache: OnceCell<String>,
}

impl DocumentEngine {
    /// Empty document at version 0.
    pub fn new(config: EngineConfig) -> Self {
        Self::from_text("", 0, config)
    }

    /// Seed a document from persisted text as one chain of `origin` nodes.
    ///
    /// Node `i` gets logical time `i + 1`, so every replica seeding the same
    /// text at the same version derives identical ids.
    pub fn from_text(text: &str, version: u64, config: EngineConfig) -> Self {
        let mut engine = Self::empty(version, config);
        let actor = ActorId::origin();
        let mut origin = None;
        for (i, value) in text.chars().enumerate() {
            let seq = i as u64 + 1;
            let id = NodeId::new(actor.clone(), seq);
            engine.rga.push_ordered(NodeRecord {
                id: id.clone(),
                origin: origin.take(),
                value,
                logical_time: seq,
                deleted: false,
            });
            origin = Some(id);
            engine.clock = seq;
        }
        if engine.clock > 0 {
            engine.actor_seqs.insert(actor, engine.clock);
        }
        engine
    }

    /// Rebuild from a node list exported by [`DocumentEngine::snapshot`].
    pub fn from_snapshot(
        nodes: Vec<NodeRecord>,
        version: u64,
        epoch: u64,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::empty(version, config);
        engine.epoch = epoch;
        for node in nodes {
            if engine.rga.contains(&node.id) {
                return Err(EngineError::InvalidSnapshot(format!("duplicate node {}", node.id)));
            }
            if let Some(origin) = &node.origin {
                if !engine.rga.contains(origin) {
                    return Err(EngineError::InvalidSnapshot(format!(
                        "node {} precedes its origin {origin}",
                        node.id
                    )));
                }
            }
            engine.observe(&node.id, node.logical_time);
            engine.rga.push_ordered(node);
        }
        Ok(engine)
    }

    fn empty(version: u64, config: EngineConfig) -> Self {
        Self {
            rga: Rga::new(),
            pending: PendingBuffer::new(config.pending_capacity),
            clock: 0,
            actor_seqs: HashMap::new(),
            version,
            epoch: version,
            config,
            text_cache: OnceCell::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.rga.visible_len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.visible_len() == 0
    }

    pub fn logical_time(&self) -> LogicalTime {
        self.clock
    }

    /// Current text. Cached until the next mutation.
    pub fn materialize(&self) -> &str {
        self.text_cache.get_or_init(|| self.rga.text())
    }

    /// Full node list in document order, tombstones included.
    pub fn snapshot(&self) -> Vec<NodeRecord> {
        self.rga.iter().cloned().collect()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            nodes: self.rga.len(),
            tombstones: self.rga.tombstones(),
            pending: self.pending.len(),
            version: self.version,
            logical_time: self.clock,
        }
    }

    /// Whether the engine holds the node, deleted or not.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.rga.contains(id)
    }

    // ─── Local edits ──────────────────────────────────────────────────

    /// Insert `value` so that it becomes the visible character at `position`.
    pub fn apply_insert(
        &mut self,
        actor: &ActorId,
        position: usize,
        value: char,
    ) -> Result<Operation, EngineError> {
        let len = self.rga.visible_len();
        if position > len {
            return Err(EngineError::PositionOutOfRange { position, len });
        }
        let origin = match position {
            0 => None,
            p => self.rga.visible_id_at(p - 1).cloned(),
        };

        let seq = self
            .actor_seqs
            .get(actor)
            .copied()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or(EngineError::ClockExhausted)?;
        let id = NodeId::new(actor.clone(), seq);
        let logical_time = self.tick()?;
        self.actor_seqs.insert(actor.clone(), seq);

        self.rga.integrate(NodeRecord {
            id: id.clone(),
            origin: origin.clone(),
            value,
            logical_time,
            deleted: false,
        });
        self.bump();

        Ok(Operation::Insert {
            id,
            origin,
            value,
            logical_time,
            position_hint: position,
        })
    }

    /// Tombstone the visible character at `position`.
    pub fn apply_delete(
        &mut self,
        actor: &ActorId,
        position: usize,
    ) -> Result<Operation, EngineError> {
        let len = self.rga.visible_len();
        let target = self
            .rga
            .visible_id_at(position)
            .cloned()
            .ok_or(EngineError::PositionOutOfRange { position, len })?;

        let logical_time = self.tick()?;
        self.rga.tombstone(&target);
        self.bump();

        Ok(Operation::Delete {
            target,
            actor: actor.clone(),
            logical_time,
            position_hint: position,
        })
    }

    pub fn insert_text(
        &mut self,
        actor: &ActorId,
        position: usize,
        text: &str,
    ) -> Result<Vec<Operation>, EngineError> {
        let len = self.rga.visible_len();
        if position > len {
            return Err(EngineError::PositionOutOfRange { position, len });
        }
        text.chars()
            .enumerate()
            .map(|(i, c)| self.apply_insert(actor, position + i, c))
            .collect()
    }

    pub fn delete_range(
        &mut self,
        actor: &ActorId,
        position: usize,
        count: usize,
    ) -> Result<Vec<Operation>, EngineError> {
        let len = self.rga.visible_len();
        if position.checked_add(count).is_none_or(|end| end > len) {
            return Err(EngineError::PositionOutOfRange {
                position: position.saturating_add(count),
                len,
            });
        }
        (0..count).map(|_| self.apply_delete(actor, position)).collect()
    }

    /// Reconcile a full-content snapshot by replacing the differing region.
    pub fn replace_text(
        &mut self,
        actor: &ActorId,
        text: &str,
    ) -> Result<Vec<Operation>, EngineError> {
        let Some(splice) = diff::splice(self.materialize(), text) else {
            return Ok(Vec::new());
        };
        let mut ops = self.delete_range(actor, splice.start, splice.removed)?;
        ops.extend(self.insert_text(actor, splice.start, &splice.inserted)?);
        Ok(ops)
    }

    // ─── Remote operations ────────────────────────────────────────────

    /// Integrate one remote operation. Returns whether it changed the
    /// sequence now; a buffered or duplicate operation returns `false`.
    pub fn apply_remote_op(&mut self, op: Operation) -> Result<bool, EngineError> {
        let mut outcome = BatchOutcome::default();
        let first = self.integrate_remote(op, Instant::now(), &mut outcome);
        match first {
            Step::Applied => Ok(true),
            Step::Duplicate | Step::Missing(_) => Ok(false),
            Step::Rejected(e) => Err(e),
        }
    }

    /// Integrate a batch, collecting everything that was applied.
    pub fn apply_remote_batch(&mut self, ops: impl IntoIterator<Item = Operation>) -> BatchOutcome {
        let now = Instant::now();
        let mut outcome = BatchOutcome::default();
        for op in ops {
            self.integrate_remote(op, now, &mut outcome);
        }
        outcome
    }

    fn integrate_remote(&mut self, op: Operation, now: Instant, outcome: &mut BatchOutcome) -> Step {
        let mut first = None;
        let mut work = vec![op];
        while let Some(op) = work.pop() {
            let step = self.try_apply(&op);
            match &step {
                Step::Applied => {
                    if let Operation::Insert { id, .. } = &op {
                        let mut released = self.pending.take_ready(id);
                        released.reverse();
                        work.extend(released);
                    }
                    outcome.applied.push(op);
                }
                Step::Duplicate => outcome.duplicates += 1,
                Step::Missing(dep) => {
                    log::debug!("buffering operation waiting on {dep}");
                    outcome.buffered += 1;
                    if let Some(dropped) = self.pending.push(op, dep.clone(), now) {
                        log::warn!(
                            "pending buffer full, dropping operation waiting on {}",
                            dropped.missing
                        );
                    }
                }
                Step::Rejected(e) => {
                    log::warn!("rejecting remote operation: {e}");
                    outcome.rejected.push((op, e.clone()));
                }
            }
            if first.is_none() {
                first = Some(step);
            }
        }
        first.unwrap_or(Step::Duplicate)
    }

    fn try_apply(&mut self, op: &Operation) -> Step {
        match op {
            Operation::Insert {
                id,
                origin,
                value,
                logical_time,
                ..
            } => {
                if self.rga.contains(id) {
                    return Step::Duplicate;
                }
                if *logical_time == 0 {
                    return Step::Rejected(EngineError::ZeroLogicalTime { id: id.clone() });
                }
                if let Err(e) = self.check_bounds(&id.actor, *logical_time) {
                    return Step::Rejected(e);
                }
                let known_seq = self.actor_seqs.get(&id.actor).copied().unwrap_or(0);
                if id.seq > known_seq.saturating_add(self.config.max_seq_gap) {
                    return Step::Rejected(EngineError::SeqOutOfRange { id: id.clone() });
                }
                if let Some(origin) = origin {
                    match self.rga.logical_time_of(origin) {
                        None => return Step::Missing(origin.clone()),
                        Some(origin_time) if origin_time >= *logical_time => {
                            return Step::Rejected(EngineError::CausalityViolation {
                                id: id.clone(),
                            });
                        }
                        Some(_) => {}
                    }
                }
                self.observe(id, *logical_time);
                self.rga.integrate(NodeRecord {
                    id: id.clone(),
                    origin: origin.clone(),
                    value: *value,
                    logical_time: *logical_time,
                    deleted: false,
                });
                self.bump();
                Step::Applied
            }
            Operation::Delete {
                target,
                actor,
                logical_time,
                ..
            } => {
                if let Err(e) = self.check_bounds(actor, *logical_time) {
                    return Step::Rejected(e);
                }
                match self.rga.tombstone(target) {
                    None => Step::Missing(target.clone()),
                    Some(false) => Step::Duplicate,
                    Some(true) => {
                        self.clock = self.clock.max(*logical_time);
                        self.bump();
                        Step::Applied
                    }
                }
            }
        }
    }

    /// Drop buffered operations that waited too long. Returns how many.
    pub fn prune_pending(&mut self, now: Instant) -> usize {
        let expired = self.pending.prune(now, self.config.pending_ttl);
        for entry in &expired {
            log::warn!(
                "dropping {} by {} after waiting {:?} for {}",
                if entry.op.is_insert() { "insert" } else { "delete" },
                entry.op.actor(),
                now.saturating_duration_since(entry.received_at),
                entry.missing
            );
        }
        expired.len()
    }

    /// Drop every tombstone by reseeding from the current text.
    ///
    /// Surviving characters get fresh `origin` ids and the epoch moves to
    /// the current version, exactly as if the text had been reloaded from
    /// storage. Only call this while no other replica holds ids minted by
    /// this engine. Buffered operations are discarded. Returns how many
    /// tombstones were removed.
    pub fn compact(&mut self) -> usize {
        let removed = self.rga.tombstones();
        if removed == 0 {
            return 0;
        }
        if !self.pending.is_empty() {
            log::debug!("compaction discards {} buffered operations", self.pending.len());
        }
        let text = self.materialize().to_string();
        *self = Self::from_text(&text, self.version, self.config.clone());
        removed
    }

    // ─── Deltas ───────────────────────────────────────────────────────

    /// Patch that turns the text before `ops` were applied into the current
    /// text. `ops` must be exactly the operations applied since then.
    pub fn to_delta(&self, ops: &[Operation]) -> Delta {
        let mut inserted = HashSet::new();
        let mut deleted = HashSet::new();
        for op in ops {
            match op {
                Operation::Insert { id, .. } => inserted.insert(id),
                Operation::Delete { target, .. } => deleted.insert(target),
            };
        }

        let mut delta = Delta::new();
        let mut buf = [0u8; 4];
        for node in self.rga.iter() {
            let visible_before =
                !inserted.contains(&node.id) && (!node.deleted || deleted.contains(&node.id));
            let visible_after = !node.deleted;
            match (visible_before, visible_after) {
                (true, true) => {
                    delta.retain(1);
                }
                (false, true) => {
                    delta.insert(node.value.encode_utf8(&mut buf));
                }
                (true, false) => {
                    delta.delete(1);
                }
                (false, false) => {}
            }
        }
        delta.chop();
        delta
    }

    // ─── Clock ────────────────────────────────────────────────────────

    fn tick(&mut self) -> Result<LogicalTime, EngineError> {
        self.clock = self.clock.checked_add(1).ok_or(EngineError::ClockExhausted)?;
        Ok(self.clock)
    }

    fn check_bounds(&self, actor: &ActorId, logical_time: LogicalTime) -> Result<(), EngineError> {
        if logical_time > self.clock.saturating_add(self.config.max_clock_skew) {
            return Err(EngineError::LogicalTimeOutOfRange {
                actor: actor.clone(),
                logical_time,
            });
        }
        Ok(())
    }

    fn observe(&mut self, id: &NodeId, logical_time: LogicalTime) {
        self.clock = self.clock.max(logical_time);
        let seq = self.actor_seqs.entry(id.actor.clone()).or_insert(0);
        *seq = (*seq).max(id.seq);
    }

    fn bump(&mut self) {
        self.version += 1;
        self.text_cache.take();
    }
}

impl Default for DocumentEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(name: &str) -> ActorId {
        ActorId::new(name)
    }

    fn engine(text: &str) -> DocumentEngine {
        DocumentEngine::from_text(text, 0, EngineConfig::default())
    }

    #[test]
    fn test_seeded_text_materializes() {
        let e = engine("hello");
        assert_eq!(e.materialize(), "hello");
        assert_eq!(e.len(), 5);
        assert_eq!(e.version(), 0);
        assert_eq!(e.logical_time(), 5);
    }

    #[test]
    fn test_seeding_is_deterministic() {
        assert_eq!(engine("abc").snapshot(), engine("abc").snapshot());
    }

    #[test]
    fn test_insert_at_head_of_empty_document() {
        let mut e = DocumentEngine::default();
        let op = e.apply_insert(&actor("a"), 0, 'x').unwrap();
        match op {
            Operation::Insert { origin, .. } => assert!(origin.is_none()),
            _ => panic!("expected insert"),
        }
        assert_eq!(e.materialize(), "x");
        assert_eq!(e.version(), 1);
    }

    #[test]
    fn test_out_of_range() {
        let mut e = engine("ab");
        assert_eq!(
            e.apply_insert(&actor("a"), 3, 'x'),
            Err(EngineError::PositionOutOfRange { position: 3, len: 2 })
        );
        assert!(e.apply_delete(&actor("a"), 2).is_err());
        assert!(e.delete_range(&actor("a"), 1, 2).is_err());
        assert_eq!(
            e.delete_range(&actor("a"), 1, usize::MAX),
            Err(EngineError::PositionOutOfRange {
                position: usize::MAX,
                len: 2
            })
        );
        assert_eq!(e.version(), 0);
    }

    #[test]
    fn test_remote_insert_is_idempotent() {
        let mut a = engine("ab");
        let mut b = engine("ab");
        let op = a.apply_insert(&actor("a"), 1, 'X').unwrap();
        assert!(b.apply_remote_op(op.clone()).unwrap());
        assert!(!b.apply_remote_op(op).unwrap());
        assert_eq!(b.materialize(), "aXb");
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn test_sequential_edits_converge() {
        let mut server = engine("");
        let mut c1 = engine("");
        let mut c2 = engine("");

        let hello = c1.insert_text(&actor("user_1"), 0, "Hello").unwrap();
        server.apply_remote_batch(hello.clone());
        c2.apply_remote_batch(hello);

        let world = c2.insert_text(&actor("user_2"), 5, " World").unwrap();
        server.apply_remote_batch(world.clone());
        c1.apply_remote_batch(world);

        assert_eq!(server.materialize(), "Hello World");
        assert_eq!(c1.materialize(), "Hello World");
        assert_eq!(c2.materialize(), "Hello World");
    }

    #[test]
    fn test_concurrent_inserts_at_head_converge() {
        let mut a = engine("");
        let mut b = engine("");

        let hello = a.insert_text(&actor("user_1.aaaa"), 0, "Hello").unwrap();
        let world = b.insert_text(&actor("user_2.bbbb"), 0, "World").unwrap();
        a.apply_remote_batch(world);
        b.apply_remote_batch(hello);

        assert_eq!(a.materialize(), b.materialize());
        assert_eq!(a.len(), 10);
        // Equal logical times: the larger actor sits first, each run intact.
        assert_eq!(a.materialize(), "WorldHello");
    }

    #[test]
    fn test_delete_end_while_appending() {
        let mut a = engine("abc");
        let mut b = engine("abc");

        let del = a.apply_delete(&actor("user_1.aaaa"), 2).unwrap();
        let ins = b.apply_insert(&actor("user_2.bbbb"), 3, 'X').unwrap();
        assert!(a.apply_remote_op(ins).unwrap());
        assert!(b.apply_remote_op(del).unwrap());

        assert_eq!(a.materialize(), "abX");
        assert_eq!(b.materialize(), "abX");
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_delete_and_insert_in_middle_converge() {
        let mut server = engine("abc");
        let mut c1 = engine("abc");
        let mut c2 = engine("abc");

        let del = c1.apply_delete(&actor("user_1"), 1).unwrap();
        let ins = c2.apply_insert(&actor("user_2"), 2, 'X').unwrap();

        server.apply_remote_op(ins.clone()).unwrap();
        server.apply_remote_op(del.clone()).unwrap();
        c1.apply_remote_op(ins).unwrap();
        c2.apply_remote_op(del).unwrap();

        assert_eq!(server.materialize(), "aXc");
        assert_eq!(c1.materialize(), "aXc");
        assert_eq!(c2.materialize(), "aXc");
    }

    #[test]
    fn test_delete_before_insert_is_buffered() {
        let mut source = engine("");
        let ins = source.apply_insert(&actor("a"), 0, 'q').unwrap();
        let del = source.apply_delete(&actor("a"), 0).unwrap();

        let mut target = engine("");
        assert!(!target.apply_remote_op(del).unwrap());
        assert_eq!(target.stats().pending, 1);

        let outcome = target.apply_remote_batch([ins]);
        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(target.materialize(), "");
        assert_eq!(target.stats().pending, 0);
        assert_eq!(target.stats().tombstones, 1);
    }

    #[test]
    fn test_insert_before_origin_is_buffered() {
        let mut source = engine("");
        let ops = source.insert_text(&actor("a"), 0, "xyz").unwrap();

        let mut target = engine("");
        let outcome = target.apply_remote_batch(ops.into_iter().rev());
        assert_eq!(outcome.buffered, 2);
        assert_eq!(outcome.applied.len(), 3);
        assert_eq!(target.materialize(), "xyz");
    }

    #[test]
    fn test_causality_violation_is_rejected() {
        let mut e = engine("ab");
        let op = Operation::Insert {
            id: NodeId::new("evil", 1),
            origin: Some(NodeId::new("origin", 2)),
            value: '!',
            logical_time: 2,
            position_hint: 2,
        };
        assert_eq!(
            e.apply_remote_op(op),
            Err(EngineError::CausalityViolation {
                id: NodeId::new("evil", 1)
            })
        );
        assert_eq!(e.materialize(), "ab");
    }

    #[test]
    fn test_runaway_logical_time_rejected() {
        let mut e = engine("ab");
        let op = Operation::Insert {
            id: NodeId::new("user_1.aaaa", 1),
            origin: None,
            value: '!',
            logical_time: u64::MAX,
            position_hint: 0,
        };
        assert!(matches!(
            e.apply_remote_op(op),
            Err(EngineError::LogicalTimeOutOfRange { .. })
        ));
        let del = Operation::Delete {
            target: NodeId::new("origin", 1),
            actor: actor("user_1.aaaa"),
            logical_time: u64::MAX,
            position_hint: 0,
        };
        assert!(matches!(
            e.apply_remote_op(del),
            Err(EngineError::LogicalTimeOutOfRange { .. })
        ));
        assert_eq!(e.logical_time(), 2);

        e.apply_insert(&actor("user_1.aaaa"), 0, '>').unwrap();
        assert_eq!(e.materialize(), ">ab");
        assert_eq!(e.logical_time(), 3);
    }

    #[test]
    fn test_runaway_seq_rejected() {
        let mut e = engine("ab");
        let op = Operation::Insert {
            id: NodeId::new("user_1.aaaa", u64::MAX),
            origin: None,
            value: '!',
            logical_time: 3,
            position_hint: 0,
        };
        assert!(matches!(
            e.apply_remote_op(op),
            Err(EngineError::SeqOutOfRange { .. })
        ));

        let local = e.apply_insert(&actor("user_1.aaaa"), 2, 'c').unwrap();
        assert!(matches!(local, Operation::Insert { ref id, .. } if id.seq == 1));
        assert_eq!(e.materialize(), "abc");
    }

    #[test]
    fn test_exhausted_clock_is_an_error() {
        let nodes = vec![NodeRecord {
            id: NodeId::new("origin", 1),
            origin: None,
            value: 'a',
            logical_time: u64::MAX,
            deleted: false,
        }];
        let mut e = DocumentEngine::from_snapshot(nodes, 1, 0, EngineConfig::default()).unwrap();
        assert_eq!(e.apply_insert(&actor("a"), 0, 'x'), Err(EngineError::ClockExhausted));
        assert_eq!(e.apply_delete(&actor("a"), 0), Err(EngineError::ClockExhausted));
        assert_eq!(e.materialize(), "a");
        assert_eq!(e.version(), 1);
    }

    #[test]
    fn test_compact_drops_tombstones_and_reseeds() {
        let mut e = engine("the quick brown fox");
        let a = actor("user_1.aaaa");
        e.replace_text(&a, "the fox").unwrap();
        e.insert_text(&a, 7, "es").unwrap();
        e.delete_range(&a, 0, 4).unwrap();
        assert_eq!(e.materialize(), "foxes");
        let before = e.stats();
        assert_eq!(before.tombstones, 16);

        assert_eq!(e.compact(), 16);
        let after = e.stats();
        assert_eq!(after.nodes, 5);
        assert_eq!(after.tombstones, 0);
        assert_eq!(after.version, before.version);
        assert_eq!(e.epoch(), before.version);
        assert_eq!(e.materialize(), "foxes");
        assert_eq!(e.compact(), 0);

        // Same ids as a reload of the flushed text at this version.
        let reloaded = DocumentEngine::from_text("foxes", e.version(), EngineConfig::default());
        assert_eq!(e.snapshot(), reloaded.snapshot());

        // Replicas seeded from the compacted list still converge.
        let mut replica = DocumentEngine::from_snapshot(
            e.snapshot(),
            e.version(),
            e.epoch(),
            EngineConfig::default(),
        )
        .unwrap();
        let theirs = replica.insert_text(&actor("user_2.bbbb"), 0, "two ").unwrap();
        let ours = e.delete_range(&a, 3, 2).unwrap();
        e.apply_remote_batch(theirs);
        replica.apply_remote_batch(ours);
        assert_eq!(e.materialize(), "two fox");
        assert_eq!(replica.materialize(), "two fox");
    }

    #[test]
    fn test_prune_drops_stale_pending() {
        let mut e = DocumentEngine::from_text(
            "",
            0,
            EngineConfig {
                pending_ttl: Duration::from_secs(30),
                pending_capacity: 16,
                ..EngineConfig::default()
            },
        );
        let orphan = Operation::Delete {
            target: NodeId::new("ghost", 1),
            actor: actor("a"),
            logical_time: 1,
            position_hint: 0,
        };
        e.apply_remote_op(orphan).unwrap();
        assert_eq!(e.prune_pending(Instant::now()), 0);
        assert_eq!(e.prune_pending(Instant::now() + Duration::from_secs(60)), 1);
        assert_eq!(e.stats().pending, 0);
    }

    #[test]
    fn test_tombstone_stays_addressable_for_late_insert() {
        let mut server = engine("ab");
        let mut c1 = engine("ab");
        let mut c2 = engine("ab");

        // c1 deletes "a" while c2 types after it.
        let del = c1.apply_delete(&actor("c1"), 0).unwrap();
        let ins = c2.apply_insert(&actor("c2"), 1, 'Z').unwrap();

        server.apply_remote_op(del.clone()).unwrap();
        assert!(server.apply_remote_op(ins.clone()).unwrap());
        c1.apply_remote_op(ins).unwrap();
        c2.apply_remote_op(del).unwrap();

        for e in [&server, &c1, &c2] {
            assert_eq!(e.materialize(), "Zb");
            assert_eq!(e.stats().tombstones, 1);
        }
    }

    #[test]
    fn test_replace_text() {
        let mut e = engine("Hello world");
        let ops = e.replace_text(&actor("a"), "Hello brave world").unwrap();
        assert_eq!(ops.len(), 6);
        assert_eq!(e.materialize(), "Hello brave world");
        assert!(e.replace_text(&actor("a"), "Hello brave world").unwrap().is_empty());
    }

    #[test]
    fn test_delta_for_local_batch() {
        let mut e = engine("Hello");
        let before = e.materialize().to_string();
        let mut ops = e.insert_text(&actor("a"), 5, " World").unwrap();
        ops.extend(e.delete_range(&actor("a"), 0, 1).unwrap());
        let delta = e.to_delta(&ops);
        assert_eq!(delta.apply(&before).unwrap(), e.materialize());
    }

    #[test]
    fn test_delta_skips_insert_deleted_in_same_batch() {
        let mut e = engine("ab");
        let mut ops = vec![e.apply_insert(&actor("a"), 1, 'X').unwrap()];
        ops.push(e.apply_delete(&actor("a"), 1).unwrap());
        assert!(e.to_delta(&ops).is_empty());
    }

    #[test]
    fn test_snapshot_round_trip_shares_ids() {
        let mut server = engine("abc");
        server.apply_delete(&actor("s"), 1).unwrap();
        server.apply_insert(&actor("s"), 1, 'X').unwrap();

        let mut replica = DocumentEngine::from_snapshot(
            server.snapshot(),
            server.version(),
            server.epoch(),
            EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(replica.materialize(), "aXc");
        assert_eq!(replica.version(), server.version());

        // The replica's next local op must not collide with server ids.
        let op = replica.apply_insert(&actor("s"), 0, '>').unwrap();
        assert!(server.apply_remote_op(op).unwrap());
        assert_eq!(server.materialize(), ">aXc");
    }

    #[test]
    fn test_from_snapshot_rejects_orphans() {
        let nodes = vec![NodeRecord {
            id: NodeId::new("a", 2),
            origin: Some(NodeId::new("a", 1)),
            value: 'x',
            logical_time: 2,
            deleted: false,
        }];
        assert!(matches!(
            DocumentEngine::from_snapshot(nodes, 0, 0, EngineConfig::default()),
            Err(EngineError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_materialize_cache_invalidated_by_mutation() {
        let mut e = engine("ab");
        assert_eq!(e.materialize(), "ab");
        e.apply_insert(&actor("a"), 2, 'c').unwrap();
        assert_eq!(e.materialize(), "abc");
    }
}
