//! # inkwell-core — Text CRDT for collaborative editing
//!
//! A Replicated Growable Array over characters. Replicas that integrate
//! the same set of operations, in any order, materialize the same text.
//!
//! ## Architecture
//!
//! ```text
//!   local edit (position)        remote Operation (node ids)
//!          │                              │
//!          ▼                              ▼
//! ┌──────────────────────────────────────────────────┐
//! │ DocumentEngine                                   │
//! │   Lamport clock · actor seqs · version counter   │
//! │   ┌───────────┐        ┌──────────────────┐      │
//! │   │ Rga       │ ◄───── │ PendingBuffer    │      │
//! │   │ (nodes +  │ release│ (missing deps)   │      │
//! │   │ tombstones)│       └──────────────────┘      │
//! │   └─────┬─────┘                                  │
//! └─────────┼────────────────────────────────────────┘
//!           ├──► materialize() ─► String (cached per version)
//!           └──► to_delta(ops)  ─► Delta (retain/insert/delete)
//! ```
//!
//! ## Modules
//!
//! - [`id`] — actor and node identifiers
//! - [`op`] — wire-level operations and exported node records
//! - [`rga`] — the ordered node sequence and its integration rule
//! - [`pending`] — operations waiting on a missing node
//! - [`engine`] — the per-document engine
//! - [`delta`] — position-based patches
//! - [`diff`] — snapshot-to-splice reconciliation

pub mod delta;
pub mod diff;
pub mod engine;
pub mod id;
pub mod op;
pub mod pending;
pub mod rga;

pub use delta::{Delta, DeltaError, DeltaOp};
pub use engine::{BatchOutcome, DocumentEngine, EngineConfig, EngineError, EngineStats};
pub use id::{ActorId, LogicalTime, NodeId};
pub use op::{NodeRecord, Operation};
