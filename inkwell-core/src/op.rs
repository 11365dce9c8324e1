//! Node-level operations exchanged between replicas.

use serde::{Deserialize, Serialize};

use crate::id::{ActorId, LogicalTime, NodeId};

/// A replicated edit, idempotent at node-id level.
///
/// `position_hint` is the visible index at which the edit was made on the
/// minting replica. It is advisory: integration never reads it, but a
/// replica that cannot resolve the node references (for example after the
/// server re-seeded the document) may fall back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Insert {
        id: NodeId,
        /// Node the new character was typed after. `None` is the head.
        #[serde(default)]
        origin: Option<NodeId>,
        value: char,
        logical_time: LogicalTime,
        #[serde(default)]
        position_hint: usize,
    },
    Delete {
        target: NodeId,
        actor: ActorId,
        logical_time: LogicalTime,
        #[serde(default)]
        position_hint: usize,
    },
}

impl Operation {
    pub fn actor(&self) -> &ActorId {
        match self {
            Operation::Insert { id, .. } => &id.actor,
            Operation::Delete { actor, .. } => actor,
        }
    }

    pub fn logical_time(&self) -> LogicalTime {
        match self {
            Operation::Insert { logical_time, .. } | Operation::Delete { logical_time, .. } => {
                *logical_time
            }
        }
    }

    pub fn position_hint(&self) -> usize {
        match self {
            Operation::Insert { position_hint, .. } | Operation::Delete { position_hint, .. } => {
                *position_hint
            }
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insert { .. })
    }
}

/// One node of the sequence as exported for late joiners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    #[serde(default)]
    pub origin: Option<NodeId>,
    pub value: char,
    pub logical_time: LogicalTime,
    #[serde(default)]
    pub deleted: bool,
}

impl NodeRecord {
    /// Sibling order key. Larger keys sit closer to the shared origin.
    pub(crate) fn order_key(&self) -> (LogicalTime, &ActorId, u64) {
        (self.logical_time, &self.id.actor, self.id.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_wire_shape() {
        let op = Operation::Insert {
            id: NodeId::new("user_1", 1),
            origin: None,
            value: 'a',
            logical_time: 4,
            position_hint: 0,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "insert");
        assert_eq!(json["value"], "a");
        assert!(json["origin"].is_null());
    }

    #[test]
    fn test_delete_parses_without_hint() {
        let json = r#"{"type":"delete","target":{"actor":"origin","seq":2},"actor":"user_3","logical_time":9}"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert!(matches!(&op, Operation::Delete { target, .. } if *target == NodeId::new("origin", 2)));
        assert_eq!(op.position_hint(), 0);
        assert!(!op.is_insert());
    }
}
