//! Replica and node identifiers.
//!
//! Every character ever inserted gets a [`NodeId`] made of the minting
//! actor and that actor's sequence counter. Ids are never reused, so a
//! node id names the same character on every replica forever.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lamport timestamp.
pub type LogicalTime = u64;

/// Name of the replica that minted a node.
///
/// Connection-scoped actors look like `user_7.3f9a1c02`; the prefix ties the
/// actor to the user that owns it. The synthetic actor `origin` owns the
/// nodes seeded from persisted text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Actor that owns seeded text.
    pub const ORIGIN: &'static str = "origin";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn origin() -> Self {
        Self(Self::ORIGIN.to_string())
    }

    /// Actor for one connection of a user. `tag` keeps two tabs of the same
    /// user from minting colliding ids.
    pub fn for_connection(user_id: u64, tag: &str) -> Self {
        Self(format!("user_{user_id}.{tag}"))
    }

    /// The user id encoded in the actor name, if any.
    pub fn owner(&self) -> Option<u64> {
        let rest = self.0.strip_prefix("user_")?;
        let digits = rest.split('.').next()?;
        digits.parse().ok()
    }

    pub fn is_origin(&self) -> bool {
        self.0 == Self::ORIGIN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identity of one character node: `(actor, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub actor: ActorId,
    pub seq: u64,
}

impl NodeId {
    pub fn new(actor: impl Into<ActorId>, seq: u64) -> Self {
        Self {
            actor: actor.into(),
            seq,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.seq)
    }
}
