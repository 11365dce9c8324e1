//! Fan-out to the other connections of a session.
//!
//! Each peer owns a bounded outbound queue drained by its connection task.
//! Sending never blocks: a peer whose queue is full or closed is removed
//! from the group and kicked, and delivery to everyone else continues.
//!
//! ```text
//!                    ┌──► [queue A] ──► conn task A ──► socket A
//! broadcast_except ──┼──► [queue B] ──► conn task B ──► socket B
//!   (try_send)       └──► [queue C] ✗ full → removed, C.kick.notify_one()
//! ```
//!
//! Broadcasting is synchronous so it can run while the session's engine
//! lock is held; peers therefore see batches in the order they were
//! applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, Notify};

use crate::presence::OnlineUser;
use crate::protocol::{ConnectionId, ProtocolError, ServerMessage};

/// A pre-encoded JSON frame shared by every recipient.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub peers_evicted: u64,
    pub active_peers: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    peers_evicted: AtomicU64,
}

/// The sending half of a peer, held by the group.
pub struct PeerHandle {
    pub connection_id: ConnectionId,
    pub user: OnlineUser,
    sender: mpsc::Sender<Outbound>,
    kick: Arc<Notify>,
}

/// The receiving half of a peer, held by its connection task.
pub struct PeerInbox {
    pub messages: mpsc::Receiver<Outbound>,
    /// Notified when the group drops this peer.
    pub kicked: Arc<Notify>,
}

impl PeerHandle {
    pub fn channel(
        connection_id: ConnectionId,
        user: OnlineUser,
        capacity: usize,
    ) -> (Self, PeerInbox) {
        let (sender, messages) = mpsc::channel(capacity.max(1));
        let kick = Arc::new(Notify::new());
        (
            Self {
                connection_id,
                user,
                sender,
                kick: kick.clone(),
            },
            PeerInbox {
                messages,
                kicked: kick,
            },
        )
    }
}

/// The connections of one session.
pub struct BroadcastGroup {
    peers: RwLock<HashMap<ConnectionId, PeerHandle>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn add_peer(&self, peer: PeerHandle) {
        self.write().insert(peer.connection_id, peer);
    }

    pub fn remove_peer(&self, connection_id: &ConnectionId) -> Option<OnlineUser> {
        self.write().remove(connection_id).map(|p| p.user)
    }

    /// Encode once and deliver to every peer except `exclude`.
    pub fn broadcast(
        &self,
        msg: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) -> Result<usize, ProtocolError> {
        Ok(self.broadcast_except(msg.to_shared()?, exclude))
    }

    /// Deliver a pre-encoded frame. Returns how many peers accepted it.
    pub fn broadcast_except(&self, frame: Outbound, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let peers = self.read();
            for (id, peer) in peers.iter() {
                if Some(*id) == exclude {
                    continue;
                }
                match peer.sender.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        log::warn!(
                            "Dropping peer {id} ({}): {}",
                            peer.user.username,
                            match e {
                                mpsc::error::TrySendError::Full(_) => "outbound queue full",
                                mpsc::error::TrySendError::Closed(_) => "connection gone",
                            }
                        );
                        failed.push(*id);
                    }
                }
            }
        }

        self.atomic_stats
            .messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        if !failed.is_empty() {
            self.atomic_stats
                .messages_dropped
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
            self.evict(&failed);
        }
        delivered
    }

    fn evict(&self, ids: &[ConnectionId]) {
        let mut peers = self.write();
        for id in ids {
            if let Some(peer) = peers.remove(id) {
                peer.kick.notify_one();
                self.atomic_stats
                    .peers_evicted
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn peer_count(&self) -> usize {
        self.read().len()
    }

    pub fn has_peer(&self, connection_id: &ConnectionId) -> bool {
        self.read().contains_key(connection_id)
    }

    pub fn peers(&self) -> Vec<OnlineUser> {
        self.read().values().map(|p| p.user.clone()).collect()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            peers_evicted: self.atomic_stats.peers_evicted.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    /// Outbound queue capacity per peer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnectionId, PeerHandle>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnectionId, PeerHandle>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
