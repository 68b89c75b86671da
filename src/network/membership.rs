use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Change to the room's mesh membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(String),
    Left(String),
}

/// Remote peers currently in the room, shared between the swarm task (writer)
/// and the mesh handle (reader).
///
/// A peer is a member once gossipsub reports it subscribed to the room topic.
/// It stops being one when it unsubscribes or its last connection closes,
/// whichever comes first; the second signal is then a no-op.
#[derive(Debug, Clone, Default)]
pub struct RoomMembership {
    peers: Arc<Mutex<HashSet<String>>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_subscribed(&self, peer_id: &str) -> Option<MembershipChange> {
        self.lock()
            .insert(peer_id.to_string())
            .then(|| MembershipChange::Joined(peer_id.to_string()))
    }

    pub fn on_unsubscribed(&self, peer_id: &str) -> Option<MembershipChange> {
        self.remove(peer_id)
    }

    /// `remaining` is the number of connections still open to the peer.
    pub fn on_connection_closed(&self, peer_id: &str, remaining: u32) -> Option<MembershipChange> {
        if remaining > 0 {
            return None;
        }
        self.remove(peer_id)
    }

    /// Forget everyone; returns the peers that were members.
    pub fn clear(&self) -> Vec<String> {
        self.lock().drain().collect()
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, peer_id: &str) -> Option<MembershipChange> {
        self.lock()
            .remove(peer_id)
            .then(|| MembershipChange::Left(peer_id.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
