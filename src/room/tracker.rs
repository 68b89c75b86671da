use std::collections::HashSet;

use crate::transport::Transport;

/// Recomputes the room's peer count from transport membership.
///
/// The count is the size of the union of every membership-reporting
/// transport's peer set. It is recomputed on every join/leave and reported
/// even when unchanged; deciding whether that is worth showing is up to the
/// caller.
#[derive(Debug, Default)]
pub struct PeerTracker {
    last: usize,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recompute<'a, I>(&mut self, transports: I) -> usize
    where
        I: IntoIterator<Item = &'a Box<dyn Transport>>,
    {
        let mut peers = HashSet::new();
        for transport in transports {
            if let Some(ids) = transport.current_peer_ids() {
                peers.extend(ids);
            }
        }
        self.last = peers.len();
        self.last
    }

    /// Count as of the last recompute.
    pub fn last(&self) -> usize {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::common::{MessagePayload, TransportKind};
    use crate::transport::NoopTransport;

    struct FixedPeers(Arc<Mutex<HashSet<String>>>);

    impl Transport for FixedPeers {
        fn kind(&self) -> TransportKind {
            TransportKind::Mesh
        }

        fn send(&self, _payload: &MessagePayload) {}

        fn current_peer_ids(&self) -> Option<HashSet<String>> {
            Some(self.0.lock().unwrap().clone())
        }

        fn close(&self) {}
    }

    #[test]
    fn count_follows_membership() {
        let peers = Arc::new(Mutex::new(HashSet::new()));
        let transports: Vec<Box<dyn Transport>> = vec![
            Box::new(NoopTransport::new(TransportKind::Local)),
            Box::new(FixedPeers(peers.clone())),
        ];
        let mut tracker = PeerTracker::new();
        assert_eq!(tracker.recompute(&transports), 0);

        peers.lock().unwrap().insert("x".to_string());
        peers.lock().unwrap().insert("y".to_string());
        assert_eq!(tracker.recompute(&transports), 2);

        peers.lock().unwrap().remove("x");
        assert_eq!(tracker.recompute(&transports), 1);
        assert_eq!(tracker.last(), 1);
    }

    #[test]
    fn same_peer_on_two_transports_counts_once() {
        let shared: HashSet<String> = ["x".to_string()].into_iter().collect();
        let transports: Vec<Box<dyn Transport>> = vec![
            Box::new(FixedPeers(Arc::new(Mutex::new(shared.clone())))),
            Box::new(FixedPeers(Arc::new(Mutex::new(shared)))),
        ];
        assert_eq!(PeerTracker::new().recompute(&transports), 1);
    }
}
