use std::collections::HashSet;

use crate::common::{DisplayMessage, MessagePayload};

/// Collapses multi-transport redelivery into one logical message.
///
/// First delivery of an id wins; every later delivery of the same id is
/// dropped without a trace. Ids are kept for the whole session.
#[derive(Debug, Default)]
pub struct DedupRouter {
    seen: HashSet<String>,
}

impl DedupRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id we are about to send so its echoes are dropped.
    pub fn mark_sent(&mut self, id: &str) {
        self.seen.insert(id.to_string());
    }

    /// Returns the message to surface, or `None` for a duplicate.
    pub fn accept(&mut self, payload: MessagePayload) -> Option<DisplayMessage> {
        if self.seen.contains(&payload.id) {
            return None;
        }
        self.seen.insert(payload.id.clone());
        Some(DisplayMessage::from_peer(payload))
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::OriginKind;

    fn payload(id: &str, text: &str) -> MessagePayload {
        MessagePayload {
            id: id.to_string(),
            text: text.to_string(),
            sender_id: "px".to_string(),
            sender_name: "X".to_string(),
            timestamp: 2_000,
        }
    }

    #[test]
    fn first_delivery_wins() {
        let mut router = DedupRouter::new();

        let first = router.accept(payload("px-2000", "hello")).unwrap();
        assert_eq!(first.origin, OriginKind::Peer);
        assert_eq!(first.text, "hello");

        // Same id, different body: still a duplicate.
        assert!(router.accept(payload("px-2000", "hello again")).is_none());
        assert_eq!(router.seen_count(), 1);
    }

    #[test]
    fn repeated_delivery_surfaces_once() {
        let mut router = DedupRouter::new();
        let surfaced = (0..5)
            .filter_map(|_| router.accept(payload("m", "x")))
            .count();
        assert_eq!(surfaced, 1);
    }

    #[test]
    fn sent_ids_are_never_surfaced() {
        let mut router = DedupRouter::new();
        router.mark_sent("u1-1000");

        assert!(router.has_seen("u1-1000"));
        assert!(router.accept(payload("u1-1000", "hi")).is_none());
    }

    #[test]
    fn distinct_ids_all_pass() {
        let mut router = DedupRouter::new();
        assert!(router.accept(payload("a", "1")).is_some());
        assert!(router.accept(payload("b", "2")).is_some());
        assert_eq!(router.seen_count(), 2);
    }
}
