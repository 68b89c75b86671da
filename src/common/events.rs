use std::fmt;

use super::types::MessagePayload;

/// Which transport produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Local,
    Mesh,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => f.write_str("local"),
            TransportKind::Mesh => f.write_str("mesh"),
        }
    }
}

/// Inbound event from a transport into the session's merged stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message {
        source: TransportKind,
        payload: MessagePayload,
    },
    PeerJoined {
        source: TransportKind,
        peer_id: String,
    },
    PeerLeft {
        source: TransportKind,
        peer_id: String,
    },
}

impl TransportEvent {
    pub fn source(&self) -> TransportKind {
        match self {
            TransportEvent::Message { source, .. }
            | TransportEvent::PeerJoined { source, .. }
            | TransportEvent::PeerLeft { source, .. } => *source,
        }
    }
}
