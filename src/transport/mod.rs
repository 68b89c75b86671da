//! Transport seam shared by every delivery path a session fans out to.
//!
//! A transport only has to move [`MessagePayload`]s: it is handed an
//! [`EventSink`] when opened and pushes whatever it receives into it. The
//! session never looks at transport internals beyond this trait, so adding a
//! transport does not touch the router.

pub mod local;

use std::collections::HashSet;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{MessagePayload, RoomContext, TransportEvent, TransportKind};

pub use local::{LocalBus, LocalOpener, LocalTransport, channel_name};

pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Best effort. Never reports failure to the caller.
    fn send(&self, payload: &MessagePayload);

    /// Peers currently reachable, for transports that track membership.
    fn current_peer_ids(&self) -> Option<HashSet<String>> {
        None
    }

    /// Idempotent. No sink delivery happens after this returns.
    fn close(&self);
}

/// Builds a transport for a room. Construction never fails: an opener that
/// cannot bring its transport up returns a [`NoopTransport`].
pub trait TransportOpener: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn open(&self, room: &RoomContext, sink: EventSink) -> Box<dyn Transport>;
}

/// Write half of a session's merged inbound stream, pre-tagged with the
/// transport it was handed to.
#[derive(Debug, Clone)]
pub struct EventSink {
    source: TransportKind,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(source: TransportKind, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { source, tx }
    }

    pub fn source(&self) -> TransportKind {
        self.source
    }

    pub fn deliver(&self, payload: MessagePayload) {
        self.push(TransportEvent::Message {
            source: self.source,
            payload,
        });
    }

    pub fn peer_joined(&self, peer_id: impl Into<String>) {
        self.push(TransportEvent::PeerJoined {
            source: self.source,
            peer_id: peer_id.into(),
        });
    }

    pub fn peer_left(&self, peer_id: impl Into<String>) {
        self.push(TransportEvent::PeerLeft {
            source: self.source,
            peer_id: peer_id.into(),
        });
    }

    fn push(&self, event: TransportEvent) {
        // The receiver is gone only once the session is torn down.
        if self.tx.send(event).is_err() {
            log::debug!("{} event dropped: session closed", self.source);
        }
    }
}

/// Stand-in for a transport that could not be constructed.
#[derive(Debug)]
pub struct NoopTransport {
    kind: TransportKind,
}

impl NoopTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self { kind }
    }
}

impl Transport for NoopTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&self, _payload: &MessagePayload) {}

    fn close(&self) {}
}

/// Spawn onto the ambient tokio runtime, or `None` when there is none.
pub(crate) fn spawn_task<F>(what: &str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(err) => {
            log::error!("Cannot start {what}: no async runtime ({err})");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_tags_events_with_its_source() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mesh = EventSink::new(TransportKind::Mesh, tx.clone());
        let local = EventSink::new(TransportKind::Local, tx);

        mesh.peer_joined("peer-a");
        local.peer_left("peer-a");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.source(), TransportKind::Mesh);
        assert!(matches!(first, TransportEvent::PeerJoined { .. }));

        let second = rx.try_recv().unwrap();
        assert_eq!(second.source(), TransportKind::Local);
    }

    #[test]
    fn sink_outliving_its_session_is_harmless() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(TransportKind::Local, tx);
        drop(rx);

        sink.peer_left("gone");
    }

    #[test]
    fn noop_transport_reports_no_membership() {
        let noop = NoopTransport::new(TransportKind::Local);
        assert_eq!(noop.kind(), TransportKind::Local);
        assert!(noop.current_peer_ids().is_none());
        noop.close();
        noop.close();
    }
}
