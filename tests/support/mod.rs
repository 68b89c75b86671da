#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomlink::common::{RoomContext, TransportKind};
use roomlink::{DisplayMessage, EventSink, MessagePayload, Transport, TransportOpener};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// What the application side of a session observed, in callback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Message(DisplayMessage),
    PeerCount(usize),
}

pub type Observations = mpsc::UnboundedReceiver<Observed>;

pub fn recorder() -> (
    impl Fn(DisplayMessage) + Send + 'static,
    impl Fn(usize) + Send + 'static,
    Observations,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let messages = tx.clone();
    let on_message = move |message| {
        let _ = messages.send(Observed::Message(message));
    };
    let on_peer_count = move |count| {
        let _ = tx.send(Observed::PeerCount(count));
    };
    (on_message, on_peer_count, rx)
}

pub fn payload(id: &str, text: &str, sender: &str) -> MessagePayload {
    MessagePayload {
        id: id.to_string(),
        text: text.to_string(),
        sender_id: sender.to_string(),
        sender_name: sender.to_uppercase(),
        timestamp: 1_000,
    }
}

/// Test-controlled transport: the test injects inbound events and inspects
/// what the session sent. The sink stays reachable after close so tests can
/// fire "late" events.
pub struct Wire {
    kind: TransportKind,
    echo: bool,
    sink: Mutex<Option<EventSink>>,
    peers: Mutex<HashSet<String>>,
    sent: Mutex<Vec<MessagePayload>>,
    closes: AtomicUsize,
    opens: AtomicUsize,
}

impl Wire {
    pub fn new(kind: TransportKind) -> Arc<Self> {
        Self::build(kind, false)
    }

    /// A wire that hands every sent payload straight back to the session.
    pub fn echoing(kind: TransportKind) -> Arc<Self> {
        Self::build(kind, true)
    }

    fn build(kind: TransportKind, echo: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            echo,
            sink: Mutex::new(None),
            peers: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn opener(self: &Arc<Self>) -> Box<dyn TransportOpener> {
        Box::new(WireOpener(self.clone()))
    }

    fn sink(&self) -> EventSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("wire was never opened")
    }

    pub fn deliver(&self, payload: MessagePayload) {
        self.sink().deliver(payload);
    }

    pub fn peer_joined(&self, peer_id: &str) {
        self.peers.lock().unwrap().insert(peer_id.to_string());
        self.sink().peer_joined(peer_id);
    }

    pub fn peer_left(&self, peer_id: &str) {
        self.peers.lock().unwrap().remove(peer_id);
        self.sink().peer_left(peer_id);
    }

    pub fn sent(&self) -> Vec<MessagePayload> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct WireOpener(Arc<Wire>);

impl TransportOpener for WireOpener {
    fn kind(&self) -> TransportKind {
        self.0.kind
    }

    fn open(&self, _room: &RoomContext, sink: EventSink) -> Box<dyn Transport> {
        *self.0.sink.lock().unwrap() = Some(sink);
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        Box::new(WireTransport(self.0.clone()))
    }
}

struct WireTransport(Arc<Wire>);

impl Transport for WireTransport {
    fn kind(&self) -> TransportKind {
        self.0.kind
    }

    fn send(&self, payload: &MessagePayload) {
        self.0.sent.lock().unwrap().push(payload.clone());
        if self.0.echo {
            self.0.deliver(payload.clone());
        }
    }

    fn current_peer_ids(&self) -> Option<HashSet<String>> {
        match self.0.kind {
            TransportKind::Mesh => Some(self.0.peers.lock().unwrap().clone()),
            TransportKind::Local => None,
        }
    }

    fn close(&self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub async fn next(rx: &mut Observations) -> Observed {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("session dropped its listeners")
}

/// Push a marker message through `wire` and return everything observed
/// before it. Events are processed in order, so once the marker shows up
/// every earlier event has been handled.
pub async fn settle(wire: &Wire, rx: &mut Observations, marker: &str) -> Vec<Observed> {
    wire.deliver(payload(marker, "marker", "marker"));
    let mut seen = Vec::new();
    loop {
        match next(rx).await {
            Observed::Message(message) if message.id == marker => return seen,
            other => seen.push(other),
        }
    }
}

pub fn messages(observed: &[Observed]) -> Vec<DisplayMessage> {
    observed
        .iter()
        .filter_map(|item| match item {
            Observed::Message(message) => Some(message.clone()),
            Observed::PeerCount(_) => None,
        })
        .collect()
}

pub fn counts(observed: &[Observed]) -> Vec<usize> {
    observed
        .iter()
        .filter_map(|item| match item {
            Observed::PeerCount(count) => Some(*count),
            Observed::Message(_) => None,
        })
        .collect()
}
