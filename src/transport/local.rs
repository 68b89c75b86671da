//! Same-process broadcast transport.
//!
//! Every handle opened on a channel name sees every frame sent by the other
//! handles on that name, instantly and without touching the network. Channel
//! names are derived from the app namespace and room id, so two sessions in
//! the same room meet on the same channel and different rooms never mix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{MessagePayload, RoomContext, TransportKind};
use crate::error::{Result, TransportError};

use super::{EventSink, NoopTransport, Transport, TransportOpener, spawn_task};

pub const DEFAULT_LOCAL_CAPACITY: usize = 256;

pub fn channel_name(app_namespace: &str, room_id: &str) -> String {
    format!("{app_namespace}:{room_id}")
}

#[derive(Debug, Clone)]
struct LocalFrame {
    origin: Uuid,
    payload: Arc<MessagePayload>,
}

struct Channel {
    sender: broadcast::Sender<LocalFrame>,
    handles: usize,
}

/// Registry of named in-process broadcast channels.
///
/// Cheap to clone; all clones share the same channels. A channel exists while
/// at least one handle is open on it.
#[derive(Clone)]
pub struct LocalBus {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn attach(&self, name: &str) -> (broadcast::Sender<LocalFrame>, broadcast::Receiver<LocalFrame>) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = channels.entry(name.to_string()).or_insert_with(|| Channel {
            sender: broadcast::channel(self.capacity).0,
            handles: 0,
        });
        channel.handles += 1;
        (channel.sender.clone(), channel.sender.subscribe())
    }

    fn detach(&self, name: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = channels.get_mut(name) {
            channel.handles = channel.handles.saturating_sub(1);
            if channel.handles == 0 {
                channels.remove(name);
            }
        }
    }

    /// Number of channels with at least one open handle.
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Open handles on `name`.
    pub fn handle_count(&self, name: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |channel| channel.handles)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_CAPACITY)
    }
}

pub struct LocalTransport {
    id: Uuid,
    channel: String,
    bus: LocalBus,
    sender: broadcast::Sender<LocalFrame>,
    active: Arc<AtomicBool>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTransport {
    /// Subscribe to `channel` on `bus` and start forwarding frames from other
    /// handles into `sink`. Needs a tokio runtime.
    pub fn open(bus: &LocalBus, channel: impl Into<String>, sink: EventSink) -> Result<Self> {
        let channel = channel.into();
        let id = Uuid::new_v4();
        let active = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = bus.attach(&channel);

        let forward = forward_frames(id, channel.clone(), receiver, sink, active.clone());
        let Some(forwarder) = spawn_task("local transport", forward) else {
            bus.detach(&channel);
            return Err(TransportError::Unavailable(
                "no async runtime to drive the local bus".to_string(),
            ));
        };

        log::info!("Local transport open on channel {channel}");
        Ok(Self {
            id,
            channel,
            bus: bus.clone(),
            sender,
            active,
            forwarder: Mutex::new(Some(forwarder)),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

async fn forward_frames(
    own_id: Uuid,
    channel: String,
    mut receiver: broadcast::Receiver<LocalFrame>,
    sink: EventSink,
    active: Arc<AtomicBool>,
) {
    loop {
        match receiver.recv().await {
            Ok(frame) => {
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                if frame.origin == own_id {
                    continue;
                }
                sink.deliver(MessagePayload::clone(&frame.payload));
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Local channel {channel} lagged; skipped {skipped} frames");
            }
            Err(RecvError::Closed) => break,
        }
    }
    log::debug!("Local forwarder for {channel} stopped");
}

impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn send(&self, payload: &MessagePayload) {
        if !self.is_active() {
            return;
        }
        let frame = LocalFrame {
            origin: self.id,
            payload: Arc::new(payload.clone()),
        };
        // Err only means nobody else is listening.
        if self.sender.send(frame).is_err() {
            log::debug!("Local send on {} reached no subscribers", self.channel);
        }
    }

    fn close(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        self.bus.detach(&self.channel);
        log::info!("Local transport closed on channel {}", self.channel);
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens the local transport for a room, or a no-op when there is no bus.
pub struct LocalOpener {
    bus: Option<LocalBus>,
    app_namespace: String,
}

impl LocalOpener {
    pub fn new(bus: Option<LocalBus>, app_namespace: impl Into<String>) -> Self {
        Self {
            bus,
            app_namespace: app_namespace.into(),
        }
    }
}

impl TransportOpener for LocalOpener {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn open(&self, room: &RoomContext, sink: EventSink) -> Box<dyn Transport> {
        let Some(bus) = &self.bus else {
            log::info!("Local transport unavailable; continuing without it");
            return Box::new(NoopTransport::new(TransportKind::Local));
        };

        let name = channel_name(&self.app_namespace, &room.room_id);
        match LocalTransport::open(bus, name, sink) {
            Ok(transport) => Box::new(transport),
            Err(err) => {
                log::warn!("{err}; continuing without local transport");
                Box::new(NoopTransport::new(TransportKind::Local))
            }
        }
    }
}
