//! Room sessions: one per visit to a room.
//!
//! A session opens every configured transport for its room, merges their
//! inbound events into a single channel and drains it from one pump task.
//! That task is the only place the dedup router and peer tracker react to
//! the network, so check-then-insert never races another delivery.
//!
//! Finality: listener callbacks run while the listener slot is locked, and
//! teardown empties that slot before it stops anything else. Once
//! [`RoomSession::teardown`] returns, no callback is running and none will
//! start, whatever the transports still have queued. A callback may tear its
//! own session down; the listeners are then released as soon as that
//! callback returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::{DisplayMessage, Identity, MessagePayload, RoomContext, TransportEvent};
use crate::config::AppConfig;
use crate::network::{MeshOpener, MeshOptions};
use crate::transport::{
    EventSink, LocalBus, LocalOpener, Transport, TransportOpener, spawn_task,
};

use super::router::DedupRouter;
use super::tracker::PeerTracker;

type MessageCallback = Box<dyn Fn(DisplayMessage) + Send>;
type PeerCountCallback = Box<dyn Fn(usize) + Send>;

struct Listeners {
    on_message: MessageCallback,
    on_peer_count: PeerCountCallback,
}

/// Generates message ids that stay unique for one sender even when several
/// messages share a millisecond: `{sender}-{millis}-{nonce}{seq}`.
#[derive(Debug)]
pub struct MessageIdGenerator {
    nonce: String,
    seq: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        let nonce = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            nonce,
            seq: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self, sender_id: &str, timestamp: i64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{sender_id}-{timestamp}-{}{seq}", self.nonce)
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionCore {
    context: RoomContext,
    transports: Vec<Box<dyn Transport>>,
    router: Mutex<DedupRouter>,
    tracker: Mutex<PeerTracker>,
    listeners: Mutex<Option<Listeners>>,
    /// Thread currently running a listener callback, if any.
    dispatching: Mutex<Option<ThreadId>>,
    active: AtomicBool,
    ids: MessageIdGenerator,
}

impl SessionCore {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns once no callback is running; none will run afterwards.
    ///
    /// Called from inside a callback, the listener slot is still held by
    /// that callback, so it is cleared by [`Self::dispatch`] on the way out.
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        if *lock(&self.dispatching) == Some(thread::current().id()) {
            log::warn!(
                "Room {} torn down from inside a callback; listeners released when it returns",
                self.context.room_id
            );
            return;
        }
        lock(&self.listeners).take();
    }

    fn dispatch(&self, notify: impl FnOnce(&Listeners)) {
        let mut slot = lock(&self.listeners);
        let Some(listeners) = slot.as_ref() else {
            return;
        };
        *lock(&self.dispatching) = Some(thread::current().id());
        notify(listeners);
        *lock(&self.dispatching) = None;
        if !self.is_active() {
            slot.take();
        }
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message { source, payload } => {
                let id = payload.id.clone();
                let accepted = lock(&self.router).accept(payload);
                match accepted {
                    Some(message) => {
                        log::debug!("Accepted {id} via {source}");
                        self.notify_message(message);
                    }
                    None => log::trace!("Duplicate {id} via {source} dropped"),
                }
            }
            TransportEvent::PeerJoined { source, peer_id } => {
                log::debug!("{source} peer joined: {peer_id}");
                self.publish_peer_count();
            }
            TransportEvent::PeerLeft { source, peer_id } => {
                log::debug!("{source} peer left: {peer_id}");
                self.publish_peer_count();
            }
        }
    }

    fn publish_peer_count(&self) {
        let count = lock(&self.tracker).recompute(&self.transports);
        self.dispatch(|listeners| (listeners.on_peer_count)(count));
    }

    fn notify_message(&self, message: DisplayMessage) {
        self.dispatch(|listeners| (listeners.on_message)(message));
    }

    fn send(&self, text: &str) -> Option<MessagePayload> {
        if text.trim().is_empty() || !self.is_active() {
            return None;
        }

        let identity = &self.context.identity;
        let timestamp = Utc::now().timestamp_millis();
        let payload = MessagePayload {
            id: self.ids.next_id(&identity.user_id, timestamp),
            text: text.to_string(),
            sender_id: identity.user_id.clone(),
            sender_name: identity.display_name.clone(),
            timestamp,
        };

        // Before fan-out, so an echo racing back is already known.
        lock(&self.router).mark_sent(&payload.id);
        for transport in &self.transports {
            transport.send(&payload);
        }
        Some(payload)
    }
}

async fn pump_events(core: Arc<SessionCore>, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        if !core.is_active() {
            break;
        }
        core.handle(event);
    }
    log::debug!("Event pump for room {} stopped", core.context.room_id);
}

/// A live membership in one room.
pub struct RoomSession {
    core: Arc<SessionCore>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RoomSession {
    /// Open every transport for the room and start routing.
    ///
    /// Never fails: transports that cannot start are replaced by no-ops.
    /// The initial peer count is reported before this returns.
    pub fn open<M, P>(
        openers: &[Box<dyn TransportOpener>],
        context: RoomContext,
        on_message: M,
        on_peer_count: P,
    ) -> Self
    where
        M: Fn(DisplayMessage) + Send + 'static,
        P: Fn(usize) + Send + 'static,
    {
        let (tx, inbound) = mpsc::unbounded_channel();
        let transports: Vec<Box<dyn Transport>> = openers
            .iter()
            .map(|opener| opener.open(&context, EventSink::new(opener.kind(), tx.clone())))
            .collect();
        drop(tx);

        log::info!(
            "Joined room {} as {} over {} transports",
            context.room_id,
            context.identity.display_name,
            transports.len()
        );

        let core = Arc::new(SessionCore {
            context,
            transports,
            router: Mutex::new(DedupRouter::new()),
            tracker: Mutex::new(PeerTracker::new()),
            listeners: Mutex::new(Some(Listeners {
                on_message: Box::new(on_message),
                on_peer_count: Box::new(on_peer_count),
            })),
            dispatching: Mutex::new(None),
            active: AtomicBool::new(true),
            ids: MessageIdGenerator::new(),
        });

        core.publish_peer_count();
        let pump = spawn_task("room event pump", pump_events(core.clone(), inbound));

        Self {
            core,
            pump: Mutex::new(pump),
            closed: AtomicBool::new(false),
        }
    }

    /// Build a payload from `text` and fan it out to every transport.
    ///
    /// Returns `None` (and sends nothing) for blank text or a torn-down
    /// session.
    pub fn send(&self, text: &str) -> Option<MessagePayload> {
        self.core.send(text)
    }

    /// Close every transport. Idempotent; see the module docs for finality.
    ///
    /// Safe to call from inside `on_message` or `on_peer_count`: no further
    /// callback starts after the current one returns.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.core.deactivate();
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        for transport in &self.core.transports {
            transport.close();
        }
        log::info!("Left room {}", self.core.context.room_id);
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn room_id(&self) -> &str {
        &self.core.context.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.core.context.identity
    }

    /// Peer count as of the last membership change.
    pub fn peer_count(&self) -> usize {
        lock(&self.core.tracker).last()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Handle returned by [`SessionManager::join`]; running it more than once is
/// a no-op. It may be run from inside the session's own callbacks.
#[derive(Clone)]
pub struct Teardown {
    session: Arc<RoomSession>,
}

impl Teardown {
    pub fn run(&self) {
        self.session.teardown();
    }
}

/// Owns at most one room session at a time.
pub struct SessionManager {
    openers: Vec<Box<dyn TransportOpener>>,
    current: Option<Arc<RoomSession>>,
}

impl SessionManager {
    pub fn new(openers: Vec<Box<dyn TransportOpener>>) -> Self {
        Self {
            openers,
            current: None,
        }
    }

    /// Local transport over `bus` (when enabled) plus the libp2p mesh (when
    /// enabled).
    pub fn from_config(config: &AppConfig, bus: Option<LocalBus>) -> Self {
        let mut openers: Vec<Box<dyn TransportOpener>> = Vec::new();

        let bus = if config.enable_local { bus } else { None };
        openers.push(Box::new(LocalOpener::new(bus, config.app_namespace.clone())));

        if config.enable_mesh {
            openers.push(Box::new(MeshOpener::new(MeshOptions::from_config(config))));
        } else {
            log::info!("Mesh transport disabled by config");
        }

        Self::new(openers)
    }

    /// Enter `room_id`. An active session is torn down first, so a room
    /// switch never leaves the old transports running.
    pub fn join<M, P>(
        &mut self,
        room_id: impl Into<String>,
        identity: Identity,
        on_message: M,
        on_peer_count: P,
    ) -> Teardown
    where
        M: Fn(DisplayMessage) + Send + 'static,
        P: Fn(usize) + Send + 'static,
    {
        if let Some(previous) = self.current.take() {
            if previous.is_active() {
                log::warn!(
                    "Joining a new room while still in {}; leaving it first",
                    previous.room_id()
                );
            }
            previous.teardown();
        }

        let context = RoomContext::new(room_id, identity);
        let session = Arc::new(RoomSession::open(
            &self.openers,
            context,
            on_message,
            on_peer_count,
        ));
        self.current = Some(session.clone());
        Teardown { session }
    }

    pub fn send(&self, text: &str) -> Option<MessagePayload> {
        self.current.as_ref().and_then(|session| session.send(text))
    }

    pub fn teardown(&mut self) {
        if let Some(session) = self.current.take() {
            session.teardown();
        }
    }

    pub fn is_joined(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|session| session.is_active())
    }

    pub fn room_id(&self) -> Option<&str> {
        self.current.as_ref().map(|session| session.room_id())
    }

    pub fn peer_count(&self) -> usize {
        self.current
            .as_ref()
            .map_or(0, |session| session.peer_count())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::common::TransportKind;

    #[test]
    fn ids_differ_within_one_millisecond() {
        let ids = MessageIdGenerator::new();
        let generated: HashSet<String> = (0..100).map(|_| ids.next_id("u1", 1_000)).collect();
        assert_eq!(generated.len(), 100);
        assert!(generated.iter().all(|id| id.starts_with("u1-1000-")));
    }

    #[test]
    fn two_generators_do_not_collide() {
        let a = MessageIdGenerator::new();
        let b = MessageIdGenerator::new();
        assert_ne!(a.next_id("u1", 1_000), b.next_id("u1", 1_000));
    }

    #[test]
    fn manager_without_session_sends_nothing() {
        let manager = SessionManager::new(Vec::new());
        assert!(manager.send("hello").is_none());
        assert!(!manager.is_joined());
        assert_eq!(manager.peer_count(), 0);
        assert_eq!(manager.room_id(), None);
    }

    #[tokio::test]
    async fn blank_text_is_not_sent() {
        let mut manager = SessionManager::new(Vec::new());
        manager.join("r", Identity::new("u1", "Ann"), |_| {}, |_| {});

        assert!(manager.send("   ").is_none());
        let payload = manager.send(" hi ").unwrap();
        assert_eq!(payload.text, " hi ");
        assert_eq!(payload.sender_id, "u1");
        assert_eq!(payload.sender_name, "Ann");
    }

    #[tokio::test]
    async fn disabled_transports_still_join() {
        let config = AppConfig {
            enable_local: false,
            enable_mesh: false,
            ..AppConfig::default()
        };
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();

        let mut manager = SessionManager::from_config(&config, Some(LocalBus::default()));
        let teardown = manager.join(
            "r",
            Identity::new("u1", "Ann"),
            |_| {},
            move |count| sink.lock().unwrap().push(count),
        );

        assert!(manager.is_joined());
        assert!(manager.send("into the void").is_some());
        assert_eq!(*counts.lock().unwrap(), vec![0]);

        teardown.run();
        teardown.run();
        assert!(!manager.is_joined());
        assert!(manager.send("after").is_none());
    }

    #[test]
    fn from_config_opens_only_enabled_transports() {
        let config = AppConfig {
            enable_mesh: false,
            ..AppConfig::default()
        };
        let manager = SessionManager::from_config(&config, None);
        let kinds: Vec<TransportKind> = manager.openers.iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, vec![TransportKind::Local]);
    }
}
