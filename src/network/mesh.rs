use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic};
use libp2p::identify;
use libp2p::kad;
use libp2p::mdns;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{MeshCommand, MessagePayload, RoomContext, TransportKind};
use crate::config::{AppConfig, parse_bootstrap_peers};
use crate::error::{Result, TransportError};
use crate::transport::{EventSink, NoopTransport, Transport, TransportOpener, spawn_task};

use super::behavior::{BehaviorOptions, RoomBehavior, RoomBehaviorEvent, build_behavior};
use super::membership::{MembershipChange, RoomMembership};
use super::transport::build_transport;

pub fn topic_name(app_namespace: &str, room_id: &str) -> String {
    format!("{app_namespace}/{room_id}")
}

#[derive(Debug, Clone)]
pub struct MeshOptions {
    pub app_namespace: String,
    pub listen_addr: String,
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    pub enable_mdns: bool,
    pub heartbeat: Duration,
    pub key_path: Option<String>,
}

impl MeshOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            app_namespace: config.app_namespace.clone(),
            listen_addr: config.listen_addr.clone(),
            bootstrap_peers: parse_bootstrap_peers(&config.bootstrap_nodes),
            enable_mdns: config.enable_mdns,
            heartbeat: Duration::from_secs(config.heartbeat_secs.max(1)),
            key_path: config.key_path.clone(),
        }
    }
}

/// Handle to a room's peer mesh.
///
/// The swarm itself lives in a background task; this handle talks to it
/// through a command channel and reads membership from a shared set, so
/// `send` and `current_peer_ids` never wait on the network.
pub struct MeshTransport {
    local_peer_id: PeerId,
    topic: String,
    command_sender: mpsc::UnboundedSender<MeshCommand>,
    membership: RoomMembership,
    active: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MeshTransport {
    /// Build the swarm, start listening and hand it to a background task.
    /// Peers are discovered asynchronously afterwards.
    pub fn open(options: &MeshOptions, room_id: &str, sink: EventSink) -> Result<Self> {
        // Listening registers sockets with the reactor, so check up front.
        if let Err(err) = tokio::runtime::Handle::try_current() {
            return Err(TransportError::ConnectFailure(format!(
                "no async runtime to drive the swarm ({err})"
            )));
        }

        let local_key = match &options.key_path {
            Some(path) => load_or_generate_local_key(path)?,
            None => identity::Keypair::generate_ed25519(),
        };
        let local_peer_id = PeerId::from(local_key.public());
        let topic = topic_name(&options.app_namespace, room_id);

        let (swarm, room_topic) = build_swarm(&local_key, local_peer_id, options, &topic)
            .map_err(|err| TransportError::ConnectFailure(err.to_string()))?;

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let membership = RoomMembership::new();
        let active = Arc::new(AtomicBool::new(true));

        let node = MeshNode {
            swarm,
            topic: room_topic,
            membership: membership.clone(),
            sink,
            active: active.clone(),
            command_receiver,
        };
        let Some(task) = spawn_task("mesh transport", node.run()) else {
            return Err(TransportError::ConnectFailure(
                "no async runtime to drive the swarm".to_string(),
            ));
        };

        log::info!("Mesh transport {local_peer_id} joining topic {topic}");
        Ok(Self {
            local_peer_id,
            topic,
            command_sender,
            membership,
            active,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Drop every peer connection and stop emitting events.
    pub fn leave(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        // The task may already be gone; abort covers it either way.
        let _ = self.command_sender.send(MeshCommand::Leave);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        let dropped = self.membership.clear();
        log::info!(
            "Left mesh topic {} ({} peers dropped)",
            self.topic,
            dropped.len()
        );
    }
}

impl Transport for MeshTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mesh
    }

    fn send(&self, payload: &MessagePayload) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if self
            .command_sender
            .send(MeshCommand::Publish(payload.clone()))
            .is_err()
        {
            log::warn!("Mesh task for {} is gone; message {} not sent", self.topic, payload.id);
        }
    }

    fn current_peer_ids(&self) -> Option<std::collections::HashSet<String>> {
        Some(self.membership.snapshot())
    }

    fn close(&self) {
        self.leave();
    }
}

impl Drop for MeshTransport {
    fn drop(&mut self) {
        self.leave();
    }
}

fn build_swarm(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
    options: &MeshOptions,
    topic: &str,
) -> std::result::Result<(Swarm<RoomBehavior>, IdentTopic), Box<dyn Error>> {
    let transport = build_transport(local_key)?;
    let behavior_options = BehaviorOptions {
        topic: topic.to_string(),
        heartbeat: options.heartbeat,
        enable_mdns: options.enable_mdns,
    };
    let (behavior, room_topic) = build_behavior(local_key, local_peer_id, &behavior_options)?;

    let mut swarm = Swarm::new(
        transport,
        behavior,
        local_peer_id,
        SwarmConfig::with_tokio_executor().with_idle_connection_timeout(Duration::from_secs(60)),
    );

    swarm.listen_on(options.listen_addr.parse()?)?;

    if options.bootstrap_peers.is_empty() {
        log::info!("No bootstrap peers configured; relying on local discovery");
    } else {
        for (peer_id, addr) in &options.bootstrap_peers {
            log::info!("Adding bootstrap peer {peer_id} at {addr}");
            swarm.behaviour_mut().kad.add_address(peer_id, addr.clone());
            if let Err(err) = swarm.dial(addr.clone()) {
                log::warn!("Failed to dial bootstrap peer {peer_id}: {err}");
            }
        }

        if let Err(err) = swarm.behaviour_mut().kad.bootstrap() {
            log::warn!("Failed to trigger Kademlia bootstrap: {err}");
        }
    }

    Ok((swarm, room_topic))
}

/// Owns the swarm for one room for as long as the session stays in it.
struct MeshNode {
    swarm: Swarm<RoomBehavior>,
    topic: IdentTopic,
    membership: RoomMembership,
    sink: EventSink,
    active: Arc<AtomicBool>,
    command_receiver: mpsc::UnboundedReceiver<MeshCommand>,
}

impl MeshNode {
    async fn run(mut self) {
        log::info!("Mesh event loop started for {}", self.topic);

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(MeshCommand::Publish(payload)) => self.publish(&payload),
                        Some(MeshCommand::Leave) | None => break,
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
            }
        }

        log::info!("Mesh event loop for {} stopped", self.topic);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn publish(&mut self, payload: &MessagePayload) {
        if self.membership.is_empty() {
            log::debug!("No mesh peers in {}; message {} stays local", self.topic, payload.id);
            return;
        }

        match encode_payload(payload) {
            Ok(json_bytes) => {
                if let Err(err) = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(self.topic.clone(), json_bytes)
                {
                    log::warn!("Publish error for {}: {err:?}", payload.id);
                }
            }
            Err(err) => {
                log::warn!("Message {} not published: {err}", payload.id);
            }
        }
    }

    fn emit(&self, change: Option<MembershipChange>) {
        if !self.is_active() {
            return;
        }
        match change {
            Some(MembershipChange::Joined(peer_id)) => {
                log::info!("Peer joined {}: {peer_id}", self.topic);
                self.sink.peer_joined(peer_id);
            }
            Some(MembershipChange::Left(peer_id)) => {
                log::info!("Peer left {}: {peer_id}", self.topic);
                self.sink.peer_left(peer_id);
            }
            None => {}
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<RoomBehaviorEvent>) {
        match event {
            SwarmEvent::Behaviour(RoomBehaviorEvent::Gossipsub(event)) => {
                self.handle_gossipsub_event(event);
            }
            SwarmEvent::Behaviour(RoomBehaviorEvent::Mdns(event)) => {
                self.handle_mdns_event(event);
            }
            SwarmEvent::Behaviour(RoomBehaviorEvent::Identify(event)) => {
                self.handle_identify_event(event);
            }
            SwarmEvent::Behaviour(RoomBehaviorEvent::Kad(event)) => {
                self.handle_kad_event(event);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address:?}");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                log::debug!("Connection established with {peer_id}");
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                let change = self
                    .membership
                    .on_connection_closed(&peer_id.to_string(), num_established);
                self.emit(change);
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                log::warn!("Outgoing connection to {peer_id:?} failed: {error}");
            }
            _ => {}
        }
    }

    fn handle_gossipsub_event(&mut self, event: gossipsub::Event) {
        match event {
            gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            } => match decode_payload(&message.data) {
                Ok(payload) => {
                    log::debug!("Mesh message {} via {propagation_source}", payload.id);
                    if self.is_active() {
                        self.sink.deliver(payload);
                    }
                }
                Err(err) => {
                    log::warn!("Dropping undecodable mesh message from {propagation_source}: {err}");
                }
            },
            gossipsub::Event::Subscribed { peer_id, topic } => {
                if topic == self.topic.hash() {
                    let change = self.membership.on_subscribed(&peer_id.to_string());
                    self.emit(change);
                }
            }
            gossipsub::Event::Unsubscribed { peer_id, topic } => {
                if topic == self.topic.hash() {
                    let change = self.membership.on_unsubscribed(&peer_id.to_string());
                    self.emit(change);
                }
            }
            _ => {}
        }
    }

    fn handle_mdns_event(&mut self, event: mdns::Event) {
        match event {
            mdns::Event::Discovered(list) => {
                for (peer_id, addr) in list {
                    log::debug!("mDNS discovered {peer_id} at {addr}");
                    self.swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    self.swarm.behaviour_mut().kad.add_address(&peer_id, addr.clone());
                    if !self.swarm.is_connected(&peer_id) {
                        if let Err(err) = self.swarm.dial(addr) {
                            log::debug!("Failed to dial mDNS peer {peer_id}: {err}");
                        }
                    }
                }
            }
            mdns::Event::Expired(list) => {
                for (peer_id, _) in list {
                    log::debug!("mDNS record expired for {peer_id}");
                    self.swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                }
            }
        }
    }

    fn handle_kad_event(&self, event: kad::Event) {
        match event {
            kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::Bootstrap(Ok(kad::BootstrapOk { num_remaining, .. })),
                ..
            } if num_remaining == 0 => {
                log::info!("DHT bootstrap for {} finished", self.topic);
            }
            kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::Bootstrap(Err(err)),
                ..
            } => {
                log::warn!("DHT bootstrap for {} failed: {err:?}", self.topic);
            }
            kad::Event::RoutingUpdated { peer, .. } => {
                log::trace!("DHT now routes to {peer}");
            }
            _ => {}
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            log::debug!(
                "Identify info from {peer_id}: protocols={:?}",
                info.protocols
            );

            for addr in info.listen_addrs {
                self.swarm.behaviour_mut().kad.add_address(&peer_id, addr);
            }
        }
    }
}

/// Gossipsub frames are the JSON form of [`MessagePayload`].
pub fn encode_payload(payload: &MessagePayload) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

pub fn decode_payload(bytes: &[u8]) -> Result<MessagePayload> {
    Ok(serde_json::from_slice(bytes)?)
}

/// The mesh keypair at `path`, created on first use so the peer id survives
/// restarts.
fn load_or_generate_local_key(path: &str) -> Result<identity::Keypair> {
    let key_error = |what: &str, err: &dyn std::fmt::Display| {
        TransportError::ConnectFailure(format!("mesh key {path}: {what}: {err}"))
    };
    let path_ref = Path::new(path);

    if path_ref.exists() {
        let bytes = fs::read(path_ref).map_err(|err| key_error("read", &err))?;
        return identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|err| key_error("decode", &err));
    }

    if let Some(parent) = path_ref.parent() {
        fs::create_dir_all(parent).map_err(|err| key_error("create dir", &err))?;
    }
    let keypair = identity::Keypair::generate_ed25519();
    let encoded = keypair
        .to_protobuf_encoding()
        .map_err(|err| key_error("encode", &err))?;
    fs::write(path_ref, encoded).map_err(|err| key_error("write", &err))?;
    log::info!("New mesh key for {} stored at {path}", PeerId::from(keypair.public()));
    Ok(keypair)
}

/// Opens the mesh transport for a room, or a no-op when the mesh can't start.
pub struct MeshOpener {
    options: MeshOptions,
}

impl MeshOpener {
    pub fn new(options: MeshOptions) -> Self {
        Self { options }
    }
}

impl TransportOpener for MeshOpener {
    fn kind(&self) -> TransportKind {
        TransportKind::Mesh
    }

    fn open(&self, room: &RoomContext, sink: EventSink) -> Box<dyn Transport> {
        match MeshTransport::open(&self.options, &room.room_id, sink) {
            Ok(transport) => Box::new(transport),
            Err(err) => {
                log::warn!("{err}; room {} continues without mesh peers", room.room_id);
                Box::new(NoopTransport::new(TransportKind::Mesh))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio::time::{Instant, timeout, timeout_at};

    use super::*;
    use crate::common::TransportEvent;

    type Events = mpsc::UnboundedReceiver<TransportEvent>;

    fn payload(id: &str) -> MessagePayload {
        MessagePayload {
            id: id.to_string(),
            text: format!("text of {id}"),
            sender_id: "u1".to_string(),
            sender_name: "Ann".to_string(),
            timestamp: 1_000,
        }
    }

    fn free_local_addr() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        format!("/ip4/127.0.0.1/tcp/{port}")
    }

    fn loopback_options(listen_addr: &str) -> MeshOptions {
        MeshOptions {
            app_namespace: "mesh-test".to_string(),
            listen_addr: listen_addr.to_string(),
            bootstrap_peers: Vec::new(),
            enable_mdns: false,
            heartbeat: Duration::from_secs(1),
            key_path: None,
        }
    }

    fn open_node(options: &MeshOptions) -> (MeshTransport, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        let node = MeshTransport::open(options, "room-42", EventSink::new(TransportKind::Mesh, tx))
            .unwrap();
        (node, rx)
    }

    async fn wait_for(
        rx: &mut Events,
        what: &str,
        wanted: impl Fn(&TransportEvent) -> bool,
    ) -> TransportEvent {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) if wanted(&event) => return event,
                Ok(Some(_)) => {}
                Ok(None) => panic!("sink closed while waiting for {what}"),
                Err(_) => panic!("timed out waiting for {what}"),
            }
        }
    }

    fn joined(peer: &str) -> impl Fn(&TransportEvent) -> bool + '_ {
        move |event| matches!(event, TransportEvent::PeerJoined { peer_id, .. } if peer_id == peer)
    }

    fn left(peer: &str) -> impl Fn(&TransportEvent) -> bool + '_ {
        move |event| matches!(event, TransportEvent::PeerLeft { peer_id, .. } if peer_id == peer)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn two_nodes_meet_exchange_and_part() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("a.key").to_str().unwrap().to_string();
        let a_id = PeerId::from(load_or_generate_local_key(&key_path).unwrap().public());
        let a_addr = free_local_addr();

        let (a, mut a_events) = open_node(&MeshOptions {
            key_path: Some(key_path),
            ..loopback_options(&a_addr)
        });
        assert_eq!(a.local_peer_id(), a_id);
        assert_eq!(a.topic(), "mesh-test/room-42");

        // Alone in the room: nothing is published and nothing fails.
        a.send(&payload("early"));
        assert_eq!(a.current_peer_ids(), Some(HashSet::new()));

        let (b, mut b_events) = open_node(&MeshOptions {
            bootstrap_peers: vec![(a_id, a_addr.parse().unwrap())],
            ..loopback_options("/ip4/127.0.0.1/tcp/0")
        });
        let a_name = a_id.to_string();
        let b_name = b.local_peer_id().to_string();

        wait_for(&mut a_events, "b to subscribe", joined(&b_name)).await;
        wait_for(&mut b_events, "a to subscribe", joined(&a_name)).await;
        assert_eq!(a.current_peer_ids(), Some(HashSet::from([b_name.clone()])));
        assert_eq!(b.current_peer_ids(), Some(HashSet::from([a_name.clone()])));

        // The first publish can race the mesh forming; repeat until it lands.
        let hello = payload("hello");
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            a.send(&hello);
            match timeout(Duration::from_millis(500), b_events.recv()).await {
                Ok(Some(TransportEvent::Message { source, payload })) => {
                    assert_eq!(source, TransportKind::Mesh);
                    assert_eq!(payload, hello);
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => panic!("b's sink closed before the message arrived"),
                Err(_) => assert!(Instant::now() < deadline, "message never reached b"),
            }
        }

        while b_events.try_recv().is_ok() {}
        b.leave();
        b.leave();
        assert_eq!(b.current_peer_ids(), Some(HashSet::new()));

        wait_for(&mut a_events, "b to leave", left(&b_name)).await;
        assert_eq!(a.current_peer_ids(), Some(HashSet::new()));

        a.send(&payload("after-leave"));
        match timeout(Duration::from_millis(500), b_events.recv()).await {
            Ok(Some(event)) => panic!("b emitted {event:?} after leaving"),
            Ok(None) | Err(_) => {}
        }
        a.leave();
    }

    #[test]
    fn topics_are_room_scoped() {
        assert_eq!(topic_name("ns", "room-42"), "ns/room-42");
        assert_ne!(topic_name("ns", "a"), topic_name("ns", "b"));
    }

    #[test]
    fn frames_use_camel_case_json() {
        let payload = MessagePayload {
            id: "u1-1000-ab12cd340".to_string(),
            text: "hi".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Ann".to_string(),
            timestamp: 1_000,
        };
        let bytes = encode_payload(&payload).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["senderName"], "Ann");
        assert_eq!(decode_payload(&bytes).unwrap(), payload);
    }

    #[test]
    fn garbage_frames_are_encoding_errors() {
        let err = decode_payload(b"not json").unwrap_err();
        assert!(matches!(err, TransportError::Encoding(_)));
    }

    #[test]
    fn options_follow_config() {
        let config = AppConfig {
            enable_mdns: false,
            heartbeat_secs: 0,
            bootstrap_nodes: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
            ..AppConfig::default()
        };

        let options = MeshOptions::from_config(&config);
        assert!(!options.enable_mdns);
        assert_eq!(options.heartbeat, Duration::from_secs(1));
        // Entries without a /p2p suffix are not dialable.
        assert!(options.bootstrap_peers.is_empty());
    }

    #[test]
    fn unreadable_key_is_a_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.pk");
        fs::write(&path, b"not a key").unwrap();

        let err = load_or_generate_local_key(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailure(ref msg) if msg.contains("decode")));
    }

    #[test]
    fn key_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("mesh.pk");
        let path = path.to_str().unwrap();

        let first = load_or_generate_local_key(path).unwrap();
        let second = load_or_generate_local_key(path).unwrap();
        assert_eq!(
            PeerId::from(first.public()),
            PeerId::from(second.public())
        );
    }

    #[test]
    fn opener_without_runtime_degrades_to_noop() {
        let options = MeshOptions {
            enable_mdns: false,
            ..MeshOptions::from_config(&AppConfig::default())
        };
        let opener = MeshOpener::new(options);
        let (tx, _rx) = mpsc::unbounded_channel();
        let room = RoomContext::new("r", crate::common::Identity::new("u1", "Ann"));

        let transport = opener.open(&room, EventSink::new(TransportKind::Mesh, tx));
        assert_eq!(transport.kind(), TransportKind::Mesh);
        assert!(transport.current_peer_ids().is_none());
    }
}
