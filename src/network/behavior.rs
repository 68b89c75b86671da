use std::collections::hash_map::DefaultHasher;
use std::error::Error;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::gossipsub::{self, IdentTopic};
use libp2p::identify;
use libp2p::kad::{self, Mode as KadMode, store::MemoryStore};
use libp2p::mdns;
use libp2p::swarm::NetworkBehaviour;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::{PeerId, identity};

pub const PROTOCOL_VERSION: &str = "roomlink/1.0.0";

#[derive(NetworkBehaviour)]
pub struct RoomBehavior {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    pub kad: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
}

pub struct BehaviorOptions {
    pub topic: String,
    pub heartbeat: Duration,
    pub enable_mdns: bool,
}

pub fn build_behavior(
    local_key: &identity::Keypair,
    local_peer_id: PeerId,
    options: &BehaviorOptions,
) -> Result<(RoomBehavior, IdentTopic), Box<dyn Error>> {
    let message_id_fn = |message: &gossipsub::Message| {
        let mut hasher = DefaultHasher::new();
        message.data.hash(&mut hasher);
        gossipsub::MessageId::from(hasher.finish().to_string())
    };

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(options.heartbeat)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .message_id_fn(message_id_fn)
        .build()?;

    let mut gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(local_key.clone()),
        gossipsub_config,
    )?;

    let topic = gossipsub::IdentTopic::new(options.topic.clone());
    gossipsub.subscribe(&topic)?;

    let mdns = if options.enable_mdns {
        Some(mdns::tokio::Behaviour::new(
            mdns::Config::default(),
            local_peer_id,
        )?)
    } else {
        None
    };

    let store = MemoryStore::new(local_peer_id);
    let mut kad = kad::Behaviour::new(local_peer_id, store);
    kad.set_mode(Some(KadMode::Server));

    let identify_config =
        identify::Config::new(PROTOCOL_VERSION.into(), local_key.public().clone());
    let identify = identify::Behaviour::new(identify_config);

    Ok((
        RoomBehavior {
            gossipsub,
            mdns: Toggle::from(mdns),
            kad,
            identify,
        },
        topic,
    ))
}
