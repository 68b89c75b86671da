use std::fs;
use std::path::Path;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/roomlink.json";
pub const DEFAULT_APP_NAMESPACE: &str = "nexus-p2p-chat-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Prefix for local channel names and mesh topics.
    pub app_namespace: String,
    /// `/ip4/.../tcp/.../p2p/<PeerId>` entries used for WAN discovery.
    pub bootstrap_nodes: Vec<String>,
    pub listen_addr: String,
    pub enable_local: bool,
    pub enable_mesh: bool,
    pub enable_mdns: bool,
    pub heartbeat_secs: u64,
    /// Frames buffered per local subscriber before it starts lagging.
    pub local_capacity: usize,
    /// Where the mesh keypair is kept; `None` means a fresh key per session.
    pub key_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_namespace: DEFAULT_APP_NAMESPACE.to_string(),
            bootstrap_nodes: Vec::new(),
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            enable_local: true,
            enable_mesh: true,
            enable_mdns: true,
            heartbeat_secs: 5,
            local_capacity: 256,
            key_path: None,
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

/// Put `entry` at the front of the bootstrap list and write the file back.
pub fn persist_bootstrap_node(path: &str, entry: &str) -> std::io::Result<()> {
    let mut config = load_config(path);
    config.bootstrap_nodes.retain(|node| node != entry);
    config.bootstrap_nodes.insert(0, entry.to_string());

    match save_config(path, &config) {
        Ok(()) => {
            log::info!("Persisted bootstrap node {} to {}", entry, path);
            Ok(())
        }
        Err(err) => {
            log::error!("Failed to write bootstrap config {}: {err}", path);
            Err(err)
        }
    }
}

/// Validate `entry` as a dialable bootstrap address, persist it and return
/// the reloaded config.
pub fn add_bootstrap_node(path: &str, entry: &str) -> std::io::Result<AppConfig> {
    if parse_bootstrap_peers(&[entry.to_string()]).is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("`{entry}` is not a multiaddr ending in /p2p/<PeerId>"),
        ));
    }
    persist_bootstrap_node(path, entry)?;
    Ok(load_config(path))
}

/// Split `.../p2p/<PeerId>` multiaddrs into dialable pairs, skipping bad ones.
pub fn parse_bootstrap_peers(entries: &[String]) -> Vec<(PeerId, Multiaddr)> {
    entries
        .iter()
        .filter_map(|entry| {
            let mut addr: Multiaddr = match entry.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("Invalid multiaddr `{entry}`: {err}");
                    return None;
                }
            };

            let peer_id = match addr.pop() {
                Some(Protocol::P2p(peer)) => peer,
                _ => {
                    log::warn!("Multiaddr `{entry}` missing /p2p/PeerId suffix");
                    return None;
                }
            };

            Some((peer_id, addr))
        })
        .collect()
}
