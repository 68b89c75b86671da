//! # roomlink
//!
//! Serverless room chat over two transports at once: an in-process broadcast
//! bus for sessions living in the same process and a libp2p gossipsub mesh
//! for everyone else. Every message is published through both; inbound
//! copies are collapsed by message id so the application sees each one once.
//!
//! ```text
//!  send(text) ──► SessionManager ──► RoomSession ──┬──► LocalTransport ──► LocalBus
//!                                                  └──► MeshTransport  ──► gossipsub topic
//!
//!  LocalTransport ─┐
//!                  ├──► merged event channel ──► DedupRouter ──► on_message
//!  MeshTransport ──┘                          └► PeerTracker ──► on_peer_count
//! ```

pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod room;
pub mod transport;

pub use common::{AssistantTurn, DisplayMessage, Identity, MessageKind, MessagePayload, OriginKind, RoomContext};
pub use config::AppConfig;
pub use error::TransportError;
pub use room::{RoomSession, SessionManager, Teardown};
pub use transport::{EventSink, LocalBus, NoopTransport, Transport, TransportOpener};
