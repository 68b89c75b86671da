pub mod behavior;
pub mod membership;
pub mod mesh;
pub mod transport;

pub use membership::{MembershipChange, RoomMembership};
pub use mesh::{MeshOpener, MeshOptions, MeshTransport, topic_name};
