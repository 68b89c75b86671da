pub mod commands;
pub mod events;
pub mod history;
pub mod types;

pub use commands::MeshCommand;
pub use events::{TransportEvent, TransportKind};
pub use history::{AssistantTurn, assistant_history, transcript};
pub use types::{DisplayMessage, Identity, MessageKind, MessagePayload, OriginKind, RoomContext};
