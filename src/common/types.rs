use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local user identity, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Fresh identity for the join screen: random user id, chosen name.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().simple().to_string(), display_name)
    }
}

/// Room a session is bound to plus who is in it locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomContext {
    pub room_id: String,
    pub identity: Identity,
}

impl RoomContext {
    pub fn new(room_id: impl Into<String>, identity: Identity) -> Self {
        Self {
            room_id: room_id.into(),
            identity,
        }
    }
}

/// Wire payload carried by every transport.
///
/// `id` is the deduplication key: it is generated once by the sender and
/// travels unchanged over every transport carrying the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    SelfSent,
    Peer,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    System,
}

/// A message as the application shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: i64,
    pub origin: OriginKind,
    pub kind: MessageKind,
}

impl DisplayMessage {
    pub fn from_peer(payload: MessagePayload) -> Self {
        Self::text(payload, OriginKind::Peer)
    }

    pub fn from_self(payload: MessagePayload) -> Self {
        Self::text(payload, OriginKind::SelfSent)
    }

    pub fn system(id: impl Into<String>, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sender_id: "system".to_string(),
            sender_name: "system".to_string(),
            timestamp,
            origin: OriginKind::System,
            kind: MessageKind::System,
        }
    }

    fn text(payload: MessagePayload, origin: OriginKind) -> Self {
        Self {
            id: payload.id,
            text: payload.text,
            sender_id: payload.sender_id,
            sender_name: payload.sender_name,
            timestamp: payload.timestamp,
            origin,
            kind: MessageKind::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_camel_case_on_the_wire() {
        let payload = MessagePayload {
            id: "u1-1000".into(),
            text: "hi".into(),
            sender_id: "u1".into(),
            sender_name: "Ann".into(),
            timestamp: 1000,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["senderId"], "u1");
        assert_eq!(json["senderName"], "Ann");
        assert!(json.get("sender_id").is_none());
    }

    #[test]
    fn peer_display_message_keeps_text_unchanged() {
        let payload = MessagePayload {
            id: "px-2000".into(),
            text: "  spaced  text ".into(),
            sender_id: "px".into(),
            sender_name: "X".into(),
            timestamp: 2000,
        };

        let msg = DisplayMessage::from_peer(payload);
        assert_eq!(msg.text, "  spaced  text ");
        assert_eq!(msg.origin, OriginKind::Peer);
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn generated_identities_are_distinct() {
        let a = Identity::generate("Ann");
        let b = Identity::generate("Ann");
        assert_ne!(a.user_id, b.user_id);
        assert_eq!(a.display_name, "Ann");
    }
}
