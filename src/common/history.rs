//! Conversation views handed to a text-completion service or a summarizer.

use serde::Serialize;

use super::types::{DisplayMessage, MessageKind, OriginKind};

/// One turn of the conversation as a chat-completion API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantTurn {
    pub role: &'static str,
    pub text: String,
}

fn text_messages(messages: &[DisplayMessage]) -> impl Iterator<Item = &DisplayMessage> {
    messages
        .iter()
        .filter(|message| message.kind == MessageKind::Text)
}

/// Text messages only; own messages are the "user" side, everyone else is
/// "model".
pub fn assistant_history(messages: &[DisplayMessage]) -> Vec<AssistantTurn> {
    text_messages(messages)
        .map(|message| AssistantTurn {
            role: if message.origin == OriginKind::SelfSent {
                "user"
            } else {
                "model"
            },
            text: message.text.clone(),
        })
        .collect()
}

/// One `Me:`/`Peer:` line per text message.
pub fn transcript(messages: &[DisplayMessage]) -> String {
    text_messages(messages)
        .map(|message| {
            let who = if message.origin == OriginKind::SelfSent {
                "Me"
            } else {
                "Peer"
            };
            format!("{who}: {}", message.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
