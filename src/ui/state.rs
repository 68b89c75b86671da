use std::collections::VecDeque;

use chrono::{DateTime, Local, Utc};
use roomlink::common::{assistant_history, transcript};
use roomlink::{AssistantTurn, DisplayMessage, Identity, MessagePayload};

const MAX_DEBUG_EVENTS: usize = 100;

/// What the session callbacks forward to the UI thread.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Message(DisplayMessage),
    PeerCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugKind {
    Session,
    Message,
    PeerCount,
    Config,
}

#[derive(Debug, Clone)]
pub struct DebugEvent {
    pub timestamp: DateTime<Local>,
    pub kind: DebugKind,
    pub message: String,
}

pub enum Screen {
    Join,
    Chat,
}

/// Local UI state for one window.
pub struct ChatState {
    pub screen: Screen,
    pub room_input: String,
    pub name_input: String,
    pub bootstrap_input: String,
    pub input_text: String,
    pub room_id: Option<String>,
    pub identity: Option<Identity>,
    pub messages: Vec<DisplayMessage>,
    pub peer_count: usize,
    pub debug_events: VecDeque<DebugEvent>,
    pub show_debug: bool,
    announced_count: Option<usize>,
    notice_seq: u64,
}

impl ChatState {
    pub fn new(room: Option<String>, name: Option<String>) -> Self {
        Self {
            screen: Screen::Join,
            room_input: room.unwrap_or_default(),
            name_input: name.unwrap_or_default(),
            bootstrap_input: String::new(),
            input_text: String::new(),
            room_id: None,
            identity: None,
            messages: Vec::new(),
            peer_count: 0,
            debug_events: VecDeque::new(),
            show_debug: false,
            announced_count: None,
            notice_seq: 0,
        }
    }

    /// Reset the chat screen for a freshly joined room.
    pub fn enter_room(&mut self, room_id: &str, identity: Identity) {
        self.screen = Screen::Chat;
        self.room_id = Some(room_id.to_string());
        self.identity = Some(identity);
        self.messages.clear();
        self.input_text.clear();
        self.peer_count = 0;
        self.announced_count = None;

        self.push_notice(format!("Connected to Room: {room_id}"));
        self.push_notice("Waiting for peer connection...");
        self.log_debug(DebugKind::Session, format!("Joined {room_id}"));
    }

    pub fn leave_room(&mut self) {
        if let Some(room_id) = self.room_id.take() {
            self.log_debug(DebugKind::Session, format!("Left {room_id}"));
        }
        self.screen = Screen::Join;
        self.messages.clear();
        self.peer_count = 0;
        self.announced_count = None;
    }

    pub fn handle(&mut self, event: UiEvent) {
        match event {
            UiEvent::Message(message) => {
                self.log_debug(
                    DebugKind::Message,
                    format!("{} from {}", message.id, message.sender_name),
                );
                self.messages.push(message);
            }
            UiEvent::PeerCount(count) => self.apply_peer_count(count),
        }
    }

    pub fn push_own(&mut self, payload: MessagePayload) {
        self.messages.push(DisplayMessage::from_self(payload));
    }

    /// The first count after joining is the baseline; later counts only add
    /// a notice when they differ from the last one announced.
    pub fn apply_peer_count(&mut self, count: usize) {
        self.peer_count = count;
        self.log_debug(DebugKind::PeerCount, format!("peer count {count}"));

        match self.announced_count {
            None => self.announced_count = Some(count),
            Some(previous) if previous != count => {
                self.announced_count = Some(count);
                let noun = if count == 1 { "peer" } else { "peers" };
                self.push_notice(format!("{count} {noun} connected"));
            }
            Some(_) => {}
        }
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.notice_seq += 1;
        let id = format!("sys-{}", self.notice_seq);
        self.messages
            .push(DisplayMessage::system(id, text, Utc::now().timestamp_millis()));
    }

    pub fn log_debug(&mut self, kind: DebugKind, message: impl Into<String>) {
        if self.debug_events.len() == MAX_DEBUG_EVENTS {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(DebugEvent {
            timestamp: Local::now(),
            kind,
            message: message.into(),
        });
    }

    pub fn assistant_history(&self) -> Vec<AssistantTurn> {
        assistant_history(&self.messages)
    }

    pub fn transcript(&self) -> String {
        transcript(&self.messages)
    }
}
