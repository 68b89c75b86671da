use eframe::egui;
use roomlink::config::{self, AppConfig};
use roomlink::{Identity, LocalBus, SessionManager, Teardown};
use tokio::sync::mpsc;

use super::components::sidebar::SidebarAction;
use super::components::{chat_area, debug_panel, input_bar, join_form, sidebar};
use super::state::{ChatState, DebugKind, Screen, UiEvent};

pub struct ChatApp {
    state: ChatState,
    config_path: String,
    config: AppConfig,
    bus: LocalBus,
    manager: SessionManager,
    /// Set when the config changed; the next join rebuilds the manager.
    stale_manager: bool,
    teardown: Option<Teardown>,
    event_sender: mpsc::UnboundedSender<UiEvent>,
    event_receiver: mpsc::UnboundedReceiver<UiEvent>,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        config_path: String,
        config: AppConfig,
        bus: LocalBus,
        room: Option<String>,
        name: Option<String>,
    ) -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let manager = SessionManager::from_config(&config, Some(bus.clone()));
        Self {
            state: ChatState::new(room, name),
            config_path,
            config,
            bus,
            manager,
            stale_manager: false,
            teardown: None,
            event_sender,
            event_receiver,
        }
    }

    fn handle_session_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            self.state.handle(event);
        }
    }

    fn join(&mut self, ctx: &egui::Context) {
        let room_id = self.state.room_input.trim().to_string();
        let name = match self.state.name_input.trim() {
            "" => "Anonymous".to_string(),
            name => name.to_string(),
        };

        if self.stale_manager {
            self.manager = SessionManager::from_config(&self.config, Some(self.bus.clone()));
            self.stale_manager = false;
        }

        // Drop anything still queued from a previous room.
        while self.event_receiver.try_recv().is_ok() {}

        let identity = Identity::generate(name);
        self.state.enter_room(&room_id, identity.clone());

        let messages = self.event_sender.clone();
        let counts = self.event_sender.clone();
        let message_ctx = ctx.clone();
        let count_ctx = ctx.clone();
        let teardown = self.manager.join(
            room_id,
            identity,
            move |message| {
                if messages.send(UiEvent::Message(message)).is_ok() {
                    message_ctx.request_repaint();
                }
            },
            move |count| {
                if counts.send(UiEvent::PeerCount(count)).is_ok() {
                    count_ctx.request_repaint();
                }
            },
        );
        self.teardown = Some(teardown);
    }

    fn leave(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown.run();
        }
        self.state.leave_room();
    }

    fn send(&mut self, text: String) {
        match self.manager.send(&text) {
            Some(payload) => self.state.push_own(payload),
            None => log::warn!("Message not sent: no active session"),
        }
    }

    fn add_bootstrap(&mut self, entry: String) {
        match config::add_bootstrap_node(&self.config_path, &entry) {
            Ok(config) => {
                self.config = config;
                self.stale_manager = true;
                self.state
                    .log_debug(DebugKind::Config, format!("Saved bootstrap node {entry}"));
                self.state
                    .push_notice("Bootstrap node saved; it is used from the next join.");
            }
            Err(err) => {
                log::warn!("Bootstrap node rejected: {err}");
                self.state.push_notice(format!("Bootstrap node rejected: {err}"));
            }
        }
    }

    fn show_join(&mut self, ctx: &egui::Context) {
        let mut join = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            join = join_form::render(ui, &mut self.state);
        });
        if join {
            self.join(ctx);
        }
    }

    fn show_chat(&mut self, ctx: &egui::Context) {
        let mut action = None;
        egui::SidePanel::left("room_sidebar").show(ctx, |ui| {
            action = sidebar::render(ui, &mut self.state);
        });

        if self.state.show_debug {
            egui::SidePanel::right("debug_panel").show(ctx, |ui| {
                debug_panel::render(ui, &self.state);
            });
        }

        let mut outgoing = None;
        egui::CentralPanel::default().show(ctx, |ui| {
            chat_area::render(ui, &self.state.messages);
            ui.separator();
            outgoing = input_bar::render(ui, &mut self.state.input_text);
        });

        if let Some(text) = outgoing {
            self.send(text);
        }
        match action {
            Some(SidebarAction::Leave) => self.leave(),
            Some(SidebarAction::CopyTranscript) => {
                ctx.copy_text(self.state.transcript());
                self.state.log_debug(DebugKind::Session, "Transcript copied");
            }
            Some(SidebarAction::AddBootstrap(entry)) => self.add_bootstrap(entry),
            Some(SidebarAction::ToggleDebug) => self.state.show_debug = !self.state.show_debug,
            None => {}
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_session_events();

        match self.state.screen {
            Screen::Join => self.show_join(ctx),
            Screen::Chat => self.show_chat(ctx),
        }
    }
}
