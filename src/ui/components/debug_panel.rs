use eframe::egui;

use crate::ui::state::{ChatState, DebugKind};

pub fn render(ui: &mut egui::Ui, state: &ChatState) {
    ui.heading("Debug Info");
    ui.separator();

    ui.horizontal(|ui| {
        ui.label("Peer count:");
        ui.label(state.peer_count.to_string());
    });
    ui.horizontal(|ui| {
        ui.label("Messages shown:");
        ui.label(state.messages.len().to_string());
    });
    ui.horizontal(|ui| {
        ui.label("Assistant turns:");
        ui.label(state.assistant_history().len().to_string());
    });

    ui.separator();
    ui.label("Recent Events:");
    egui::ScrollArea::vertical()
        .max_height(200.0)
        .show(ui, |ui| {
            for event in state.debug_events.iter().rev().take(20) {
                let color = match event.kind {
                    DebugKind::Session => egui::Color32::YELLOW,
                    DebugKind::Message => egui::Color32::WHITE,
                    DebugKind::PeerCount => egui::Color32::GREEN,
                    DebugKind::Config => egui::Color32::LIGHT_BLUE,
                };

                ui.horizontal(|ui| {
                    ui.colored_label(color, format!("[{}]", event.timestamp.format("%H:%M:%S")));
                    ui.label(&event.message);
                });
            }
        });
}
