use eframe::egui;

use crate::ui::state::ChatState;

pub enum SidebarAction {
    Leave,
    CopyTranscript,
    AddBootstrap(String),
    ToggleDebug,
}

pub fn render(ui: &mut egui::Ui, state: &mut ChatState) -> Option<SidebarAction> {
    let mut action = None;

    ui.heading("Room");
    ui.separator();

    if let Some(room_id) = &state.room_id {
        ui.label(egui::RichText::new(room_id).strong());
    }
    if let Some(identity) = &state.identity {
        ui.label(egui::RichText::new(format!("as {}", identity.display_name)).weak());
    }

    ui.horizontal(|ui| {
        let color = if state.peer_count > 0 {
            egui::Color32::GREEN
        } else {
            egui::Color32::GRAY
        };
        ui.colored_label(color, "●");
        ui.label(format!("{} peers", state.peer_count));
    });

    ui.separator();
    if ui.button("Leave room").clicked() {
        action = Some(SidebarAction::Leave);
    }
    if ui.button("Copy transcript").clicked() {
        action = Some(SidebarAction::CopyTranscript);
    }
    if ui.button("Debug panel").clicked() {
        action = Some(SidebarAction::ToggleDebug);
    }

    ui.separator();
    ui.label("Bootstrap node");
    ui.text_edit_singleline(&mut state.bootstrap_input);
    if ui.button("Save").clicked() && !state.bootstrap_input.trim().is_empty() {
        let entry = std::mem::take(&mut state.bootstrap_input);
        action = Some(SidebarAction::AddBootstrap(entry.trim().to_string()));
    }

    action
}
