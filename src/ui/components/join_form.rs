use eframe::egui;

use crate::ui::state::ChatState;

/// Returns true when the user asked to join with a non-blank room.
pub fn render(ui: &mut egui::Ui, state: &mut ChatState) -> bool {
    let mut join = false;

    ui.vertical_centered(|ui| {
        ui.add_space(40.0);
        ui.heading("roomlink");
        ui.label("Serverless room chat: same-process and peer-to-peer at once.");
        ui.add_space(20.0);

        egui::Grid::new("join_grid").num_columns(2).show(ui, |ui| {
            ui.label("Display name");
            ui.text_edit_singleline(&mut state.name_input);
            ui.end_row();

            ui.label("Room");
            let response = ui.text_edit_singleline(&mut state.room_input);
            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                join = true;
            }
            ui.end_row();
        });

        ui.add_space(10.0);
        let ready = !state.room_input.trim().is_empty();
        if ui.add_enabled(ready, egui::Button::new("Join room")).clicked() {
            join = true;
        }
        ui.label(
            egui::RichText::new("Everyone who enters the same room id ends up in the same chat.")
                .weak(),
        );
    });

    join && !state.room_input.trim().is_empty()
}
