use chrono::{Local, TimeZone};
use eframe::egui;
use roomlink::{DisplayMessage, OriginKind};

fn time_label(timestamp: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp)
        .single()
        .map(|time| time.format("%H:%M").to_string())
        .unwrap_or_default()
}

pub fn render(ui: &mut egui::Ui, messages: &[DisplayMessage]) {
    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .max_height(ui.available_height() - 40.0)
        .show(ui, |ui| {
            for message in messages {
                match message.origin {
                    OriginKind::System => {
                        ui.vertical_centered(|ui| {
                            ui.label(egui::RichText::new(&message.text).italics().weak());
                        });
                    }
                    OriginKind::SelfSent => {
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::TOP), |ui| {
                            ui.label(egui::RichText::new(time_label(message.timestamp)).weak());
                            ui.colored_label(egui::Color32::LIGHT_BLUE, &message.text);
                        });
                    }
                    OriginKind::Peer => {
                        ui.horizontal_wrapped(|ui| {
                            ui.strong(format!("{}:", message.sender_name));
                            ui.label(&message.text);
                            ui.label(egui::RichText::new(time_label(message.timestamp)).weak());
                        });
                    }
                }
            }
        });
}
