use std::{sync::Arc, time::Duration};

use eframe::{
    egui::{self, Color32, RichText},
    App,
};
use swadge_flash::{DeviceView, Session, Severity};

pub const TITLE: &str = "ESP32-S2 Swadge Programmer";

/// Window showing one coloured row per attached Swadge.
pub struct ProgrammerApp {
    session: Arc<Session>,
    rows: Vec<DeviceView>,
}

impl ProgrammerApp {
    pub fn new(session: Arc<Session>) -> Self {
        let rows = session.snapshot();
        Self { session, rows }
    }
}

/// Background and text colour for a row.
pub fn row_colors(severity: Severity) -> (Color32, Color32) {
    match severity {
        Severity::Neutral => (Color32::GRAY, Color32::BLACK),
        Severity::Success => (Color32::DARK_GREEN, Color32::WHITE),
        Severity::Failure => (Color32::DARK_RED, Color32::WHITE),
    }
}

fn device_row(ui: &mut egui::Ui, row: &DeviceView, height: f32) {
    let (fill, text) = row_colors(row.severity);
    egui::Frame::default()
        .fill(fill)
        .inner_margin(egui::Margin::same(6))
        .show(ui, |ui| {
            ui.set_min_size(egui::vec2(ui.available_width(), (height - 12.0).max(0.0)));
            ui.vertical_centered(|ui| {
                ui.label(RichText::new(&row.text).color(text));
            });
        });
}

impl App for ProgrammerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.session.take_changed() {
            self.rows = self.session.snapshot();
        }

        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Exit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.rows.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.label("Connect a Swadge");
                });
                return;
            }
            let spacing = ui.spacing().item_spacing.y;
            let height = ui.available_height() / self.rows.len() as f32 - spacing;
            for row in &self.rows {
                device_row(ui, row, height);
            }
        });

        // workers change state off the UI thread
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
