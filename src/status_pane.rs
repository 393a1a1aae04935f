// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::view::LoadStatus;

const ERROR_COLOR: egui::Color32 = egui::Color32::from_rgb(220, 100, 100);
const OK_COLOR: egui::Color32 = egui::Color32::from_rgb(100, 200, 120);
const MUTED_COLOR: egui::Color32 = egui::Color32::from_rgb(160, 170, 180);

#[derive(Debug)]
pub struct StatusPane {
    pub visible: bool,
}

impl Default for StatusPane {
    fn default() -> Self {
        Self { visible: true }
    }
}

impl StatusPane {
    /// Render the load status as a small floating window
    pub fn render(&mut self, ctx: &egui::Context, status: &LoadStatus) {
        // Hide once the data is on the map; failures stay up until dismissed
        if !self.visible || matches!(status, LoadStatus::Loaded { count } if *count > 0) {
            return;
        }

        egui::Window::new("Establishments")
            .title_bar(false)
            .anchor(egui::Align2::LEFT_BOTTOM, egui::vec2(10.0, -10.0))
            .resizable(false)
            .collapsible(false)
            .frame(egui::Frame::window(&ctx.style())
                .fill(egui::Color32::from_rgba_unmultiplied(25, 30, 35, 220))
                .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(60, 80, 100)))
                .corner_radius(6.0))
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    let (indicator, color) = status_indicator(status);
                    ui.label(egui::RichText::new(indicator).color(color).size(12.0));
                    ui.label(egui::RichText::new(status_text(status))
                        .color(egui::Color32::from_rgb(220, 225, 230))
                        .size(11.0));

                    if matches!(status, LoadStatus::Failed(_))
                        && ui.button(egui::RichText::new("✕").size(10.0))
                            .on_hover_text("Dismiss")
                            .clicked()
                    {
                        self.visible = false;
                    }
                });
            });
    }
}

fn status_indicator(status: &LoadStatus) -> (&'static str, egui::Color32) {
    match status {
        LoadStatus::NotStarted => ("○", MUTED_COLOR),
        LoadStatus::Loading => ("◐", MUTED_COLOR),
        LoadStatus::Loaded { .. } => ("●", OK_COLOR),
        LoadStatus::Failed(_) => ("●", ERROR_COLOR),
    }
}

pub fn status_text(status: &LoadStatus) -> String {
    match status {
        LoadStatus::NotStarted => "Waiting for map...".to_string(),
        LoadStatus::Loading => "Loading establishments...".to_string(),
        LoadStatus::Loaded { count: 0 } => "No establishments nearby".to_string(),
        LoadStatus::Loaded { count: 1 } => "1 establishment".to_string(),
        LoadStatus::Loaded { count } => format!("{count} establishments"),
        LoadStatus::Failed(e) => format!("Could not load establishments: {e}"),
    }
}
