// src/ui.rs - HUD drawn over the composited view
use crate::overlay::AssetStatus;
use crate::scheduler::{PipelineStatus, SchedulerState};
use crate::tracking::Handedness;
use chrono::{DateTime, Local};
use eframe::egui::{self, Color32, Pos2, Rect, Stroke, Vec2};

#[derive(Debug, Clone)]
pub struct Theme {
    pub primary: Color32,
    pub secondary: Color32,
    pub background: Color32,
    pub surface: Color32,
    pub error: Color32,
    pub warning: Color32,
    pub success: Color32,
    pub text_primary: Color32,
    pub text_secondary: Color32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: Color32::from_rgb(70, 130, 240),
            secondary: Color32::from_rgb(255, 152, 0),
            background: Color32::from_rgb(20, 20, 25),
            surface: Color32::from_rgb(30, 30, 35),
            error: Color32::from_rgb(244, 67, 54),
            warning: Color32::from_rgb(255, 152, 0),
            success: Color32::from_rgb(76, 175, 80),
            text_primary: Color32::WHITE,
            text_secondary: Color32::from_rgb(200, 200, 200),
        }
    }
}

pub struct HudComponents {
    pub theme: Theme,
    session_start: DateTime<Local>,
    spinner_phase: f32,
}

impl HudComponents {
    pub fn new() -> Self {
        Self {
            theme: Theme::default(),
            session_start: Local::now(),
            spinner_phase: 0.0,
        }
    }

    pub fn draw_status_panel(&mut self, ctx: &egui::Context, status: &PipelineStatus, render_fps: f32) {
        let elapsed = Local::now()
            .signed_duration_since(self.session_start)
            .to_std()
            .unwrap_or_default();

        egui::Window::new("Wrist Overlay")
            .anchor(egui::Align2::LEFT_TOP, [12.0, 12.0])
            .resizable(false)
            .collapsible(true)
            .show(ctx, |ui| {
                ui.label(
                    egui::RichText::new(format!(
                        "Session {}  ({:02}:{:02})",
                        self.session_start.format("%H:%M:%S"),
                        elapsed.as_secs() / 60,
                        elapsed.as_secs() % 60
                    ))
                    .color(self.theme.text_secondary),
                );
                ui.separator();

                if let Some(reason) = &status.stopped {
                    ui.colored_label(self.theme.error, format!("Tracking stopped: {}", reason));
                    ui.separator();
                }

                let (state_text, state_color) = match status.state {
                    SchedulerState::Idle => ("Idle", self.theme.text_secondary),
                    SchedulerState::Streaming => ("Streaming", self.theme.success),
                };
                self.status_row(ui, "Camera", state_text, state_color);

                if status.detector_ready {
                    self.status_row(ui, "Detector", "Ready", self.theme.success);
                } else if status.stopped.is_none() {
                    ui.horizontal(|ui| {
                        ui.label("Detector");
                        self.draw_spinner(ui, self.theme.warning);
                        ui.colored_label(self.theme.warning, "Initializing");
                    });
                }

                let (asset_text, asset_color) = match status.asset {
                    AssetStatus::Loading => ("Loading", self.theme.warning),
                    AssetStatus::Ready => ("Ready", self.theme.success),
                    AssetStatus::Failed => ("Unavailable", self.theme.error),
                };
                self.status_row(ui, "Overlay", asset_text, asset_color);

                let (hand_text, hand_color) = if status.hand_visible {
                    ("Visible", self.theme.success)
                } else {
                    ("Not found", self.theme.text_secondary)
                };
                self.status_row(ui, "Hand", hand_text, hand_color);
                if status.hand_visible {
                    let side = match status.handedness {
                        Some(Handedness::Left) => "left",
                        Some(Handedness::Right) => "right",
                        None => "unknown side",
                    };
                    ui.label(
                        egui::RichText::new(format!(
                            "{} hand, score {:.2}, {} landmarks{}",
                            side,
                            status.hand_score,
                            status.landmark_count,
                            if status.world_landmarks { " + 3D" } else { "" }
                        ))
                        .color(self.theme.text_secondary),
                    );
                }

                ui.separator();
                ui.label(format!("Render: {:.1} fps", render_fps));
                ui.label(format!("Detection: {:.1} fps", status.detection_fps));
                ui.label(format!(
                    "Frames: {} seen, {} dropped",
                    status.frames_seen, status.frames_dropped
                ));

                let attempts = status.detections + status.misses;
                let hit_rate = if attempts > 0 {
                    status.detections as f32 / attempts as f32
                } else {
                    0.0
                };
                self.draw_confidence_bar(ui, "Hit rate", hit_rate);

                if let Some(pose) = status.last_pose {
                    ui.label(
                        egui::RichText::new(format!(
                            "Wrist ({:.1}, {:.1}, {:.1})",
                            pose.position.x, pose.position.y, pose.position.z
                        ))
                        .monospace(),
                    );
                }
            });
    }

    fn status_row(&self, ui: &mut egui::Ui, label: &str, value: &str, color: Color32) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.colored_label(color, value);
        });
    }

    fn draw_spinner(&mut self, ui: &mut egui::Ui, color: Color32) {
        self.spinner_phase += ui.input(|i| i.unstable_dt) * 4.0;
        let (rect, _) = ui.allocate_exact_size(Vec2::splat(14.0), egui::Sense::hover());
        let start = self.spinner_phase % std::f32::consts::TAU;
        draw_arc(ui.painter(), rect.center(), 5.0, start, start + 4.0, color, 2.0);
    }

    pub fn draw_confidence_bar(&self, ui: &mut egui::Ui, label: &str, value: f32) {
        ui.horizontal(|ui| {
            ui.label(label);

            let bar_width = 140.0;
            let bar_height = 16.0;
            let rect = ui.allocate_space(Vec2::new(bar_width, bar_height)).1;

            let painter = ui.painter();
            painter.rect_filled(rect, egui::Rounding::same(4.0), self.theme.surface);

            let fill_rect = Rect::from_min_size(rect.min, Vec2::new(bar_width * value, bar_height));
            let color = if value > 0.7 {
                self.theme.success
            } else if value > 0.4 {
                self.theme.warning
            } else {
                self.theme.error
            };
            painter.rect_filled(fill_rect, egui::Rounding::same(4.0), color);

            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                format!("{:.0}%", value * 100.0),
                egui::FontId::proportional(11.0),
                self.theme.text_primary,
            );
        });
    }

    /// Marks where the overlay is anchored on screen.
    pub fn draw_crosshair(&self, painter: &egui::Painter, at: Pos2, visible: bool) {
        let color = if visible {
            self.theme.primary
        } else {
            self.theme.text_secondary.gamma_multiply(0.5)
        };
        let stroke = Stroke::new(1.5, color);
        let arm = 10.0;
        painter.line_segment([at - Vec2::X * arm, at + Vec2::X * arm], stroke);
        painter.line_segment([at - Vec2::Y * arm, at + Vec2::Y * arm], stroke);
        painter.circle_stroke(at, arm * 0.6, stroke);
    }

    pub fn draw_no_signal(&self, painter: &egui::Painter, rect: Rect) {
        painter.rect_filled(rect, 0.0, self.theme.background);
        painter.text(
            rect.center(),
            egui::Align2::CENTER_CENTER,
            "Waiting for camera",
            egui::FontId::proportional(18.0),
            self.theme.text_secondary,
        );
    }
}

fn draw_arc(
    painter: &egui::Painter,
    center: Pos2,
    radius: f32,
    start_angle: f32,
    end_angle: f32,
    color: Color32,
    thickness: f32,
) {
    let points_count = ((end_angle - start_angle).abs() * 8.0).max(2.0) as usize;
    let points: Vec<Pos2> = (0..=points_count)
        .map(|i| {
            let t = i as f32 / points_count as f32;
            let angle = start_angle + (end_angle - start_angle) * t;
            Pos2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect();
    painter.add(egui::Shape::line(points, Stroke::new(thickness, color)));
}
