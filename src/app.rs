// src/app.rs
use crate::pipeline::Pipeline;
use crate::scene::SceneHost;
use crate::scheduler::LoopMetrics;
use crate::ui::HudComponents;

use eframe::egui;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

pub struct WristOverlayApp {
    scene: SceneHost,
    // Dropped before the runtime so the shutdown signal goes out first.
    pipeline: Pipeline,
    runtime: Runtime,

    backdrop_texture: Option<egui::TextureHandle>,
    backdrop_index: Option<u64>,

    hud: HudComponents,
    render_metrics: LoopMetrics,
}

impl WristOverlayApp {
    pub fn new(scene: SceneHost, pipeline: Pipeline, runtime: Runtime) -> Self {
        Self {
            scene,
            pipeline,
            runtime,
            backdrop_texture: None,
            backdrop_index: None,
            hud: HudComponents::new(),
            render_metrics: LoopMetrics::new(60),
        }
    }

    /// Re-uploads the backdrop texture when a new camera frame is available.
    fn upload_backdrop(&mut self, ctx: &egui::Context) {
        let frame = match self.pipeline.backdrop.borrow().as_ref() {
            Some(frame) if Some(frame.index) != self.backdrop_index => frame.clone(),
            _ => return,
        };
        let image = egui::ColorImage::from_rgba_unmultiplied(
            [frame.width() as usize, frame.height() as usize],
            frame.image.as_raw(),
        );
        match &mut self.backdrop_texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.backdrop_texture =
                    Some(ctx.load_texture("backdrop", image, egui::TextureOptions::LINEAR));
            }
        }
        self.backdrop_index = Some(frame.index);
    }

    fn render_scene(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let rect = ui.max_rect();
                self.scene.resize(rect.width(), rect.height());
                self.upload_backdrop(ctx);

                let painter = ui.painter();
                let backdrop = self
                    .backdrop_texture
                    .as_ref()
                    .and_then(|texture| self.scene.backdrop_mesh(texture.id(), rect));
                match backdrop {
                    Some(mesh) => {
                        painter.rect_filled(rect, 0.0, self.hud.theme.background);
                        painter.add(egui::Shape::mesh(mesh));
                    }
                    None => self.hud.draw_no_signal(painter, rect),
                }

                let snapshot = self.pipeline.overlay.borrow().clone();
                if let Some(mesh) = self.scene.overlay_mesh(&snapshot, rect) {
                    painter.add(egui::Shape::mesh(mesh));
                }

                let status = self.pipeline.status.borrow();
                if let Some(anchor) = status
                    .last_pose
                    .and_then(|pose| self.scene.project(&pose.position))
                {
                    self.hud
                        .draw_crosshair(painter, rect.min + anchor.to_vec2(), status.hand_visible);
                }
            });
    }
}

impl eframe::App for WristOverlayApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        self.render_metrics.tick(Instant::now());
        self.render_scene(ctx);

        let mut status = self.pipeline.status.borrow().clone();
        if status.stopped.is_none() && !self.pipeline.is_running() {
            status.stopped = Some("tracking task is no longer running".to_string());
        }
        self.hud
            .draw_status_panel(ctx, &status, self.render_metrics.fps());

        // Redraw every display refresh whether or not tracking produced anything new.
        ctx.request_repaint();
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        tracing::info!("Window closed, stopping tracking");
        let pipeline = &mut self.pipeline;
        let joined = self.runtime.block_on(async move {
            tokio::time::timeout(Duration::from_secs(2), pipeline.join()).await
        });
        match joined {
            Ok(Ok(())) => tracing::info!("Tracking stopped"),
            Ok(Err(e)) => tracing::error!("Tracking ended with an error: {}", e),
            Err(_) => tracing::warn!("Tracking did not stop within 2s"),
        }
    }
}
