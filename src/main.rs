// src/main.rs
mod app;
mod config;
mod error;
mod geometry;
mod mapping;
mod overlay;
mod pipeline;
mod scene;
mod scheduler;
mod smoothing;
mod tracking;
mod ui;
mod video;

use anyhow::Context as _;
use config::AppConfig;
use eframe::egui;
use pipeline::Pipeline;
use scene::SceneHost;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load().context("loading configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("tracking")
        .enable_all()
        .build()
        .context("starting async runtime")?;

    // The scene host owns the camera; the pipeline only follows it.
    let (scene, camera_rx) = SceneHost::new(&config);
    let pipeline = runtime
        .block_on(Pipeline::start(&config, camera_rx))
        .context("starting tracking pipeline")?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Wrist Overlay")
            .with_inner_size([config.camera.initial_width, config.camera.initial_height])
            .with_min_inner_size([320.0, 240.0]),
        centered: true,
        ..Default::default()
    };

    eframe::run_native(
        "Wrist Overlay",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(create_visuals());
            Box::new(app::WristOverlayApp::new(scene, pipeline, runtime))
        }),
    )
    .map_err(|e| anyhow::anyhow!("running window: {}", e))?;

    tracing::info!("Exited cleanly");
    Ok(())
}

fn create_visuals() -> egui::Visuals {
    let mut visuals = egui::Visuals::dark();

    visuals.widgets.noninteractive.bg_fill = egui::Color32::from_rgb(30, 30, 35);
    visuals.widgets.inactive.bg_fill = egui::Color32::from_rgb(45, 45, 52);
    visuals.widgets.hovered.bg_fill = egui::Color32::from_rgb(55, 55, 65);
    visuals.widgets.active.bg_fill = egui::Color32::from_rgb(70, 130, 240);

    visuals.widgets.noninteractive.rounding = egui::Rounding::same(8.0);
    visuals.widgets.inactive.rounding = egui::Rounding::same(8.0);
    visuals.widgets.hovered.rounding = egui::Rounding::same(8.0);
    visuals.widgets.active.rounding = egui::Rounding::same(8.0);

    visuals.window_rounding = egui::Rounding::same(12.0);
    visuals.window_fill = egui::Color32::from_rgba_unmultiplied(20, 20, 25, 220);

    visuals
}
