// src/pipeline.rs - Startup wiring between capture, detection and the render side
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::geometry::CameraParams;
use crate::overlay::{OverlayObject, OverlaySnapshot};
use crate::scheduler::{FrameScheduler, PipelineStatus};
use crate::tracking::{SimulatedDetector, SimulationConfig};
use crate::video::{spawn_capture, VideoFrame, VideoSource};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Render-side handles to a running detection session.
pub struct Pipeline {
    pub backdrop: watch::Receiver<Option<VideoFrame>>,
    pub overlay: watch::Receiver<OverlaySnapshot>,
    pub status: watch::Receiver<PipelineStatus>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl Pipeline {
    /// Starts the asset load and detector initialization, then opens the video
    /// source. Failing to open the source is fatal; the other two report
    /// through the status channel once streaming.
    pub async fn start(
        config: &AppConfig,
        camera: watch::Receiver<CameraParams>,
    ) -> Result<Self, PipelineError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (backdrop_tx, backdrop_rx) = watch::channel(None);

        let (overlay, overlay_rx) = OverlayObject::spawn_load(&config.overlay);
        let (mut scheduler, status_rx) = FrameScheduler::<SimulatedDetector>::new(
            SimulationConfig::from_settings(&config.detector),
            overlay,
            camera,
            config.camera.compositing_depth,
            config.overlay.smoothing_alpha,
            shutdown_rx.clone(),
        );

        let source = VideoSource::from_config(&config.video);
        let stream = spawn_capture(source, backdrop_tx, shutdown_rx).await?;
        scheduler.start(stream)?;

        tracing::info!("Tracking session started");
        let task = tokio::spawn(scheduler.run());
        Ok(Self {
            backdrop: backdrop_rx,
            overlay: overlay_rx,
            status: status_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signals shutdown and waits for the scheduler to finish.
    pub async fn join(&mut self) -> Result<(), PipelineError> {
        self.shutdown();
        match self.task.take() {
            Some(task) => task.await.map_err(|_| PipelineError::SchedulerTask)?,
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
