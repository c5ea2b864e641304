// src/scheduler.rs - Per-frame detection loop: detect, map, smooth, place
use crate::error::PipelineError;
use crate::geometry::{extent_at_depth, CameraParams};
use crate::mapping::map_wrist_to_world;
use crate::overlay::{AssetStatus, OverlayObject};
use crate::smoothing::{PlacementSmoother, SmoothedPose};
use crate::tracking::{HandDetector, Handedness};
use crate::video::{FrameStream, VideoFrame};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Streaming,
}

/// What the HUD shows about the detection side.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub state: SchedulerState,
    pub detector_ready: bool,
    pub hand_visible: bool,
    pub frames_seen: u64,
    pub frames_dropped: u64,
    pub detections: u64,
    pub misses: u64,
    pub detection_fps: f32,
    pub last_pose: Option<SmoothedPose>,
    pub handedness: Option<Handedness>,
    pub hand_score: f32,
    pub landmark_count: usize,
    pub world_landmarks: bool,
    pub asset: AssetStatus,
    /// Set when the session ended on a fatal error.
    pub stopped: Option<String>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            detector_ready: false,
            hand_visible: false,
            frames_seen: 0,
            frames_dropped: 0,
            detections: 0,
            misses: 0,
            detection_fps: 0.0,
            last_pose: None,
            handedness: None,
            hand_score: 0.0,
            landmark_count: 0,
            world_landmarks: false,
            asset: AssetStatus::Loading,
            stopped: None,
        }
    }
}

/// Rolling average of the interval between loop iterations.
#[derive(Debug, Clone)]
pub struct LoopMetrics {
    frame_times: VecDeque<f32>,
    last_tick: Option<Instant>,
    capacity: usize,
}

impl LoopMetrics {
    pub fn new(capacity: usize) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(capacity),
            last_tick: None,
            capacity: capacity.max(1),
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(prev) = self.last_tick.replace(now) {
            self.frame_times.push_front(now.duration_since(prev).as_secs_f32());
            if self.frame_times.len() > self.capacity {
                self.frame_times.pop_back();
            }
        }
    }

    pub fn fps(&self) -> f32 {
        if self.frame_times.is_empty() {
            return 0.0;
        }
        let avg = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Detector still initializing; the frame was dropped.
    DetectorPending,
    NoHand,
    DetectionFailed,
    Placed(SmoothedPose),
}

enum DetectorSlot<D> {
    Initializing(JoinHandle<Result<D, crate::error::DetectorError>>),
    Ready(D),
}

enum Event<D> {
    Shutdown,
    DetectorInit(Result<D, PipelineError>),
    Frame(Option<VideoFrame>),
}

pub struct FrameScheduler<D: HandDetector> {
    state: SchedulerState,
    detector: DetectorSlot<D>,
    stream: Option<FrameStream>,
    camera: watch::Receiver<CameraParams>,
    compositing_depth: f32,
    smoother: PlacementSmoother,
    overlay: OverlayObject,
    shutdown: watch::Receiver<bool>,
    status: PipelineStatus,
    status_tx: watch::Sender<PipelineStatus>,
    metrics: LoopMetrics,
    session_start: Instant,
    last_timestamp: Option<Duration>,
    pending_drops: u64,
}

impl<D: HandDetector> FrameScheduler<D> {
    /// Kicks off detector initialization on the current runtime. Frames that
    /// arrive before it completes are dropped.
    pub fn new(
        detector_config: D::Config,
        overlay: OverlayObject,
        camera: watch::Receiver<CameraParams>,
        compositing_depth: f32,
        smoothing_alpha: f32,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, watch::Receiver<PipelineStatus>) {
        let init = tokio::spawn(D::create(detector_config));
        let (status_tx, status_rx) = watch::channel(PipelineStatus::default());
        (
            Self {
                state: SchedulerState::Idle,
                detector: DetectorSlot::Initializing(init),
                stream: None,
                camera,
                compositing_depth,
                smoother: PlacementSmoother::new(smoothing_alpha),
                overlay,
                shutdown,
                status: PipelineStatus::default(),
                status_tx,
                metrics: LoopMetrics::new(30),
                session_start: Instant::now(),
                last_timestamp: None,
                pending_drops: 0,
            },
            status_rx,
        )
    }

    #[cfg(test)]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[cfg(test)]
    pub fn current_pose(&self) -> Option<SmoothedPose> {
        self.smoother.current()
    }

    /// Idle -> Streaming. There is no way back.
    pub fn start(&mut self, stream: FrameStream) -> Result<(), PipelineError> {
        if self.state == SchedulerState::Streaming {
            return Err(PipelineError::AlreadyStreaming);
        }
        tracing::info!(
            "Frame scheduler streaming at {}x{}",
            stream.resolution.0,
            stream.resolution.1
        );
        self.stream = Some(stream);
        self.state = SchedulerState::Streaming;
        self.status.state = SchedulerState::Streaming;
        self.publish();
        Ok(())
    }

    /// Handles the newest frame, one at a time, until shutdown or
    /// the end of the stream. A failed detector initialization ends the run.
    pub async fn run(mut self) -> Result<(), PipelineError> {
        let mut stream = self.stream.take().ok_or(PipelineError::NotStreaming)?;

        let result = loop {
            if *self.shutdown.borrow() {
                tracing::info!("Frame scheduler shutting down");
                break Ok(());
            }

            let event = tokio::select! {
                biased;
                changed = self.shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => Event::Shutdown,
                },
                init = Self::wait_for_detector(&mut self.detector) => Event::DetectorInit(init),
                frame = stream.next_frame() => Event::Frame(frame),
            };
            let frame = match event {
                Event::Shutdown => {
                    tracing::info!("Shutdown signal dropped, stopping frame scheduler");
                    break Ok(());
                }
                Event::DetectorInit(Ok(detector)) => {
                    self.install_detector(detector);
                    continue;
                }
                Event::DetectorInit(Err(e)) => break Err(e),
                Event::Frame(Some(frame)) => frame,
                Event::Frame(None) => {
                    tracing::info!("Video stream ended");
                    break Ok(());
                }
            };

            self.overlay.poll_load();
            let outcome = self.process_frame(&frame);
            self.record(&frame, outcome, stream.dropped());
        };

        if let Err(e) = &result {
            tracing::error!("Tracking stopped: {}", e);
            self.status.stopped = Some(e.to_string());
            self.publish();
        }
        result
    }

    /// Resolves when initialization finishes. Never resolves once the
    /// detector is installed.
    async fn wait_for_detector(slot: &mut DetectorSlot<D>) -> Result<D, PipelineError> {
        match slot {
            DetectorSlot::Initializing(handle) => handle
                .await
                .map_err(|_| PipelineError::DetectorTask)?
                .map_err(PipelineError::DetectorInit),
            DetectorSlot::Ready(_) => std::future::pending().await,
        }
    }

    fn install_detector(&mut self, detector: D) {
        self.detector = DetectorSlot::Ready(detector);
        self.status.detector_ready = true;
        self.publish();
    }

    /// One synchronous pipeline step on a frame, assuming a ready detector.
    pub fn process_frame(&mut self, frame: &VideoFrame) -> FrameOutcome {
        let DetectorSlot::Ready(detector) = &mut self.detector else {
            return FrameOutcome::DetectorPending;
        };

        // Video-mode detectors need strictly increasing timestamps.
        let mut timestamp = frame.captured_at.saturating_duration_since(self.session_start);
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                timestamp = last + Duration::from_micros(1);
            }
        }
        self.last_timestamp = Some(timestamp);

        let hand = match detector.detect(frame, timestamp) {
            Ok(hand) => hand,
            Err(e) => {
                tracing::warn!("Detection failed, keeping previous pose: {}", e);
                return FrameOutcome::DetectionFailed;
            }
        };
        if let Some(hand) = &hand {
            self.status.handedness = hand.handedness;
            self.status.hand_score = hand.score;
            self.status.landmark_count = hand.landmarks.len();
            self.status.world_landmarks = hand.world_landmarks.is_some();
        }
        let Some(wrist) = hand.and_then(|h| h.wrist()) else {
            tracing::debug!("No hand on frame {}", frame.index);
            return FrameOutcome::NoHand;
        };

        // Read the projection every frame; the window may have been resized.
        let camera = *self.camera.borrow();
        let extent = extent_at_depth(&camera, self.compositing_depth);
        let target = map_wrist_to_world(&wrist, &extent, self.compositing_depth);
        let pose = self.smoother.update(&target);
        self.overlay.apply_pose(&pose);
        tracing::trace!(
            "Frame {}: wrist ({:.3}, {:.3}) -> ({:.1}, {:.1}, {:.1})",
            frame.index,
            wrist.x,
            wrist.y,
            pose.position.x,
            pose.position.y,
            pose.position.z
        );
        FrameOutcome::Placed(pose)
    }

    fn record(&mut self, frame: &VideoFrame, outcome: FrameOutcome, capture_drops: u64) {
        let status = &mut self.status;
        status.frames_seen += 1;
        match outcome {
            FrameOutcome::DetectorPending => {
                self.pending_drops += 1;
                tracing::trace!("Detector not ready, dropping frame {}", frame.index);
            }
            FrameOutcome::NoHand | FrameOutcome::DetectionFailed => {
                status.misses += 1;
                status.hand_visible = false;
                self.metrics.tick(Instant::now());
            }
            FrameOutcome::Placed(pose) => {
                status.detections += 1;
                status.hand_visible = true;
                status.last_pose = Some(pose);
                self.metrics.tick(Instant::now());
            }
        }
        status.frames_dropped = capture_drops + self.pending_drops;
        status.detection_fps = self.metrics.fps();
        status.asset = self.overlay.status();
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorSettings, OverlayConfig};
    use crate::error::DetectorError;
    use crate::mapping::NormalizedLandmark;
    use crate::tracking::{HandLandmarks, SimulatedDetector, SimulationConfig};
    use crate::video::{spawn_capture, VideoSource};
    use image::RgbaImage;
    use nalgebra::Point3;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// Replays a fixed list of wrist positions, one per frame.
    struct ScriptedDetector {
        script: VecDeque<Option<(f32, f32)>>,
    }

    impl HandDetector for ScriptedDetector {
        type Config = Vec<Option<(f32, f32)>>;

        fn create(
            config: Self::Config,
        ) -> impl std::future::Future<Output = Result<Self, DetectorError>> + Send {
            async move {
                Ok(Self {
                    script: config.into(),
                })
            }
        }

        fn detect(
            &mut self,
            _frame: &VideoFrame,
            _timestamp: Duration,
        ) -> Result<Option<HandLandmarks>, DetectorError> {
            Ok(self.script.pop_front().flatten().map(|(x, y)| HandLandmarks {
                landmarks: vec![NormalizedLandmark::new(x, y)],
                world_landmarks: None,
                handedness: None,
                score: 1.0,
            }))
        }
    }

    fn camera() -> CameraParams {
        CameraParams {
            fov_degrees: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }

    fn overlay_config(path: PathBuf) -> OverlayConfig {
        OverlayConfig {
            asset_path: path,
            ..OverlayConfig::default()
        }
    }

    fn bundled_asset() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/bracelet.json")
    }

    fn frame(index: u64) -> VideoFrame {
        VideoFrame {
            index,
            captured_at: Instant::now(),
            image: Arc::new(RgbaImage::new(2, 2)),
        }
    }

    async fn scripted(
        script: Vec<Option<(f32, f32)>>,
        alpha: f32,
    ) -> (
        FrameScheduler<ScriptedDetector>,
        watch::Sender<CameraParams>,
        watch::Sender<bool>,
    ) {
        let missing = PathBuf::from("/nonexistent/asset.json");
        let (overlay, _snap) = OverlayObject::spawn_load(&overlay_config(missing));
        let (camera_tx, camera_rx) = watch::channel(camera());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut scheduler, _status) =
            FrameScheduler::<ScriptedDetector>::new(script, overlay, camera_rx, 500.0, alpha, shutdown_rx);
        let detector = FrameScheduler::wait_for_detector(&mut scheduler.detector)
            .await
            .unwrap();
        scheduler.install_detector(detector);
        (scheduler, camera_tx, shutdown_tx)
    }

    fn placed(outcome: FrameOutcome) -> SmoothedPose {
        match outcome {
            FrameOutcome::Placed(pose) => pose,
            other => panic!("expected a placement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stationary_hand_is_already_converged() {
        let (mut scheduler, _cam, _shutdown) =
            scripted(vec![Some((0.6, 0.4)), Some((0.6, 0.4))], 0.35).await;
        let first = placed(scheduler.process_frame(&frame(0)));
        let second = placed(scheduler.process_frame(&frame(1)));
        assert!((first.position - second.position).norm() < 1e-4);

        let extent = extent_at_depth(&camera(), 500.0);
        let expected = Point3::new(0.1 * extent.width, 0.1 * extent.height, -500.0);
        assert!((first.position - expected).norm() < 1e-3);
    }

    #[tokio::test]
    async fn missed_frames_hold_the_pose() {
        let (mut scheduler, _cam, _shutdown) =
            scripted(vec![Some((0.3, 0.7)), None, None, None], 0.35).await;
        let pose = placed(scheduler.process_frame(&frame(0)));
        for i in 1..4 {
            assert_eq!(scheduler.process_frame(&frame(i)), FrameOutcome::NoHand);
            assert_eq!(scheduler.current_pose(), Some(pose));
        }
    }

    #[tokio::test]
    async fn mapping_follows_camera_aspect() {
        let (mut scheduler, camera_tx, _shutdown) =
            scripted(vec![Some((1.0, 0.5)), Some((1.0, 0.5))], 1.0).await;
        let wide = placed(scheduler.process_frame(&frame(0)));
        camera_tx.send_modify(|c| c.aspect = 1.0);
        let square = placed(scheduler.process_frame(&frame(1)));
        let height = extent_at_depth(&camera(), 500.0).height;
        assert!((wide.position.x - height * 16.0 / 9.0 / 2.0).abs() < 1e-2);
        assert!((square.position.x - height / 2.0).abs() < 1e-2);
    }

    #[tokio::test]
    async fn start_only_once() {
        let (mut scheduler, _cam, _shutdown) = scripted(vec![], 0.5).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let (_tx, shutdown_rx) = watch::channel(false);
        let source = VideoSource::Synthetic { width: 8, height: 8, fps: 60 };
        let (backdrop_tx, _backdrop_rx) = watch::channel(None);
        let stream = spawn_capture(source, backdrop_tx, shutdown_rx.clone()).await.unwrap();
        scheduler.start(stream).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Streaming);
        let (backdrop_tx, _backdrop_rx) = watch::channel(None);
        let again = spawn_capture(source, backdrop_tx, shutdown_rx).await.unwrap();
        assert!(matches!(scheduler.start(again), Err(PipelineError::AlreadyStreaming)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn simulated_session_places_overlay_and_stops_on_shutdown() {
        let settings = DetectorSettings {
            warmup_ms: 50,
            dropout_period: 4,
            ..DetectorSettings::default()
        };
        let (overlay, snapshot_rx) = OverlayObject::spawn_load(&overlay_config(bundled_asset()));
        let (_camera_tx, camera_rx) = watch::channel(camera());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut scheduler, mut status_rx) = FrameScheduler::<SimulatedDetector>::new(
            SimulationConfig::from_settings(&settings),
            overlay,
            camera_rx,
            500.0,
            0.35,
            shutdown_rx.clone(),
        );

        let (backdrop_tx, _backdrop_rx) = watch::channel(None);
        let source = VideoSource::Synthetic { width: 32, height: 24, fps: 120 };
        let stream = spawn_capture(source, backdrop_tx, shutdown_rx).await.unwrap();
        scheduler.start(stream).unwrap();
        let task = tokio::spawn(scheduler.run());

        let status = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                status_rx.changed().await.unwrap();
                let status = status_rx.borrow().clone();
                if status.misses > 0 && status.detections > 3 && status.asset == AssetStatus::Ready {
                    break status;
                }
            }
        })
        .await
        .expect("pipeline never produced a pose");

        assert!(status.detector_ready);
        assert!(status.frames_dropped > 0, "warm-up frames should be dropped");
        let pose = status.last_pose.unwrap();
        assert!((pose.position.z + 500.0).abs() < 1e-3);
        assert!(snapshot_rx.borrow().is_drawable());

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failed_detector_init_is_fatal() {
        let mut settings = DetectorSettings::default();
        settings.num_hands = 2;
        let (overlay, _snap) = OverlayObject::spawn_load(&overlay_config(bundled_asset()));
        let (_camera_tx, camera_rx) = watch::channel(camera());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut scheduler, status_rx) = FrameScheduler::<SimulatedDetector>::new(
            SimulationConfig::from_settings(&settings),
            overlay,
            camera_rx,
            500.0,
            0.35,
            shutdown_rx.clone(),
        );
        let (backdrop_tx, _backdrop_rx) = watch::channel(None);
        let source = VideoSource::Synthetic { width: 8, height: 8, fps: 60 };
        scheduler
            .start(spawn_capture(source, backdrop_tx, shutdown_rx).await.unwrap())
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .unwrap();
        assert!(matches!(result, Err(PipelineError::DetectorInit(_))));
        assert!(status_rx.borrow().stopped.is_some());
    }

    #[tokio::test]
    async fn failed_detector_init_is_reported_without_frames() {
        let mut settings = DetectorSettings::default();
        settings.warmup_ms = 0;
        settings.outputs.landmarks = false;
        let (overlay, _snap) = OverlayObject::spawn_load(&overlay_config(bundled_asset()));
        let (_camera_tx, camera_rx) = watch::channel(camera());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut scheduler, status_rx) = FrameScheduler::<SimulatedDetector>::new(
            SimulationConfig::from_settings(&settings),
            overlay,
            camera_rx,
            500.0,
            0.35,
            shutdown_rx,
        );
        // The source is open but silent.
        let (_frames_tx, frames_rx) = watch::channel(None);
        scheduler.start(FrameStream::from_slot(frames_rx, (8, 8))).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), scheduler.run())
            .await
            .expect("init failure should end the run without any frame");
        assert!(matches!(result, Err(PipelineError::DetectorInit(_))));
        let status = status_rx.borrow().clone();
        assert!(status.stopped.is_some());
        assert_eq!(status.frames_seen, 0);
    }

    #[tokio::test]
    async fn ready_detector_is_published_before_first_frame() {
        let (overlay, _snap) = OverlayObject::spawn_load(&overlay_config(bundled_asset()));
        let (_camera_tx, camera_rx) = watch::channel(camera());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut scheduler, mut status_rx) = FrameScheduler::<ScriptedDetector>::new(
            vec![],
            overlay,
            camera_rx,
            500.0,
            0.35,
            shutdown_rx,
        );
        let (_frames_tx, frames_rx) = watch::channel(None);
        scheduler.start(FrameStream::from_slot(frames_rx, (8, 8))).unwrap();
        let task = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !status_rx.borrow_and_update().detector_ready {
                status_rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn hand_details_reach_the_status() {
        let (mut scheduler, _cam, _shutdown) = scripted(vec![Some((0.5, 0.5))], 0.5).await;
        let outcome = scheduler.process_frame(&frame(0));
        scheduler.record(&frame(0), outcome, 0);
        assert_eq!(scheduler.status.hand_score, 1.0);
        assert_eq!(scheduler.status.landmark_count, 1);
        assert!(!scheduler.status.world_landmarks);
        assert!(scheduler.status.handedness.is_none());
    }

    #[test]
    fn loop_metrics_average_interval() {
        let mut metrics = LoopMetrics::new(4);
        let start = Instant::now();
        assert_eq!(metrics.fps(), 0.0);
        for i in 0..6 {
            metrics.tick(start + Duration::from_millis(20 * i));
        }
        assert!((metrics.fps() - 50.0).abs() < 0.5);
    }
}
