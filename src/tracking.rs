// src/tracking.rs - Hand detector seam and the simulated detector
use crate::config::{Backend, DetectorOutputs, DetectorSettings, RunningMode};
use crate::error::DetectorError;
use crate::mapping::NormalizedLandmark;
use crate::video::VideoFrame;
use std::future::Future;
use std::time::Duration;

pub const HAND_LANDMARK_COUNT: usize = 21;
pub const WRIST: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct HandLandmarks {
    pub landmarks: Vec<NormalizedLandmark>,
    /// Hand-centered metric coordinates, when the detector was asked for them.
    pub world_landmarks: Option<Vec<[f32; 3]>>,
    pub handedness: Option<Handedness>,
    pub score: f32,
}

impl HandLandmarks {
    pub fn wrist(&self) -> Option<NormalizedLandmark> {
        self.landmarks.get(WRIST).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub backend: Backend,
    pub running_mode: RunningMode,
    pub num_hands: usize,
    pub outputs: DetectorOutputs,
}

impl DetectorConfig {
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        Self {
            backend: settings.backend,
            running_mode: settings.running_mode,
            num_hands: settings.num_hands,
            outputs: settings.outputs,
        }
    }

    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.num_hands != 1 {
            return Err(DetectorError::Config(format!(
                "only single-hand tracking is supported, got num_hands = {}",
                self.num_hands
            )));
        }
        if !self.outputs.landmarks {
            return Err(DetectorError::Config(
                "the landmarks output is required to locate the wrist".to_string(),
            ));
        }
        Ok(())
    }
}

/// A landmark detector that must finish an async initialization before it can run.
pub trait HandDetector: Send + Sized + 'static {
    type Config: Send + 'static;

    fn create(config: Self::Config) -> impl Future<Output = Result<Self, DetectorError>> + Send;

    /// Runs on one frame. `Ok(None)` means no hand this frame.
    fn detect(
        &mut self,
        frame: &VideoFrame,
        timestamp: Duration,
    ) -> Result<Option<HandLandmarks>, DetectorError>;
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub detector: DetectorConfig,
    pub warmup: Duration,
    pub dropout_period: u64,
}

impl SimulationConfig {
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        Self {
            detector: DetectorConfig::from_settings(settings),
            warmup: Duration::from_millis(settings.warmup_ms),
            dropout_period: settings.dropout_period,
        }
    }
}

/// Produces a hand whose wrist sweeps a smooth figure over the image, driven
/// by the frame timestamp. Every `dropout_period`-th frame has no hand.
pub struct SimulatedDetector {
    config: DetectorConfig,
    dropout_period: u64,
    last_timestamp: Option<Duration>,
}

impl SimulatedDetector {
    pub fn wrist_at(t: f64) -> NormalizedLandmark {
        NormalizedLandmark::new(
            (0.5 + 0.2 * (t * 0.5).cos()) as f32,
            (0.55 + 0.15 * t.sin()) as f32,
        )
    }

    fn hand_at(&self, wrist: NormalizedLandmark) -> HandLandmarks {
        let mut landmarks = Vec::with_capacity(HAND_LANDMARK_COUNT);
        let mut world = Vec::with_capacity(HAND_LANDMARK_COUNT);
        landmarks.push(wrist);
        world.push([0.0, 0.0, 0.0]);

        // Thumb to pinky fanned upward from the wrist, four joints each.
        for finger in 0..5 {
            let angle = (-150.0 + 30.0 * finger as f32).to_radians();
            let (sin, cos) = angle.sin_cos();
            for joint in 1..=4 {
                let reach = 0.04 + 0.025 * joint as f32;
                landmarks.push(NormalizedLandmark {
                    x: wrist.x + cos * reach,
                    y: wrist.y + sin * reach,
                    z: -0.01 * joint as f32,
                });
                world.push([cos * reach * 0.8, -sin * reach * 0.8, -0.005 * joint as f32]);
            }
        }

        HandLandmarks {
            landmarks,
            world_landmarks: self.config.outputs.world_landmarks.then_some(world),
            handedness: self.config.outputs.handedness.then_some(Handedness::Right),
            score: 0.9,
        }
    }
}

impl HandDetector for SimulatedDetector {
    type Config = SimulationConfig;

    fn create(config: SimulationConfig) -> impl Future<Output = Result<Self, DetectorError>> + Send {
        async move {
            config.detector.validate()?;
            tracing::info!(
                "Initializing simulated hand detector ({:?} backend, {:?} mode)",
                config.detector.backend,
                config.detector.running_mode
            );
            tokio::time::sleep(config.warmup).await;
            tracing::info!("Hand detector ready");
            Ok(Self {
                config: config.detector,
                dropout_period: config.dropout_period,
                last_timestamp: None,
            })
        }
    }

    fn detect(
        &mut self,
        frame: &VideoFrame,
        timestamp: Duration,
    ) -> Result<Option<HandLandmarks>, DetectorError> {
        if self.config.running_mode == RunningMode::Video {
            if let Some(last) = self.last_timestamp {
                if timestamp <= last {
                    return Err(DetectorError::Detect {
                        frame: frame.index,
                        reason: format!(
                            "timestamp {:?} is not after the previous {:?}",
                            timestamp, last
                        ),
                    });
                }
            }
            self.last_timestamp = Some(timestamp);
        }

        if self.dropout_period > 0 && frame.index % self.dropout_period == self.dropout_period - 1 {
            return Ok(None);
        }

        let wrist = Self::wrist_at(timestamp.as_secs_f64());
        Ok(Some(self.hand_at(wrist)))
    }
}
