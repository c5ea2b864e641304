// src/config.rs
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "WRIST_OVERLAY_CONFIG";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub video: VideoConfig,
    pub detector: DetectorSettings,
    pub overlay: OverlayConfig,
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Distance from the camera at which both the backdrop and the overlay sit.
    pub compositing_depth: f32,
    pub initial_width: f32,
    pub initial_height: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 60.0,
            near: 0.1,
            far: 1000.0,
            compositing_depth: 500.0,
            initial_width: 1280.0,
            initial_height: 720.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Camera { index: u32 },
    Synthetic { width: u32, height: u32, fps: u32 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub source: SourceKind,
    /// Flip camera frames horizontally so the feed behaves like a mirror.
    pub mirror: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera { index: 0 },
            mirror: true,
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    Video,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DetectorOutputs {
    pub landmarks: bool,
    pub world_landmarks: bool,
    pub handedness: bool,
}

impl Default for DetectorOutputs {
    fn default() -> Self {
        Self {
            landmarks: true,
            world_landmarks: false,
            handedness: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub backend: Backend,
    pub running_mode: RunningMode,
    pub num_hands: usize,
    pub outputs: DetectorOutputs,
    /// Simulated model download/initialization time.
    pub warmup_ms: u64,
    /// Every n-th frame reports no hand. 0 disables dropouts.
    pub dropout_period: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Gpu,
            running_mode: RunningMode::Video,
            num_hands: 1,
            outputs: DetectorOutputs::default(),
            warmup_ms: 750,
            dropout_period: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub asset_path: PathBuf,
    pub scale: f32,
    /// Fixed orientation as XYZ Euler angles.
    pub orientation_degrees: [f32; 3],
    pub smoothing_alpha: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            asset_path: PathBuf::from("assets/bracelet.json"),
            scale: 40.0,
            orientation_degrees: [70.0, 0.0, 0.0],
            smoothing_alpha: 0.35,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Re-derive the backdrop plane after every resize instead of keeping the startup geometry.
    pub refit_backdrop_on_resize: bool,
}

impl AppConfig {
    /// Loads the config named by `WRIST_OVERLAY_CONFIG`, falling back to the
    /// platform config directory. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => {
                tracing::info!("No config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("com", "wristoverlay", "WristOverlay")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cam = &self.camera;
        if !(cam.fov_degrees > 0.0 && cam.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov_degrees must be in (0, 180), got {}",
                cam.fov_degrees
            )));
        }
        if !(cam.near > 0.0 && cam.far > cam.near) {
            return Err(ConfigError::Invalid(format!(
                "camera clip range must satisfy 0 < near < far, got [{}, {}]",
                cam.near, cam.far
            )));
        }
        if !(cam.compositing_depth.is_finite() && cam.compositing_depth > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "camera.compositing_depth must be positive, got {}",
                cam.compositing_depth
            )));
        }
        if !(cam.initial_width > 0.0 && cam.initial_height > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "camera initial size must be positive, got {}x{}",
                cam.initial_width, cam.initial_height
            )));
        }
        if !(self.overlay.scale.is_finite() && self.overlay.scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "overlay.scale must be positive, got {}",
                self.overlay.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.overlay.smoothing_alpha) || self.overlay.smoothing_alpha == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "overlay.smoothing_alpha must be in (0, 1], got {}",
                self.overlay.smoothing_alpha
            )));
        }
        Ok(())
    }
}
