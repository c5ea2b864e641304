// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("failed to open camera {index}: {reason}")]
    CameraAccess { index: u32, reason: String },
    #[error("failed to open camera stream: {0}")]
    Stream(String),
    #[error("failed to capture frame: {0}")]
    Capture(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("capture thread exited before reporting the stream state")]
    CaptureThreadGone,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid detector configuration: {0}")]
    Config(String),
    #[error("detector initialization failed: {0}")]
    Init(String),
    #[error("detection failed on frame {frame}: {reason}")]
    Detect { frame: u64, reason: String },
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read asset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse asset {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("asset {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
    #[error("asset loader dropped before completion")]
    LoaderGone,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that end the tracking session. Nothing here is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("camera unavailable: {0}")]
    Camera(#[from] VideoError),
    #[error("hand detector unavailable: {0}")]
    DetectorInit(#[source] DetectorError),
    #[error("detector task panicked or was cancelled")]
    DetectorTask,
    #[error("frame scheduler task panicked or was cancelled")]
    SchedulerTask,
    #[error("frame scheduler already streaming")]
    AlreadyStreaming,
    #[error("frame scheduler has no stream attached")]
    NotStreaming,
}
