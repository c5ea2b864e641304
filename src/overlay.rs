// src/overlay.rs - Accessory model: async load, lifecycle and pose publication
use crate::config::OverlayConfig;
use crate::error::AssetError;
use crate::smoothing::SmoothedPose;
use nalgebra::{Similarity3, Translation3, UnitQuaternion};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Triangle mesh of the accessory in model units, centered on the attachment point.
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayAsset {
    pub name: String,
    pub vertices: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
    #[serde(default = "default_color")]
    pub color: [u8; 3],
}

fn default_color() -> [u8; 3] {
    [212, 175, 55]
}

impl OverlayAsset {
    pub fn validate(&self) -> Result<(), AssetError> {
        let invalid = |reason: String| AssetError::Invalid {
            name: self.name.clone(),
            reason,
        };
        if self.vertices.is_empty() || self.triangles.is_empty() {
            return Err(invalid("mesh has no geometry".to_string()));
        }
        let count = self.vertices.len() as u32;
        if let Some(tri) = self.triangles.iter().find(|t| t.iter().any(|&i| i >= count)) {
            return Err(invalid(format!(
                "triangle {:?} references a vertex beyond {}",
                tri, count
            )));
        }
        if self.vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err(invalid("vertex coordinates must be finite".to_string()));
        }
        Ok(())
    }
}

pub async fn load_asset(path: &Path) -> Result<OverlayAsset, AssetError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let asset: OverlayAsset =
        serde_json::from_slice(&bytes).map_err(|source| AssetError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    asset.validate()?;
    Ok(asset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Loading,
    Ready,
    Failed,
}

enum AssetState {
    Loading(oneshot::Receiver<Result<OverlayAsset, AssetError>>),
    Ready(Arc<OverlayAsset>),
    Failed,
}

/// What the render loop sees. `transform` stays `None` until the first pose lands.
#[derive(Debug, Clone, Default)]
pub struct OverlaySnapshot {
    pub asset: Option<Arc<OverlayAsset>>,
    pub transform: Option<Similarity3<f32>>,
}

impl OverlaySnapshot {
    #[cfg(test)]
    pub fn is_drawable(&self) -> bool {
        self.asset.is_some() && self.transform.is_some()
    }
}

/// Sole writer of the overlay snapshot. Lives on the detection side.
pub struct OverlayObject {
    state: AssetState,
    scale: f32,
    orientation: UnitQuaternion<f32>,
    snapshot_tx: watch::Sender<OverlaySnapshot>,
}

impl OverlayObject {
    /// Starts loading `config.asset_path` on the current tokio runtime.
    pub fn spawn_load(config: &OverlayConfig) -> (Self, watch::Receiver<OverlaySnapshot>) {
        let path = config.asset_path.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tracing::info!("Loading overlay asset from {}", path.display());
            let _ = tx.send(load_asset(&path).await);
        });
        Self::with_loader(config, rx)
    }

    fn with_loader(
        config: &OverlayConfig,
        loader: oneshot::Receiver<Result<OverlayAsset, AssetError>>,
    ) -> (Self, watch::Receiver<OverlaySnapshot>) {
        let [rx_deg, ry_deg, rz_deg] = config.orientation_degrees;
        let orientation = UnitQuaternion::from_euler_angles(
            rx_deg.to_radians(),
            ry_deg.to_radians(),
            rz_deg.to_radians(),
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(OverlaySnapshot::default());
        (
            Self {
                state: AssetState::Loading(loader),
                scale: config.scale,
                orientation,
                snapshot_tx,
            },
            snapshot_rx,
        )
    }

    pub fn status(&self) -> AssetStatus {
        match self.state {
            AssetState::Loading(_) => AssetStatus::Loading,
            AssetState::Ready(_) => AssetStatus::Ready,
            AssetState::Failed => AssetStatus::Failed,
        }
    }

    /// Moves the lifecycle forward if the load has finished. On success the
    /// asset is attached to the shared snapshot; a failure is final.
    pub fn poll_load(&mut self) -> AssetStatus {
        if let AssetState::Loading(rx) = &mut self.state {
            let outcome = match rx.try_recv() {
                Ok(result) => result,
                Err(oneshot::error::TryRecvError::Empty) => return AssetStatus::Loading,
                Err(oneshot::error::TryRecvError::Closed) => Err(AssetError::LoaderGone),
            };
            self.finish_load(outcome);
        }
        self.status()
    }

    /// Waits for the load to resolve.
    #[cfg(test)]
    pub async fn loaded(&mut self) -> AssetStatus {
        if let AssetState::Loading(rx) = &mut self.state {
            let outcome = rx.await.unwrap_or(Err(AssetError::LoaderGone));
            self.finish_load(outcome);
        }
        self.status()
    }

    fn finish_load(&mut self, outcome: Result<OverlayAsset, AssetError>) {
        match outcome {
            Ok(asset) => {
                tracing::info!(
                    "Overlay asset '{}' ready ({} vertices, {} triangles)",
                    asset.name,
                    asset.vertices.len(),
                    asset.triangles.len()
                );
                let asset = Arc::new(asset);
                self.snapshot_tx.send_modify(|snap| snap.asset = Some(asset.clone()));
                self.state = AssetState::Ready(asset);
            }
            Err(e) => {
                tracing::error!("Overlay asset failed to load, continuing without it: {}", e);
                self.state = AssetState::Failed;
            }
        }
    }

    /// Places the model at `pose` with the fixed scale and orientation.
    /// Does nothing unless the asset is ready.
    pub fn apply_pose(&mut self, pose: &SmoothedPose) -> bool {
        if !matches!(self.state, AssetState::Ready(_)) {
            return false;
        }
        let transform = Similarity3::from_parts(
            Translation3::from(pose.position.coords),
            self.orientation,
            self.scale,
        );
        self.snapshot_tx.send_modify(|snap| snap.transform = Some(transform));
        true
    }
}
