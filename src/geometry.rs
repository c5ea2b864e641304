// src/geometry.rs - Frustum cross-section math shared by the backdrop and the wrist mapping
use crate::config::CameraConfig;

/// Projection parameters of the scene camera. Only the scene host mutates these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

/// Metric size of the view frustum at some depth. `width == height * aspect`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportExtent {
    pub width: f32,
    pub height: f32,
}

impl CameraParams {
    pub fn from_config(config: &CameraConfig) -> Self {
        let aspect = if config.initial_height > 0.0 {
            config.initial_width / config.initial_height
        } else {
            1.0
        };
        Self {
            fov_degrees: config.fov_degrees,
            aspect,
            near: config.near,
            far: config.far,
        }
    }

    pub fn fov_radians(&self) -> f32 {
        self.fov_degrees.to_radians()
    }

    pub fn contains_depth(&self, depth: f32) -> bool {
        depth >= self.near && depth <= self.far
    }

    /// Same camera with the aspect of a `width` x `height` surface.
    /// A surface with no area leaves the parameters as they are.
    pub fn with_surface(self, width: f32, height: f32) -> Self {
        if width <= 0.0 || height <= 0.0 {
            return self;
        }
        Self {
            aspect: width / height,
            ..self
        }
    }
}

pub fn extent_at_depth(camera: &CameraParams, depth: f32) -> ViewportExtent {
    let height = 2.0 * depth * (0.5 * camera.fov_radians()).tan();
    ViewportExtent {
        width: height * camera.aspect,
        height,
    }
}

/// Warns when `depth` falls outside the clip range. The plane is still usable,
/// it just gets clipped by the camera.
pub fn check_compositing_depth(camera: &CameraParams, depth: f32) -> bool {
    let inside = camera.contains_depth(depth);
    if !inside {
        tracing::warn!(
            depth,
            near = camera.near,
            far = camera.far,
            "Compositing depth is outside the camera clip range; backdrop and overlay will be clipped"
        );
    }
    inside
}
