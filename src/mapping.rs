// src/mapping.rs - Normalized image landmarks to scene coordinates
use crate::geometry::ViewportExtent;
use nalgebra::Point3;

/// Detector output in image space: x grows right, y grows down, both in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    /// Relative depth reported by the detector. Not used for placement.
    pub z: f32,
}

impl NormalizedLandmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Where the overlay should be, in scene space. Always lies on the compositing plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTarget {
    pub position: Point3<f32>,
}

/// Centers the landmark on the optical axis and flips y so that up in the
/// image is up in the scene. The camera looks down -z.
pub fn map_wrist_to_world(
    landmark: &NormalizedLandmark,
    extent: &ViewportExtent,
    compositing_depth: f32,
) -> WorldTarget {
    WorldTarget {
        position: Point3::new(
            (landmark.x - 0.5) * extent.width,
            -(landmark.y - 0.5) * extent.height,
            -compositing_depth,
        ),
    }
}
