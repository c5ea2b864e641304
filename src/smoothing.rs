// src/smoothing.rs - Exponential smoothing of the overlay placement
use crate::mapping::WorldTarget;
use nalgebra::Point3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedPose {
    pub position: Point3<f32>,
}

/// EMA over world targets. The first sample is taken as-is; after that the
/// pose moves `alpha` of the way toward each new target.
pub struct PlacementSmoother {
    alpha: f32,
    current: Option<SmoothedPose>,
}

impl PlacementSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            current: None,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn current(&self) -> Option<SmoothedPose> {
        self.current
    }

    pub fn update(&mut self, target: &WorldTarget) -> SmoothedPose {
        let next = match self.current {
            None => SmoothedPose {
                position: target.position,
            },
            Some(prev) => SmoothedPose {
                position: prev.position.coords.lerp(&target.position.coords, self.alpha).into(),
            },
        };
        self.current = Some(next);
        next
    }
}
