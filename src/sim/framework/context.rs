use glam::DVec3;

use crate::config::{Bounds, SceneConfig};

/// Read-only per-frame context passed to modules and nodes.
///
/// Scene-wide quantities (time, gravity, bounds) live here instead of in
/// fields so that modules can use them without declaring extra ports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    /// Time step of the current frame [s].
    pub dt: f64,
    /// Elapsed simulated time at the start of the frame [s].
    pub time: f64,
    /// Index of the frame being computed (0 for the first `advance`).
    pub frame: u64,
    pub gravity: DVec3,
    pub bounds: Bounds,
}

impl StepContext {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            time: 0.0,
            frame: 0,
            gravity: DVec3::ZERO,
            bounds: Bounds::default(),
        }
    }

    pub(crate) fn from_config(config: &SceneConfig, bounds: Bounds, dt: f64) -> Self {
        Self {
            gravity: config.gravity(),
            bounds,
            ..Self::new(dt)
        }
    }

    pub fn with_gravity(mut self, gravity: DVec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }
}

impl Default for StepContext {
    fn default() -> Self {
        Self::new(0.0)
    }
}
