//! Scene-level configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned region the simulation is expected to stay within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: DVec3,
    pub upper: DVec3,
}

impl Bounds {
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, p: DVec3) -> bool {
        p.cmpge(self.lower).all() && p.cmple(self.upper).all()
    }

    pub fn is_valid(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && self.lower.cmple(self.upper).all()
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new(DVec3::splat(-1.0), DVec3::splat(1.0))
    }
}

/// Configuration for a [`crate::SceneGraph`].
///
/// Loaded from JSON by the demo binary; every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Lower corner of the scene bounds.
    pub lower_bound: [f64; 3],
    /// Upper corner of the scene bounds.
    pub upper_bound: [f64; 3],
    /// Gravitational acceleration [m/s²].
    pub gravity: [f64; 3],
    /// Default time step used by `SceneGraph::step` [s].
    pub time_step: f64,
    /// Cap on the bytes held by device-resident array fields. `None` = unlimited.
    pub device_memory_budget_bytes: Option<usize>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            lower_bound: [-1.0; 3],
            upper_bound: [1.0; 3],
            gravity: [0.0, -9.8, 0.0],
            time_step: 0.016,
            device_memory_budget_bytes: None,
        }
    }
}

impl SceneConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SceneConfig =
            serde_json::from_str(text).context("Failed to parse scene configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;
        let config: SceneConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.time_step.is_finite() && self.time_step > 0.0,
            "time_step must be positive and finite (got {})",
            self.time_step
        );
        anyhow::ensure!(
            self.bounds().is_valid(),
            "lower_bound {:?} must not exceed upper_bound {:?}",
            self.lower_bound,
            self.upper_bound
        );
        anyhow::ensure!(
            DVec3::from_array(self.gravity).is_finite(),
            "gravity must be finite"
        );
        Ok(())
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(
            DVec3::from_array(self.lower_bound),
            DVec3::from_array(self.upper_bound),
        )
    }

    pub fn gravity(&self) -> DVec3 {
        DVec3::from_array(self.gravity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() -> Result<()> {
        let cfg = SceneConfig::from_json_str(r#"{ "time_step": 0.01 }"#)?;
        assert_eq!(cfg.time_step, 0.01);
        assert_eq!(cfg.gravity, [0.0, -9.8, 0.0]);
        assert_eq!(cfg.device_memory_budget_bytes, None);
        Ok(())
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let text = r#"{ "lower_bound": [1, 0, 0], "upper_bound": [0, 1, 1] }"#;
        assert!(SceneConfig::from_json_str(text).is_err());
    }

    #[test]
    fn test_rejects_zero_time_step() {
        assert!(SceneConfig::from_json_str(r#"{ "time_step": 0.0 }"#).is_err());
    }

    #[test]
    fn test_bounds_contains() {
        let b = Bounds::default();
        assert!(b.contains(DVec3::ZERO));
        assert!(b.contains(DVec3::splat(1.0)));
        assert!(!b.contains(DVec3::new(0.0, 1.5, 0.0)));
    }
}
