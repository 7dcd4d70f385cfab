use anyhow::{Result, anyhow, ensure};
use glam::DVec3;

use crate::sim::framework::{FieldStore, ModuleHandle, NodeKind, NodeParts, Residency};
use crate::sim::modules::{
    BoundaryClamp, CalculateNorm, ColorMapping, ExplicitEuler, GravityForce, PointSnapshot,
};

/// A cloud of free particles falling under gravity inside the scene bounds.
///
/// States: `position` and `velocity`, both device arrays.
/// Simulation pipeline: gravity, explicit Euler, boundary clamp.
/// Graphics pipeline (unless disabled): speed norm, jet color map, point snapshot.
#[derive(Debug, Clone)]
pub struct ParticleCloud {
    positions: Vec<DVec3>,
    velocity: DVec3,
    max_speed: f64,
    visuals: bool,
}

impl ParticleCloud {
    pub fn new(positions: Vec<DVec3>) -> Self {
        Self {
            positions,
            velocity: DVec3::ZERO,
            max_speed: 5.0,
            visuals: true,
        }
    }

    /// Particles on a regular lattice filling `[lower, upper]` with the given spacing.
    pub fn grid(lower: DVec3, upper: DVec3, spacing: f64) -> Result<Self> {
        ensure!(
            spacing > 0.0 && spacing.is_finite(),
            "particle spacing must be positive, got {spacing}"
        );
        ensure!(
            lower.cmple(upper).all(),
            "grid lower corner {lower} exceeds upper corner {upper}"
        );

        ensure!(
            lower.is_finite() && upper.is_finite(),
            "grid corners must be finite, got {lower} and {upper}"
        );

        let cells = ((upper - lower) / spacing + 1e-9).floor();
        ensure!(
            cells.max_element() < u32::MAX as f64,
            "grid of {cells} cells per axis is too large"
        );
        let counts = cells.as_uvec3() + 1;
        let total = (counts.x as usize)
            .checked_mul(counts.y as usize)
            .and_then(|n| n.checked_mul(counts.z as usize))
            .ok_or_else(|| anyhow!("grid of {counts} particles is too large"))?;
        let mut positions = Vec::new();
        positions
            .try_reserve_exact(total)
            .map_err(|e| anyhow!("cannot allocate a grid of {counts} particles: {e}"))?;
        for i in 0..counts.x {
            for j in 0..counts.y {
                for k in 0..counts.z {
                    positions.push(lower + DVec3::new(i as f64, j as f64, k as f64) * spacing);
                }
            }
        }
        Ok(Self::new(positions))
    }

    /// Initial velocity shared by every particle.
    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// Speed mapped to the top of the colormap.
    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = max_speed;
        self
    }

    /// Skips building the graphics pipeline.
    pub fn without_visuals(mut self) -> Self {
        self.visuals = false;
        self
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl NodeKind for ParticleCloud {
    fn kind_name(&self) -> &'static str {
        "particle_cloud"
    }

    fn build(&mut self, parts: &mut NodeParts, fields: &mut FieldStore) -> Result<()> {
        let position = parts.declare_array_state(
            fields,
            "position",
            "particle positions [m]",
            Residency::Device,
            self.positions.clone(),
        )?;
        let velocity = parts.declare_array_state(
            fields,
            "velocity",
            "particle velocities [m/s]",
            Residency::Device,
            vec![self.velocity; self.positions.len()],
        )?;

        let gravity = GravityForce::new(fields);
        fields.connect(velocity, gravity.in_velocity)?;
        let euler = ExplicitEuler::new(fields);
        fields.connect(position, euler.in_position)?;
        fields.connect(velocity, euler.in_velocity)?;
        let clamp = BoundaryClamp::new(fields);
        fields.connect(position, clamp.in_position)?;
        fields.connect(velocity, clamp.in_velocity)?;

        let simulation = parts.simulation_pipeline_mut();
        simulation.push_module(ModuleHandle::new(gravity))?;
        simulation.push_module(ModuleHandle::new(euler))?;
        simulation.push_module(ModuleHandle::new(clamp))?;

        if !self.visuals {
            return Ok(());
        }

        let norm = CalculateNorm::new(fields);
        fields.connect(velocity, norm.in_vec)?;
        let mapping = ColorMapping::new(fields);
        fields.connect(norm.out_norm, mapping.in_scalar)?;
        fields.write(mapping.var_max, self.max_speed)?;
        let snapshot = PointSnapshot::new(fields);
        fields.connect(position, snapshot.in_position)?;
        fields.connect(mapping.out_color, snapshot.in_color)?;

        let graphics = parts.graphics_pipeline_mut();
        graphics.push_module(ModuleHandle::new(norm))?;
        graphics.push_module(ModuleHandle::new(mapping))?;
        graphics.push_module(ModuleHandle::new(snapshot))?;
        Ok(())
    }
}
