use anyhow::{Result, ensure};
use glam::DVec3;

use crate::name::HasName;
use crate::sim::framework::{
    ArrayField, Executable, Field, FieldSpec, FieldStore, Initializable, PortDeclaring, Ports,
    StepContext,
};

/// Adds `gravity * dt` to every velocity.
///
/// Gravity comes from the step context; `scale` lets a node weaken or
/// disable it without touching the scene configuration.
pub struct GravityForce {
    ports: Ports,
    pub in_velocity: ArrayField<DVec3>,
    pub var_scale: Field<f64>,
}

impl GravityForce {
    pub fn new(fields: &mut FieldStore) -> Self {
        let mut ports = Ports::new(fields);
        let in_velocity = ports.declare_array(
            fields,
            FieldSpec::input("in_velocity").describe("particle velocities [m/s]"),
        );
        let var_scale = ports.var(fields, "scale", "multiplier on scene gravity", 1.0);
        Self {
            ports,
            in_velocity,
            var_scale,
        }
    }
}

impl HasName for GravityForce {
    fn name(&self) -> &str {
        "gravity_force"
    }
}

impl PortDeclaring for GravityForce {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for GravityForce {}

impl Executable for GravityForce {
    fn execute(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let dv = ctx.gravity * (*fields.read(self.var_scale)? * ctx.dt);
        for v in fields.get_mut(self.in_velocity)?.iter_mut() {
            *v += dv;
        }
        Ok(())
    }
}

/// Forward Euler position update: `x += v * dt`.
pub struct ExplicitEuler {
    ports: Ports,
    pub in_position: ArrayField<DVec3>,
    pub in_velocity: ArrayField<DVec3>,
}

impl ExplicitEuler {
    pub fn new(fields: &mut FieldStore) -> Self {
        let mut ports = Ports::new(fields);
        let in_position = ports.declare_array(
            fields,
            FieldSpec::input("in_position").describe("particle positions [m]"),
        );
        let in_velocity = ports.declare_array(
            fields,
            FieldSpec::input("in_velocity").describe("particle velocities [m/s]"),
        );
        Self {
            ports,
            in_position,
            in_velocity,
        }
    }
}

impl HasName for ExplicitEuler {
    fn name(&self) -> &str {
        "explicit_euler"
    }
}

impl PortDeclaring for ExplicitEuler {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for ExplicitEuler {}

impl Executable for ExplicitEuler {
    fn execute(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        // Both arrays live in the same store.
        let velocity = fields.read(self.in_velocity)?.clone();
        let position = fields.get_mut(self.in_position)?;
        ensure!(
            position.len() == velocity.len(),
            "position/velocity length mismatch: {} vs {}",
            position.len(),
            velocity.len()
        );
        for (x, v) in position.iter_mut().zip(&velocity) {
            *x += *v * ctx.dt;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::framework::FieldOwner;

    #[test]
    fn test_gravity_then_euler() -> Result<()> {
        let mut fields = FieldStore::new();
        let pos = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("pos"));
        let vel = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("vel"));
        fields.write(pos, vec![DVec3::ZERO, DVec3::X])?;
        fields.write(vel, vec![DVec3::ZERO; 2])?;

        let mut gravity = GravityForce::new(&mut fields);
        let mut euler = ExplicitEuler::new(&mut fields);
        fields.connect(vel, gravity.in_velocity)?;
        fields.connect(pos, euler.in_position)?;
        fields.connect(vel, euler.in_velocity)?;

        let ctx = StepContext::new(0.5).with_gravity(DVec3::new(0.0, -10.0, 0.0));
        gravity.execute(&ctx, &mut fields)?;
        euler.execute(&ctx, &mut fields)?;

        assert_eq!(fields.read(vel)?[0], DVec3::new(0.0, -5.0, 0.0));
        assert_eq!(fields.read(pos)?[1], DVec3::new(1.0, -2.5, 0.0));
        Ok(())
    }

    #[test]
    fn test_gravity_scale() -> Result<()> {
        let mut fields = FieldStore::new();
        let vel = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("vel"));
        fields.write(vel, vec![DVec3::ONE])?;
        let mut gravity = GravityForce::new(&mut fields);
        fields.connect(vel, gravity.in_velocity)?;
        fields.write(gravity.var_scale, 0.0)?;

        gravity.execute(&StepContext::new(1.0).with_gravity(DVec3::NEG_Y), &mut fields)?;
        assert_eq!(fields.read(vel)?[0], DVec3::ONE);
        Ok(())
    }

    #[test]
    fn test_euler_rejects_mismatched_lengths() -> Result<()> {
        let mut fields = FieldStore::new();
        let pos = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("pos"));
        let vel = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("vel"));
        fields.write(pos, vec![DVec3::ZERO; 3])?;
        fields.write(vel, vec![DVec3::ZERO; 2])?;
        let mut euler = ExplicitEuler::new(&mut fields);
        fields.connect(pos, euler.in_position)?;
        fields.connect(vel, euler.in_velocity)?;

        assert!(euler.execute(&StepContext::new(0.1), &mut fields).is_err());
        Ok(())
    }
}
