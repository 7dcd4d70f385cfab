use anyhow::Result;
use glam::DVec3;

use crate::name::HasName;
use crate::sim::framework::{
    ArrayField, Executable, Field, FieldSpec, FieldStore, Initializable, PortDeclaring, Ports,
    StepContext,
};

/// Keeps particles inside the scene bounds.
///
/// A particle outside the box is projected back onto it and the velocity
/// component along the violated axis is reflected and scaled by `restitution`.
pub struct BoundaryClamp {
    ports: Ports,
    pub in_position: ArrayField<DVec3>,
    pub in_velocity: ArrayField<DVec3>,
    pub var_restitution: Field<f64>,
}

impl BoundaryClamp {
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
        let var_restitution = ports.var(
            fields,
            "restitution",
            "fraction of normal velocity kept after a bounce",
            0.5,
        );
        Self {
            ports,
            in_position,
            in_velocity,
            var_restitution,
        }
    }
}

impl HasName for BoundaryClamp {
    fn name(&self) -> &str {
        "boundary_clamp"
    }
}

impl PortDeclaring for BoundaryClamp {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for BoundaryClamp {}

impl Executable for BoundaryClamp {
    fn execute(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let restitution = fields.read(self.var_restitution)?.clamp(0.0, 1.0);
        let (lower, upper) = (ctx.bounds.lower, ctx.bounds.upper);

        // Collect hits first; position and velocity cannot be borrowed together.
        let mut hits: Vec<(usize, usize, f64)> = vec![];
        for (i, x) in fields.get_mut(self.in_position)?.iter_mut().enumerate() {
            for axis in 0..3 {
                if x[axis] < lower[axis] {
                    x[axis] = lower[axis];
                    hits.push((i, axis, 1.0));
                } else if x[axis] > upper[axis] {
                    x[axis] = upper[axis];
                    hits.push((i, axis, -1.0));
                }
            }
        }
        if hits.is_empty() {
            return Ok(());
        }

        let velocity = fields.get_mut(self.in_velocity)?;
        for (i, axis, inward) in hits {
            let Some(v) = velocity.get_mut(i) else {
                continue;
            };
            // Only reflect motion that points out of the box.
            if v[axis] * inward < 0.0 {
                v[axis] = -v[axis] * restitution;
            }
        }
        log::trace!("boundary clamp applied (lower {lower}, upper {upper})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Bounds;
    use crate::sim::framework::FieldOwner;

    fn setup(fields: &mut FieldStore, x: DVec3, v: DVec3) -> Result<BoundaryClamp> {
        let pos = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("pos"));
        let vel = fields.declare_array::<DVec3>(FieldOwner::Free, FieldSpec::state("vel"));
        fields.write(pos, vec![x])?;
        fields.write(vel, vec![v])?;
        let clamp = BoundaryClamp::new(fields);
        fields.connect(pos, clamp.in_position)?;
        fields.connect(vel, clamp.in_velocity)?;
        Ok(clamp)
    }

    #[test]
    fn test_particle_below_floor_bounces() -> Result<()> {
        let mut fields = FieldStore::new();
        let mut clamp = setup(
            &mut fields,
            DVec3::new(0.0, -1.5, 0.0),
            DVec3::new(1.0, -4.0, 0.0),
        )?;
        let ctx = StepContext::new(0.1).with_bounds(Bounds::default());
        clamp.execute(&ctx, &mut fields)?;

        assert_eq!(fields.read(clamp.in_position)?[0], DVec3::new(0.0, -1.0, 0.0));
        assert_eq!(fields.read(clamp.in_velocity)?[0], DVec3::new(1.0, 2.0, 0.0));
        Ok(())
    }

    #[test]
    fn test_inside_particle_is_untouched() -> Result<()> {
        let mut fields = FieldStore::new();
        let x = DVec3::new(0.2, 0.3, -0.4);
        let v = DVec3::new(5.0, 5.0, 5.0);
        let mut clamp = setup(&mut fields, x, v)?;
        clamp.execute(&StepContext::new(0.1), &mut fields)?;

        assert_eq!(fields.read(clamp.in_position)?[0], x);
        assert_eq!(fields.read(clamp.in_velocity)?[0], v);
        Ok(())
    }

    #[test]
    fn test_inward_velocity_is_kept() -> Result<()> {
        let mut fields = FieldStore::new();
        let mut clamp = setup(
            &mut fields,
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::new(-1.0, 0.0, 0.0),
        )?;
        clamp.execute(&StepContext::new(0.1), &mut fields)?;

        assert_eq!(fields.read(clamp.in_position)?[0].x, 1.0);
        assert_eq!(fields.read(clamp.in_velocity)?[0].x, -1.0);
        Ok(())
    }
}
