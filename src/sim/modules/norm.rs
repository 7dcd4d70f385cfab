use anyhow::Result;
use glam::DVec3;

use crate::name::HasName;
use crate::sim::framework::{
    ArrayField, Executable, FieldSpec, FieldStore, Initializable, PortDeclaring, Ports, StepContext,
};

/// Euclidean length of every vector in `in_vec`, written to `out_norm`.
pub struct CalculateNorm {
    ports: Ports,
    pub in_vec: ArrayField<DVec3>,
    pub out_norm: ArrayField<f64>,
}

impl CalculateNorm {
    pub fn new(fields: &mut FieldStore) -> Self {
        let mut ports = Ports::new(fields);
        let in_vec = ports.declare_array(fields, FieldSpec::input("in_vec").describe("vectors"));
        let out_norm = ports.declare_array(
            fields,
            FieldSpec::output("out_norm").describe("vector lengths"),
        );
        Self {
            ports,
            in_vec,
            out_norm,
        }
    }
}

impl HasName for CalculateNorm {
    fn name(&self) -> &str {
        "calculate_norm"
    }
}

impl PortDeclaring for CalculateNorm {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for CalculateNorm {}

impl Executable for CalculateNorm {
    fn execute(&mut self, _ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let norms: Vec<f64> = fields.read(self.in_vec)?.iter().map(|v| v.length()).collect();
        fields.allocate(self.out_norm, norms.len())?;
        fields.get_mut(self.out_norm)?.copy_from_slice(&norms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norms_follow_input_length() -> Result<()> {
        let mut fields = FieldStore::new();
        let source = fields.declare::<Vec<DVec3>>(FieldSpec::output("source"));
        let mut norm = CalculateNorm::new(&mut fields);
        fields.connect(source, norm.in_vec)?;
        let ctx = StepContext::default();

        fields.write(source, vec![DVec3::new(3.0, 4.0, 0.0), DVec3::ZERO])?;
        norm.execute(&ctx, &mut fields)?;
        assert_eq!(*fields.read(norm.out_norm)?, vec![5.0, 0.0]);

        fields.write(source, vec![DVec3::new(0.0, 0.0, -2.0)])?;
        norm.execute(&ctx, &mut fields)?;
        assert_eq!(*fields.read(norm.out_norm)?, vec![2.0]);
        Ok(())
    }
}
