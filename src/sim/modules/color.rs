use anyhow::{Result, ensure};

use crate::name::HasName;
use crate::sim::framework::{
    ArrayField, Executable, Field, FieldSpec, FieldStore, Initializable, PortDeclaring, Ports,
    StepContext,
};

/// Linear RGB color in `[0, 1]`.
pub type Rgb = [f32; 3];

/// Maps `t` in `[0, 1]` onto the jet colormap (blue, cyan, yellow, red).
pub fn jet(t: f64) -> Rgb {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let channel = |center: f64| (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0) as f32;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Turns a scalar per element into a color per element.
///
/// Values are normalised with the `min`/`max` vars before the lookup; values
/// outside the range saturate at the ends of the colormap.
pub struct ColorMapping {
    ports: Ports,
    pub in_scalar: ArrayField<f64>,
    pub out_color: ArrayField<Rgb>,
    pub var_min: Field<f64>,
    pub var_max: Field<f64>,
}

impl ColorMapping {
    pub fn new(fields: &mut FieldStore) -> Self {
        let mut ports = Ports::new(fields);
        let in_scalar = ports.declare_array(
            fields,
            FieldSpec::input("in_scalar").describe("values to colour"),
        );
        let out_color = ports.declare_array(
            fields,
            FieldSpec::output("out_color").describe("RGB colour per value"),
        );
        let var_min = ports.var(fields, "min", "value mapped to the low end", 0.0);
        let var_max = ports.var(fields, "max", "value mapped to the high end", 1.0);
        Self {
            ports,
            in_scalar,
            out_color,
            var_min,
            var_max,
        }
    }
}

impl HasName for ColorMapping {
    fn name(&self) -> &str {
        "color_mapping"
    }
}

impl PortDeclaring for ColorMapping {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for ColorMapping {}

impl Executable for ColorMapping {
    fn execute(&mut self, _ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let (min, max) = (*fields.read(self.var_min)?, *fields.read(self.var_max)?);
        ensure!(max > min, "color range is empty: min {min} >= max {max}");

        let colors: Vec<Rgb> = fields
            .read(self.in_scalar)?
            .iter()
            .map(|s| jet((s - min) / (max - min)))
            .collect();
        fields.allocate(self.out_color, colors.len())?;
        fields.get_mut(self.out_color)?.copy_from_slice(&colors);
        Ok(())
    }
}
