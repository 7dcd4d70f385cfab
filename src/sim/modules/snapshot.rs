use anyhow::{Result, ensure};
use glam::DVec3;
use serde::Serialize;

use crate::name::HasName;
use crate::sim::framework::{
    ArrayField, Executable, Field, FieldSpec, FieldStore, Initializable, PortDeclaring, Ports,
    StepContext,
};

use super::color::Rgb;

/// Render-ready copy of a point set, as a rendering backend would consume it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PointFrame {
    pub frame: u64,
    pub time: f64,
    pub positions: Vec<[f32; 3]>,
    /// Per-point colors; `None` when no color input is connected.
    pub colors: Option<Vec<Rgb>>,
}

/// Graphics sink that packs positions (and optional colors) into a [`PointFrame`].
pub struct PointSnapshot {
    ports: Ports,
    pub in_position: ArrayField<DVec3>,
    pub in_color: ArrayField<Rgb>,
    pub out_frame: Field<PointFrame>,
}

impl PointSnapshot {
    pub fn new(fields: &mut FieldStore) -> Self {
        let mut ports = Ports::new(fields);
        let in_position = ports.declare_array(
            fields,
            FieldSpec::input("in_position").describe("points to draw"),
        );
        let in_color = ports.declare_array(
            fields,
            FieldSpec::input("in_color")
                .describe("colour per point")
                .optional(),
        );
        let out_frame = ports.output(fields, "out_frame", "last captured frame");
        Self {
            ports,
            in_position,
            in_color,
            out_frame,
        }
    }
}

impl HasName for PointSnapshot {
    fn name(&self) -> &str {
        "point_snapshot"
    }
}

impl PortDeclaring for PointSnapshot {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for PointSnapshot {
    fn initialize(&mut self, _ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        fields.write(self.out_frame, PointFrame::default())?;
        Ok(())
    }
}

impl Executable for PointSnapshot {
    fn execute(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let positions: Vec<[f32; 3]> = fields
            .read(self.in_position)?
            .iter()
            .map(|p| p.as_vec3().to_array())
            .collect();
        let colors = if fields.is_bound(self.in_color) {
            let colors = fields.read(self.in_color)?.clone();
            ensure!(
                colors.len() == positions.len(),
                "{} colors for {} points",
                colors.len(),
                positions.len()
            );
            Some(colors)
        } else {
            None
        };
        fields.write(
            self.out_frame,
            PointFrame {
                frame: ctx.frame,
                time: ctx.time,
                positions,
                colors,
            },
        )?;
        Ok(())
    }
}
