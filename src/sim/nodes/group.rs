use anyhow::Result;

use crate::sim::framework::{FieldStore, NodeKind, NodeParts};

/// Stateless node used to organise the forest (scene roots, folders).
#[derive(Debug, Default, Clone, Copy)]
pub struct Group;

impl NodeKind for Group {
    fn kind_name(&self) -> &'static str {
        "group"
    }

    fn build(&mut self, _parts: &mut NodeParts, _fields: &mut FieldStore) -> Result<()> {
        Ok(())
    }
}
