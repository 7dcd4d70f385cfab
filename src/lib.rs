pub mod config;
pub mod error;
mod id;
pub mod name;
pub mod sim;

// Prelude
pub use config::{Bounds, SceneConfig};
pub use error::{GraphError, GraphResult};
pub use id::{FieldId, ModuleId, NodeId};
pub use name::HasName;
pub use sim::framework::{
    ArrayField, Field, FieldKind, FieldSpec, FieldStore, FrameReport, ModuleHandle, Node, NodeKind,
    NodeParts, Pipeline, PipelineOutcome, Ports, SceneGraph, StepContext,
};
