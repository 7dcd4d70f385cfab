//! Generic dataflow framework.
//!
//! This module is intentionally domain-agnostic: it provides typed fields with
//! aliasing, modules that read and write them, ordered pipelines, and a scene
//! forest that drives reset and per-frame updates. Physics lives in
//! `sim::modules` and `sim::nodes`.

pub mod context;
pub mod field;
pub mod module;
pub mod node;
pub mod pipeline;
pub mod scene;
pub mod store;

pub use context::StepContext;
pub use field::{ArrayField, Field, FieldKind, FieldMeta, FieldOwner, FieldSpec, Ownership, Residency};
pub use module::{
    Executable, Initializable, Module, ModuleHandle, PortDeclaring, PortEntry, Ports, check_inputs,
};
pub use node::{Node, NodeKind, NodeParts};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use scene::{FrameReport, NodeFailure, Pass, SceneGraph};
pub use store::FieldStore;
