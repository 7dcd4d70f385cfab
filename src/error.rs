//! Error types for the dataflow core.
//!
//! Graph-building operations return `GraphResult<T>`. Module and node code
//! returns `anyhow::Result`, and a `GraphError` raised inside it is recovered
//! by downcasting when a pipeline decides whether to isolate or propagate.

use thiserror::Error;

/// Unified error type for fields, pipelines and the scene graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two ports with different semantic types were connected.
    #[error(
        "Type mismatch: cannot connect `{upstream}` ({upstream_type}) to `{downstream}` ({downstream_type})"
    )]
    TypeMismatch {
        upstream: String,
        upstream_type: &'static str,
        downstream: String,
        downstream_type: &'static str,
    },

    /// The graph is wired inconsistently (duplicate module, alias cycle, bad config...).
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A field was read while it is neither allocated nor connected.
    #[error("Field `{0}` is neither allocated nor connected")]
    UnboundField(String),

    /// A module ran while one of its required inputs was left unconnected.
    #[error("Module `{module}` is missing required input `{input}`")]
    MissingInput { module: String, input: String },

    /// Host-side storage could not be reserved.
    #[error("Failed to allocate {elements} elements for field `{field}`")]
    Allocation { field: String, elements: usize },

    /// A visualization module tried to modify simulation state.
    #[error("Graphics pass attempted to modify simulation state field `{0}`")]
    StateWriteInGraphics(String),

    /// Device-resident storage exceeded the configured budget.
    #[error(
        "Device memory exhausted allocating `{field}`: {requested_bytes} bytes requested, budget is {budget_bytes} bytes"
    )]
    ResourceExhausted {
        field: String,
        requested_bytes: usize,
        budget_bytes: usize,
    },
}

impl GraphError {
    /// True for errors detected while building the graph.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. } | Self::Configuration(_))
    }

    /// True for errors that must terminate the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

/// Convenience alias for `Result<T, GraphError>`.
pub type GraphResult<T> = Result<T, GraphError>;

/// Returns true when `err` carries a fatal [`GraphError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<GraphError>()
        .map(GraphError::is_fatal)
        .unwrap_or(false)
}
