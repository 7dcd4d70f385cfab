use anyhow::Result;

use crate::config::{Bounds, SceneConfig};
use crate::error::{self, GraphError, GraphResult};
use crate::id::NodeId;
use crate::name::HasName;

use super::{FieldStore, Node, NodeKind, PipelineOutcome, StepContext};

/// Traversal pass a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Reset,
    Simulation,
    Graphics,
}

/// A node whose work was abandoned for the current frame.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: NodeId,
    pub node_name: String,
    pub pass: Pass,
    /// Failing module, when the failure came from a pipeline.
    pub module: Option<String>,
    pub error: anyhow::Error,
}

/// What a `reset()` or `advance()` call did.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Frame index the call computed (0 for a reset).
    pub frame: u64,
    /// Nodes whose states were reset or updated, in traversal order.
    pub visited: Vec<NodeId>,
    pub failures: Vec<NodeFailure>,
}

impl FrameReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, node: NodeId) -> bool {
        self.failures.iter().any(|f| f.node == node)
    }

    /// Files a non-fatal error against `node`; fatal errors are handed back.
    fn isolate(&mut self, node: &Node, pass: Pass, module: Option<String>, err: anyhow::Error) -> Result<()> {
        if error::is_fatal(&err) {
            log::error!("{:?} pass: fatal error in node `{}`: {err:#}", pass, node.name());
            return Err(err);
        }
        log::warn!("{:?} pass: node `{}` abandoned for this frame: {err:#}", pass, node.name());
        self.failures.push(NodeFailure {
            node: node.id(),
            node_name: node.name().to_string(),
            pass,
            module,
            error: err,
        });
        Ok(())
    }

    fn record(&mut self, node: &Node, pass: Pass, outcome: Result<PipelineOutcome>) -> Result<()> {
        match outcome {
            Ok(PipelineOutcome::Completed { .. }) => Ok(()),
            Ok(PipelineOutcome::Aborted { module, error, .. }) => {
                self.isolate(node, pass, Some(module), error)
            }
            Err(err) => self.isolate(node, pass, None, err),
        }
    }
}

/// Owner of the node forest, its fields, and the reset/advance lifecycle.
///
/// A scene graph is an ordinary value: a host application may keep a single
/// one alive for the whole process, but nothing here assumes that.
pub struct SceneGraph {
    config: SceneConfig,
    bounds: Bounds,
    fields: FieldStore,
    root: Option<Node>,
    elapsed: f64,
    frame: u64,
    initialized: bool,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::from_valid_config(SceneConfig::default())
    }
}

impl SceneGraph {
    pub fn new(config: SceneConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SceneConfig) -> Self {
        Self {
            bounds: config.bounds(),
            fields: FieldStore::with_device_budget(config.device_memory_budget_bytes),
            config,
            root: None,
            elapsed: 0.0,
            frame: 0,
            initialized: false,
        }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.fields
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Bounds) -> GraphResult<()> {
        if !bounds.is_valid() {
            return Err(GraphError::Configuration(format!(
                "invalid scene bounds {:?}..{:?}",
                bounds.lower, bounds.upper
            )));
        }
        self.bounds = bounds;
        Ok(())
    }

    /// Simulated time accumulated since the last reset [s].
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed
    }

    /// Number of frames advanced since the last reset.
    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.root.as_ref().and_then(|r| r.find(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.root.as_mut().and_then(|r| r.find_mut(id))
    }

    /// Node ids in pre-order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = vec![];
        self.traverse(|n| ids.push(n.id()));
        ids
    }

    /// Visits every node in pre-order (parent first, children in insertion order).
    pub fn traverse(&self, mut f: impl FnMut(&Node)) {
        if let Some(root) = &self.root {
            root.visit(&mut f);
        }
    }

    /// Discards the current forest and installs a new root of kind `K`.
    pub fn create_new_scene<K: NodeKind>(&mut self, name: &str, kind: K) -> Result<NodeId> {
        if let Some(old) = self.root.take() {
            let released = old.release(&mut self.fields);
            log::info!("discarded scene `{}` ({released} fields released)", old.name());
        }
        let root = Node::new(&mut self.fields, name, kind)?;
        let id = root.id();
        log::info!("created scene `{}` ({})", name, root.kind_name());
        self.root = Some(root);
        self.elapsed = 0.0;
        self.frame = 0;
        self.initialized = false;
        Ok(id)
    }

    /// Builds a node of kind `K` and appends it to `parent`'s children.
    pub fn add_node<K: NodeKind>(&mut self, parent: NodeId, name: &str, kind: K) -> Result<NodeId> {
        if self.node(parent).is_none() {
            return Err(GraphError::Configuration(format!("unknown parent {parent}")).into());
        }
        let node = Node::new(&mut self.fields, name, kind)?;
        let parent = self
            .node_mut(parent)
            .ok_or_else(|| GraphError::Configuration(format!("unknown parent {parent}")))?;
        Ok(parent.add_child(node))
    }

    /// Removes a non-root node with its subtree and releases their fields.
    pub fn remove_node(&mut self, id: NodeId) -> GraphResult<()> {
        let root = self
            .root
            .as_mut()
            .ok_or_else(|| GraphError::Configuration("no scene has been created".into()))?;
        if root.id() == id {
            return Err(GraphError::Configuration(
                "the root node cannot be removed; create a new scene instead".into(),
            ));
        }
        let node = root
            .detach(id)
            .ok_or_else(|| GraphError::Configuration(format!("unknown node {id}")))?;
        let released = node.release(&mut self.fields);
        log::debug!("removed node `{}` ({released} fields released)", node.name());
        Ok(())
    }

    /// Restores every node to its initial state, in pre-order.
    ///
    /// Calling it again reproduces the same initial condition.
    pub fn reset(&mut self) -> Result<FrameReport> {
        let root = self
            .root
            .as_mut()
            .ok_or_else(|| GraphError::Configuration("no scene has been created".into()))?;
        let mut report = FrameReport::default();
        reset_subtree(root, &mut self.fields, &mut report)?;
        self.elapsed = 0.0;
        self.frame = 0;
        self.initialized = true;
        log::info!(
            "reset {} node(s), {} failure(s)",
            report.visited.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Advances the scene by `dt`: a pre-order simulation pass over every
    /// node, then a pre-order graphics pass.
    ///
    /// Failures are isolated to the node they happen in and listed in the
    /// report; only fatal errors are returned as `Err`.
    pub fn advance(&mut self, dt: f64) -> Result<FrameReport> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(GraphError::Configuration(format!("invalid time step {dt}")).into());
        }
        // Failures of an implicit reset are reported with the frame that triggered it.
        let mut reset_failures = Vec::new();
        if !self.initialized {
            log::info!("advance() before reset(): resetting first");
            reset_failures = self.reset()?.failures;
        }
        let ctx = StepContext {
            time: self.elapsed,
            frame: self.frame,
            ..StepContext::from_config(&self.config, self.bounds, dt)
        };
        let mut report = FrameReport {
            frame: self.frame,
            failures: reset_failures,
            ..FrameReport::default()
        };

        let root = self
            .root
            .as_mut()
            .ok_or_else(|| GraphError::Configuration("no scene has been created".into()))?;
        simulate_subtree(root, &ctx, &mut self.fields, &mut report)?;

        self.fields.lock_state_writes(true);
        let rendered = render_subtree(root, &ctx, &mut self.fields, &mut report);
        self.fields.lock_state_writes(false);
        rendered?;

        self.elapsed += dt;
        self.frame += 1;
        log::debug!(
            "frame {} done (t = {:.4}), {} failure(s)",
            report.frame,
            self.elapsed,
            report.failures.len()
        );
        Ok(report)
    }

    /// Advances by the configured time step.
    pub fn step(&mut self) -> Result<FrameReport> {
        self.advance(self.config.time_step)
    }
}

fn reset_subtree(node: &mut Node, fields: &mut FieldStore, report: &mut FrameReport) -> Result<()> {
    report.visited.push(node.id());
    if let Err(err) = node.reset_states(fields) {
        report.isolate(node, Pass::Reset, None, err)?;
    }
    for child in node.children_mut() {
        reset_subtree(child, fields, report)?;
    }
    Ok(())
}

fn simulate_subtree(
    node: &mut Node,
    ctx: &StepContext,
    fields: &mut FieldStore,
    report: &mut FrameReport,
) -> Result<()> {
    if node.is_active() {
        log::debug!("update states of `{}`", node.name());
        report.visited.push(node.id());
        let outcome = node.update_states(ctx, fields);
        report.record(node, Pass::Simulation, outcome)?;
    }
    for child in node.children_mut() {
        simulate_subtree(child, ctx, fields, report)?;
    }
    Ok(())
}

fn render_subtree(
    node: &mut Node,
    ctx: &StepContext,
    fields: &mut FieldStore,
    report: &mut FrameReport,
) -> Result<()> {
    if node.is_active() && node.is_visible() {
        let outcome = node.update_graphics(ctx, fields);
        report.record(node, Pass::Graphics, outcome)?;
    }
    for child in node.children_mut() {
        render_subtree(child, ctx, fields, report)?;
    }
    Ok(())
}
