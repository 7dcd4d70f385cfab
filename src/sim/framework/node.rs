use anyhow::{Context, Result};

use crate::error::{GraphError, GraphResult};
use crate::id::{FieldId, NodeId};
use crate::name::HasName;

use super::field::{ArrayField, Field, FieldKind, FieldOwner, FieldSpec, Residency};
use super::{FieldStore, Pipeline, PipelineOutcome, StepContext};

/// Behaviour of a node kind (fluid, rigid body, group, ...).
///
/// A kind declares its state fields and assembles its pipelines in
/// [`NodeKind::build`]; the framework takes care of restoring declared
/// states on reset and of driving the pipelines.
pub trait NodeKind: 'static {
    fn kind_name(&self) -> &'static str;

    /// Declares state fields and pushes modules into the node's pipelines.
    fn build(&mut self, parts: &mut NodeParts, fields: &mut FieldStore) -> Result<()>;

    /// Extra initialisation run after every declared state was restored.
    fn reset_states(&mut self, _parts: &NodeParts, _fields: &mut FieldStore) -> Result<()> {
        Ok(())
    }

    /// One simulation step. The default runs the simulation pipeline.
    fn update_states(
        &mut self,
        parts: &mut NodeParts,
        ctx: &StepContext,
        fields: &mut FieldStore,
    ) -> Result<PipelineOutcome> {
        parts.simulation.update(ctx, fields)
    }
}

struct StateEntry {
    name: String,
    id: FieldId,
    restore: Box<dyn Fn(&mut FieldStore) -> GraphResult<()>>,
}

/// The framework-managed half of a node: its states and pipelines.
pub struct NodeParts {
    id: NodeId,
    states: Vec<StateEntry>,
    simulation: Pipeline,
    graphics: Pipeline,
}

impl NodeParts {
    fn new(id: NodeId, name: &str) -> Self {
        Self {
            id,
            states: vec![],
            simulation: Pipeline::new(&format!("{name}/simulation")),
            graphics: Pipeline::new(&format!("{name}/graphics")),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Declares a state field that every reset restores to `initial`.
    pub fn declare_state<T: Clone + 'static>(
        &mut self,
        fields: &mut FieldStore,
        name: &str,
        description: &str,
        initial: T,
    ) -> Field<T> {
        let spec = FieldSpec::state(name).describe(description);
        let field = fields.declare_value(FieldOwner::Node(self.id), spec, initial.clone());
        self.states.push(StateEntry {
            name: name.to_string(),
            id: field.id(),
            restore: Box::new(move |fields: &mut FieldStore| fields.write(field, initial.clone())),
        });
        field
    }

    /// Array flavour of [`NodeParts::declare_state`]; device residency counts
    /// against the scene's device budget.
    pub fn declare_array_state<E: Clone + 'static>(
        &mut self,
        fields: &mut FieldStore,
        name: &str,
        description: &str,
        residency: Residency,
        initial: Vec<E>,
    ) -> GraphResult<ArrayField<E>> {
        let mut spec = FieldSpec::state(name).describe(description);
        spec.residency = residency;
        let field = fields.declare_array::<E>(FieldOwner::Node(self.id), spec);
        fields.write(field, initial.clone())?;
        self.states.push(StateEntry {
            name: name.to_string(),
            id: field.id(),
            restore: Box::new(move |fields: &mut FieldStore| fields.write(field, initial.clone())),
        });
        Ok(field)
    }

    pub fn state(&self, name: &str) -> Option<FieldId> {
        self.states.iter().find(|s| s.name == name).map(|s| s.id)
    }

    pub fn simulation_pipeline(&self) -> &Pipeline {
        &self.simulation
    }

    pub fn simulation_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.simulation
    }

    pub fn graphics_pipeline(&self) -> &Pipeline {
        &self.graphics
    }

    pub fn graphics_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.graphics
    }
}

/// A node of the scene forest: state fields, a simulation pipeline, a
/// graphics pipeline and exclusively owned children.
pub struct Node {
    name: String,
    parts: NodeParts,
    kind: Box<dyn NodeKind>,
    children: Vec<Node>,
    active: bool,
    visible: bool,
}

impl Node {
    pub fn new<K: NodeKind>(fields: &mut FieldStore, name: &str, mut kind: K) -> Result<Self> {
        let mut parts = NodeParts::new(fields.next_node_id(), name);
        let modules_before = fields.last_module_index();
        if let Err(err) = kind.build(&mut parts, fields) {
            fields.release_owner(FieldOwner::Node(parts.id));
            fields.release_modules_after(modules_before);
            return Err(err).with_context(|| format!("Failed to build node `{name}`"));
        }
        log::debug!(
            "built {} `{}` ({}) with {} state field(s)",
            parts.id,
            name,
            kind.kind_name(),
            parts.states.len()
        );
        Ok(Self {
            name: name.to_string(),
            parts,
            kind: Box::new(kind),
            children: vec![],
            active: true,
            visible: true,
        })
    }

    pub fn id(&self) -> NodeId {
        self.parts.id
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.kind_name()
    }

    /// Inactive nodes skip their own updates; their children still run.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Invisible nodes skip the graphics pass only.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn parts(&self) -> &NodeParts {
        &self.parts
    }

    pub fn state(&self, name: &str) -> Option<FieldId> {
        self.parts.state(name)
    }

    pub fn state_names(&self) -> Vec<&str> {
        self.parts.states.iter().map(|s| s.name.as_str()).collect()
    }

    /// Typed lookup of a state field by name.
    pub fn state_field<T: 'static>(&self, fields: &FieldStore, name: &str) -> GraphResult<Field<T>> {
        let id = self.state(name).ok_or_else(|| {
            GraphError::Configuration(format!("node `{}` has no state `{name}`", self.name))
        })?;
        fields.typed::<T>(id)
    }

    pub fn simulation_pipeline(&self) -> &Pipeline {
        &self.parts.simulation
    }

    pub fn simulation_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.parts.simulation
    }

    pub fn graphics_pipeline(&self) -> &Pipeline {
        &self.parts.graphics
    }

    pub fn graphics_pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.parts.graphics
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }

    /// Appends a child; children are visited in insertion order.
    pub fn add_child(&mut self, child: Node) -> NodeId {
        let id = child.id();
        self.children.push(child);
        id
    }

    /// Restores declared states to their initial values, then runs the kind's hook.
    pub fn reset_states(&mut self, fields: &mut FieldStore) -> Result<()> {
        for state in &self.parts.states {
            (state.restore)(fields)
                .with_context(|| format!("Failed to reset state `{}` of `{}`", state.name, self.name))?;
        }
        self.kind.reset_states(&self.parts, fields)
    }

    pub fn update_states(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<PipelineOutcome> {
        self.kind.update_states(&mut self.parts, ctx, fields)
    }

    pub fn update_graphics(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<PipelineOutcome> {
        self.parts.graphics.update(ctx, fields)
    }

    /// Visits this node and its descendants in pre-order.
    pub fn visit(&self, f: &mut dyn FnMut(&Node)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    pub fn find(&self, id: NodeId) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Detaches the descendant `id` (not `self`) with its subtree.
    pub(crate) fn detach(&mut self, id: NodeId) -> Option<Node> {
        if let Some(pos) = self.children.iter().position(|c| c.id() == id) {
            return Some(self.children.remove(pos));
        }
        self.children.iter_mut().find_map(|c| c.detach(id))
    }

    /// Releases every field owned by this subtree: node states and the ports
    /// of modules in its pipelines.
    pub(crate) fn release(&self, fields: &mut FieldStore) -> usize {
        let mut released = fields.release_owner(FieldOwner::Node(self.id()));
        for module in self
            .parts
            .simulation
            .modules()
            .iter()
            .chain(self.parts.graphics.modules())
        {
            released += fields.release_owner(FieldOwner::Module(module.id()));
        }
        released
            + self
                .children
                .iter()
                .map(|c| c.release(fields))
                .sum::<usize>()
    }
}

impl HasName for Node {
    fn name(&self) -> &str {
        &self.name
    }
}
