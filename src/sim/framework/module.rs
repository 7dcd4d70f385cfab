use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use anyhow::Result;

use crate::error::{GraphError, GraphResult};
use crate::id::{FieldId, ModuleId};
use crate::name::HasName;

use super::field::{ArrayField, Field, FieldKind, FieldOwner, FieldSpec};
use super::{FieldStore, StepContext};

/// A named port declared by a module.
#[derive(Debug, Clone)]
pub struct PortEntry {
    pub name: String,
    pub id: FieldId,
    pub kind: FieldKind,
}

/// Ports (inputs, outputs and vars) declared by one module instance.
///
/// Every field declared through a `Ports` is owned by the module and is
/// released with it.
#[derive(Debug, Clone)]
pub struct Ports {
    owner: ModuleId,
    entries: Vec<PortEntry>,
}

impl Ports {
    pub fn new(fields: &mut FieldStore) -> Self {
        Self {
            owner: fields.next_module_id(),
            entries: vec![],
        }
    }

    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    fn record<T>(&mut self, field: Field<T>, name: &str, kind: FieldKind) -> Field<T> {
        self.entries.push(PortEntry {
            name: name.to_string(),
            id: field.id(),
            kind,
        });
        field
    }

    pub fn declare<T: 'static>(&mut self, fields: &mut FieldStore, spec: FieldSpec) -> Field<T> {
        let (name, kind) = (spec.name.clone(), spec.kind);
        let field = fields.declare_owned::<T>(FieldOwner::Module(self.owner), spec);
        self.record(field, &name, kind)
    }

    pub fn declare_array<E: 'static>(
        &mut self,
        fields: &mut FieldStore,
        spec: FieldSpec,
    ) -> ArrayField<E> {
        let (name, kind) = (spec.name.clone(), spec.kind);
        let field = fields.declare_array::<E>(FieldOwner::Module(self.owner), spec);
        self.record(field, &name, kind)
    }

    /// Required input.
    pub fn input<T: 'static>(&mut self, fields: &mut FieldStore, name: &str, description: &str) -> Field<T> {
        self.declare(fields, FieldSpec::input(name).describe(description))
    }

    pub fn output<T: 'static>(&mut self, fields: &mut FieldStore, name: &str, description: &str) -> Field<T> {
        self.declare(fields, FieldSpec::output(name).describe(description))
    }

    /// Parameter initialised to `default`.
    pub fn var<T: 'static>(
        &mut self,
        fields: &mut FieldStore,
        name: &str,
        description: &str,
        default: T,
    ) -> Field<T> {
        let spec = FieldSpec::param(name).describe(description);
        let field = fields.declare_value(FieldOwner::Module(self.owner), spec, default);
        self.record(field, name, FieldKind::Param)
    }

    /// Looks a port up by name.
    pub fn get(&self, name: &str) -> Option<FieldId> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortEntry> {
        self.entries.iter()
    }
}

/// Exposes the ports a module declared at construction.
pub trait PortDeclaring {
    fn ports(&self) -> &Ports;
}

/// Optional one-time setup, run lazily before the first `execute`.
pub trait Initializable {
    fn initialize(&mut self, _ctx: &StepContext, _fields: &mut FieldStore) -> Result<()> {
        Ok(())
    }
}

/// The computation itself. Runs on every pipeline update; no caching happens
/// at this layer.
pub trait Executable {
    fn execute(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<()>;
}

/// A composable computation unit.
///
/// Concrete modules implement the capability traits; this trait only bundles
/// them so pipelines can store modules as trait objects.
pub trait Module: HasName + PortDeclaring + Initializable + Executable {}

impl<M: HasName + PortDeclaring + Initializable + Executable + ?Sized> Module for M {}

/// Fails with [`GraphError::MissingInput`] for the first required input that
/// is neither connected nor set.
pub fn check_inputs(module: &dyn Module, fields: &FieldStore) -> GraphResult<()> {
    for port in module.ports().iter().filter(|p| p.kind == FieldKind::Input) {
        let required = fields.meta(port.id).map(|m| m.required).unwrap_or(true);
        if required && !fields.is_bound(port.id) {
            return Err(GraphError::MissingInput {
                module: module.name().to_string(),
                input: port.name.clone(),
            });
        }
    }
    Ok(())
}

/// Shared handle to a module instance.
///
/// Clones refer to the same instance, which is what pipelines use to reject
/// duplicate pushes. The one-time initialization flag travels with the
/// instance, not with the pipeline.
#[derive(Clone)]
pub struct ModuleHandle {
    module: Rc<RefCell<dyn Module>>,
    initialized: Rc<Cell<bool>>,
    name: String,
    id: ModuleId,
}

impl ModuleHandle {
    pub fn new<M: Module + 'static>(module: M) -> Self {
        let name = module.name().to_string();
        let id = module.ports().owner();
        Self {
            module: Rc::new(RefCell::new(module)),
            initialized: Rc::new(Cell::new(false)),
            name,
            id,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn same_instance(&self, other: &ModuleHandle) -> bool {
        Rc::ptr_eq(&self.module, &other.module)
    }

    pub fn borrow(&self) -> Ref<'_, dyn Module> {
        self.module.borrow()
    }

    /// Port lookup by name, for wiring modules after they were boxed.
    pub fn port(&self, name: &str) -> Option<FieldId> {
        self.module.borrow().ports().get(name)
    }

    /// Validates inputs, runs the setup hook once, then executes.
    pub fn run(&self, ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let mut module = self.module.try_borrow_mut().map_err(|_| {
            GraphError::Configuration(format!("module `{}` re-entered while running", self.name))
        })?;
        check_inputs(&*module, fields)?;
        if !self.initialized.get() {
            log::debug!("initializing module `{}`", self.name);
            module.initialize(ctx, fields)?;
            self.initialized.set(true);
        }
        log::trace!("execute `{}` (frame {})", self.name, ctx.frame);
        module.execute(ctx, fields)
    }
}

impl HasName for ModuleHandle {
    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("initialized", &self.initialized.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        ports: Ports,
        input: Field<u32>,
        output: Field<u32>,
        inits: Rc<Cell<usize>>,
    }

    impl Dummy {
        fn new(fields: &mut FieldStore, inits: Rc<Cell<usize>>) -> Self {
            let mut ports = Ports::new(fields);
            let input = ports.input(fields, "in", "value to copy");
            let output = ports.output(fields, "out", "copied value");
            Self {
                ports,
                input,
                output,
                inits,
            }
        }
    }

    impl HasName for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }
    }

    impl PortDeclaring for Dummy {
        fn ports(&self) -> &Ports {
            &self.ports
        }
    }

    impl Initializable for Dummy {
        fn initialize(&mut self, _ctx: &StepContext, _fields: &mut FieldStore) -> Result<()> {
            self.inits.set(self.inits.get() + 1);
            Ok(())
        }
    }

    impl Executable for Dummy {
        fn execute(&mut self, _ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
            let v = *fields.read(self.input)?;
            fields.write(self.output, v + 1)?;
            Ok(())
        }
    }

    #[test]
    fn test_initialize_runs_once() -> Result<()> {
        let mut fields = FieldStore::new();
        let inits = Rc::new(Cell::new(0));
        let source = fields.declare::<u32>(FieldSpec::output("source"));
        let dummy = Dummy::new(&mut fields, inits.clone());
        fields.connect(source, dummy.input)?;
        fields.write(source, 41)?;
        let out = dummy.output;

        let handle = ModuleHandle::new(dummy);
        let ctx = StepContext::default();
        handle.run(&ctx, &mut fields)?;
        handle.run(&ctx, &mut fields)?;
        assert_eq!(inits.get(), 1);
        assert!(handle.is_initialized());
        assert_eq!(*fields.read(out)?, 42);
        Ok(())
    }

    #[test]
    fn test_missing_required_input() {
        let mut fields = FieldStore::new();
        let dummy = Dummy::new(&mut fields, Rc::new(Cell::new(0)));
        let handle = ModuleHandle::new(dummy);

        let err = handle.run(&StepContext::default(), &mut fields).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::MissingInput { input, .. }) if input == "in"
        ));
        // Setup is not attempted when inputs are missing.
        assert!(!handle.is_initialized());
    }

    #[test]
    fn test_ports_are_owned_by_module() {
        let mut fields = FieldStore::new();
        let dummy = Dummy::new(&mut fields, Rc::new(Cell::new(0)));
        let owner = FieldOwner::Module(dummy.ports().owner());
        assert_eq!(fields.owned_by(owner).len(), 2);
        assert_eq!(dummy.ports().get("out"), Some(dummy.output.id()));
        assert_eq!(dummy.ports().get("nope"), None);
    }

    #[test]
    fn test_clones_share_identity() {
        let mut fields = FieldStore::new();
        let a = ModuleHandle::new(Dummy::new(&mut fields, Rc::new(Cell::new(0))));
        let b = ModuleHandle::new(Dummy::new(&mut fields, Rc::new(Cell::new(0))));
        assert!(a.same_instance(&a.clone()));
        assert!(!a.same_instance(&b));
        assert_ne!(a.id(), b.id());
    }
}
