use anyhow::Result;

use crate::error::{self, GraphError, GraphResult};
use crate::name::{HasName, join_names};

use super::{FieldStore, ModuleHandle, StepContext};

/// Result of one [`Pipeline::update`] that did not hit a fatal error.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every module ran.
    Completed { executed: usize },
    /// A module failed; the modules after it were skipped for this call.
    Aborted {
        executed: usize,
        module: String,
        error: anyhow::Error,
    },
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn executed(&self) -> usize {
        match self {
            Self::Completed { executed } | Self::Aborted { executed, .. } => *executed,
        }
    }
}

/// Executes a sequence of modules in push order.
///
/// There is no dependency sorting: producers must be pushed before their
/// consumers, otherwise consumers see the previous call's (or default) data.
pub struct Pipeline {
    label: String,
    modules: Vec<ModuleHandle>,
}

impl Pipeline {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            modules: vec![],
        }
    }

    /// Builder-style [`Pipeline::push_module`].
    pub fn with_module(mut self, module: ModuleHandle) -> GraphResult<Self> {
        self.push_module(module)?;
        Ok(self)
    }

    /// Appends `module`. Pushing an instance that is already present fails and
    /// leaves the pipeline unchanged.
    pub fn push_module(&mut self, module: ModuleHandle) -> GraphResult<()> {
        if self.modules.iter().any(|m| m.same_instance(&module)) {
            return Err(GraphError::Configuration(format!(
                "module `{}` ({}) is already in pipeline `{}`",
                module.name(),
                module.id(),
                self.label
            )));
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> &[ModuleHandle] {
        &self.modules
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    /// Runs every module once, strictly in push order.
    ///
    /// A module error stops the remaining modules and is returned as
    /// [`PipelineOutcome::Aborted`]; only fatal errors are returned as `Err`.
    pub fn update(&mut self, ctx: &StepContext, fields: &mut FieldStore) -> Result<PipelineOutcome> {
        log::trace!("pipeline `{}`: [{}]", self.label, join_names(&self.modules, ", "));
        for (executed, module) in self.modules.iter().enumerate() {
            if let Err(err) = module.run(ctx, fields) {
                if error::is_fatal(&err) {
                    log::error!("pipeline `{}`: fatal error in `{}`: {err:#}", self.label, module.name());
                    return Err(err);
                }
                log::warn!(
                    "pipeline `{}`: `{}` failed, skipping {} remaining module(s): {err:#}",
                    self.label,
                    module.name(),
                    self.modules.len() - executed - 1
                );
                return Ok(PipelineOutcome::Aborted {
                    executed,
                    module: module.name().to_string(),
                    error: err,
                });
            }
        }
        Ok(PipelineOutcome::Completed {
            executed: self.modules.len(),
        })
    }
}

impl HasName for Pipeline {
    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::sim::framework::{
        Executable, Field, FieldSpec, Initializable, PortDeclaring, Ports,
    };

    /// Appends its tag to a shared log on every execution.
    struct Tracer {
        ports: Ports,
        tag: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        fail_with: Option<fn() -> GraphError>,
    }

    impl Tracer {
        fn new(fields: &mut FieldStore, tag: &'static str, log: Rc<RefCell<Vec<&'static str>>>) -> Self {
            Self {
                ports: Ports::new(fields),
                tag,
                log,
                fail_with: None,
            }
        }
    }

    impl HasName for Tracer {
        fn name(&self) -> &str {
            self.tag
        }
    }
    impl PortDeclaring for Tracer {
        fn ports(&self) -> &Ports {
            &self.ports
        }
    }
    impl Initializable for Tracer {}
    impl Executable for Tracer {
        fn execute(&mut self, _ctx: &StepContext, _fields: &mut FieldStore) -> Result<()> {
            self.log.borrow_mut().push(self.tag);
            if let Some(make) = self.fail_with {
                return Err(make().into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_runs_in_push_order() -> Result<()> {
        let mut fields = FieldStore::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut pipeline = Pipeline::new("sim")
            .with_module(ModuleHandle::new(Tracer::new(&mut fields, "b", log.clone())))?
            .with_module(ModuleHandle::new(Tracer::new(&mut fields, "a", log.clone())))?;

        let outcome = pipeline.update(&StepContext::default(), &mut fields)?;
        assert!(outcome.is_completed());
        assert_eq!(outcome.executed(), 2);
        assert_eq!(*log.borrow(), vec!["b", "a"]);
        Ok(())
    }

    #[test]
    fn test_duplicate_push_is_rejected() -> Result<()> {
        let mut fields = FieldStore::new();
        let log = Rc::new(RefCell::new(vec![]));
        let m = ModuleHandle::new(Tracer::new(&mut fields, "m", log));
        let mut pipeline = Pipeline::new("sim");
        pipeline.push_module(m.clone())?;

        let err = pipeline.push_module(m.clone()).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.module_names(), vec!["m"]);
        Ok(())
    }

    #[test]
    fn test_failure_aborts_remaining_modules() -> Result<()> {
        let mut fields = FieldStore::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut failing = Tracer::new(&mut fields, "bad", log.clone());
        failing.fail_with = Some(|| GraphError::UnboundField("x".into()));
        let mut pipeline = Pipeline::new("sim")
            .with_module(ModuleHandle::new(Tracer::new(&mut fields, "first", log.clone())))?
            .with_module(ModuleHandle::new(failing))?
            .with_module(ModuleHandle::new(Tracer::new(&mut fields, "never", log.clone())))?;

        let outcome = pipeline.update(&StepContext::default(), &mut fields)?;
        match outcome {
            PipelineOutcome::Aborted { executed, module, .. } => {
                assert_eq!(executed, 1);
                assert_eq!(module, "bad");
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(*log.borrow(), vec!["first", "bad"]);
        Ok(())
    }

    #[test]
    fn test_fatal_error_propagates() {
        let mut fields = FieldStore::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut failing = Tracer::new(&mut fields, "oom", log);
        failing.fail_with = Some(|| GraphError::ResourceExhausted {
            field: "x".into(),
            requested_bytes: 1,
            budget_bytes: 0,
        });
        let mut pipeline = Pipeline::new("sim");
        pipeline.push_module(ModuleHandle::new(failing)).unwrap();

        let err = pipeline
            .update(&StepContext::default(), &mut fields)
            .unwrap_err();
        assert!(error::is_fatal(&err));
    }

    #[test]
    fn test_module_declaring_unused_field_is_fine() -> Result<()> {
        let mut fields = FieldStore::new();
        let log = Rc::new(RefCell::new(vec![]));
        let mut tracer = Tracer::new(&mut fields, "t", log);
        let _: Field<f64> = tracer
            .ports
            .declare(&mut fields, FieldSpec::input("opt").optional());
        let mut pipeline = Pipeline::new("sim").with_module(ModuleHandle::new(tracer))?;
        assert!(pipeline.update(&StepContext::default(), &mut fields)?.is_completed());
        Ok(())
    }
}
