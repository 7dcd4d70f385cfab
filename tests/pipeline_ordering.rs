use anyhow::Result;
use dynograph::sim::framework::{Executable, Initializable, PortDeclaring, Ports};
use dynograph::{
    Field, FieldStore, GraphError, HasName, ModuleHandle, Pipeline, PipelineOutcome, StepContext,
};

/// Publishes its `value` var on `out`.
struct Producer {
    ports: Ports,
    value: Field<i64>,
    out: Field<i64>,
}

impl Producer {
    fn new(fields: &mut FieldStore) -> Result<Self> {
        let mut ports = Ports::new(fields);
        let value = ports.var(fields, "value", "number to publish", 0);
        let out = ports.output(fields, "out", "published number");
        fields.write(out, 0)?;
        Ok(Self { ports, value, out })
    }
}

impl HasName for Producer {
    fn name(&self) -> &str {
        "producer"
    }
}

impl PortDeclaring for Producer {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for Producer {}

impl Executable for Producer {
    fn execute(&mut self, _ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let v = *fields.read(self.value)?;
        fields.write(self.out, v)?;
        Ok(())
    }
}

/// Writes twice its input.
struct Doubler {
    ports: Ports,
    input: Field<i64>,
    out: Field<i64>,
}

impl Doubler {
    fn new(fields: &mut FieldStore) -> Self {
        let mut ports = Ports::new(fields);
        let input = ports.input(fields, "in", "number to double");
        let out = ports.output(fields, "out", "doubled number");
        Self { ports, input, out }
    }
}

impl HasName for Doubler {
    fn name(&self) -> &str {
        "doubler"
    }
}

impl PortDeclaring for Doubler {
    fn ports(&self) -> &Ports {
        &self.ports
    }
}

impl Initializable for Doubler {}

impl Executable for Doubler {
    fn execute(&mut self, _ctx: &StepContext, fields: &mut FieldStore) -> Result<()> {
        let v = *fields.read(self.input)?;
        fields.write(self.out, 2 * v)?;
        Ok(())
    }
}

struct Wired {
    fields: FieldStore,
    producer: ModuleHandle,
    doubler: ModuleHandle,
    value: Field<i64>,
    doubled: Field<i64>,
}

fn wired() -> Result<Wired> {
    let mut fields = FieldStore::new();
    let producer = Producer::new(&mut fields)?;
    let doubler = Doubler::new(&mut fields);
    fields.connect(producer.out, doubler.input)?;
    let (value, doubled) = (producer.value, doubler.out);
    Ok(Wired {
        fields,
        producer: ModuleHandle::new(producer),
        doubler: ModuleHandle::new(doubler),
        value,
        doubled,
    })
}

#[test]
fn test_updates_never_reuse_previous_results() -> Result<()> {
    let Wired {
        mut fields,
        producer,
        doubler,
        value,
        doubled,
    } = wired()?;
    let mut pipeline = Pipeline::new("sim").with_module(producer)?.with_module(doubler)?;
    let ctx = StepContext::default();

    fields.write(value, 3)?;
    assert!(pipeline.update(&ctx, &mut fields)?.is_completed());
    assert_eq!(*fields.read(doubled)?, 6);

    fields.write(value, 5)?;
    pipeline.update(&ctx, &mut fields)?;
    assert_eq!(*fields.read(doubled)?, 10);
    Ok(())
}

#[test]
fn test_consumer_before_producer_sees_stale_data() -> Result<()> {
    let Wired {
        mut fields,
        producer,
        doubler,
        value,
        doubled,
    } = wired()?;
    let mut pipeline = Pipeline::new("sim").with_module(doubler)?.with_module(producer)?;
    let ctx = StepContext::default();

    fields.write(value, 3)?;
    assert!(pipeline.update(&ctx, &mut fields)?.is_completed());
    assert_eq!(*fields.read(doubled)?, 0);

    fields.write(value, 5)?;
    assert!(pipeline.update(&ctx, &mut fields)?.is_completed());
    assert_eq!(*fields.read(doubled)?, 6);
    Ok(())
}

#[test]
fn test_duplicate_push_keeps_module_list() -> Result<()> {
    let Wired {
        producer, doubler, ..
    } = wired()?;
    let mut pipeline = Pipeline::new("sim");
    pipeline.push_module(producer.clone())?;
    pipeline.push_module(doubler.clone())?;

    let err = pipeline.push_module(producer).unwrap_err();
    assert!(matches!(err, GraphError::Configuration(_)));
    assert_eq!(pipeline.module_names(), vec!["producer", "doubler"]);
    Ok(())
}

#[test]
fn test_unconnected_input_aborts_rest_of_pipeline() -> Result<()> {
    let mut fields = FieldStore::new();
    let doubler = Doubler::new(&mut fields);
    let producer = Producer::new(&mut fields)?;
    let value = producer.value;
    let out = producer.out;
    fields.write(value, 9)?;
    let mut pipeline = Pipeline::new("sim")
        .with_module(ModuleHandle::new(doubler))?
        .with_module(ModuleHandle::new(producer))?;

    match pipeline.update(&StepContext::default(), &mut fields)? {
        PipelineOutcome::Aborted {
            executed,
            module,
            error,
        } => {
            assert_eq!(executed, 0);
            assert_eq!(module, "doubler");
            assert!(matches!(
                error.downcast_ref::<GraphError>(),
                Some(GraphError::MissingInput { .. })
            ));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    // The producer after the failing module did not run.
    assert_eq!(*fields.read(out)?, 0);
    Ok(())
}
