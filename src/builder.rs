use crate::buffer::{BlockingBuffer, Buffer, Conduit, PullBuffer};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::graph::WorkerGraph;
use crate::interrupt::InterruptSignal;
use crate::metrics::StageMetrics;
use crate::pipeline::{Pipeline, StageInfo};
use crate::port::{self, Binding, Direction, Input, Output, PortFactory, PortKey};
use crate::runner::{PassiveExit, StageRunner};
use crate::stage::{ExecutionMode, SharedStage, Stage, StageDescriptor, StageId};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

struct StageEntry {
    descriptor: StageDescriptor,
    stage: SharedStage,
    metrics: StageMetrics,
    exit: PassiveExit,
}

struct RegisteredPort {
    handle: Box<dyn Any + Send + Sync>,
    connected: bool,
}

/// Builder for wiring stages into a runnable [`Pipeline`].
///
/// ```ignore
/// let mut builder = PipelineBuilder::new();
/// let source = builder.create_stage(StageDescriptor::new("numbers"), |ports| {
///     IterSource::new(ports.output(OUTPUT), 0..5u32)
/// })?;
/// let sink = builder.create_stage(StageDescriptor::new("sink"), |ports| {
///     PrintSink::new(ports.input::<u32>(INPUT))
/// })?;
///
/// let output = builder.output::<u32>(source, OUTPUT)?;
/// let input = builder.input::<u32>(sink, INPUT)?;
/// builder.connect_with_capacity(&output, &input, 2)?;
/// let report = builder.build()?.start()?.join()?;
/// ```
pub struct PipelineBuilder {
    id: u64,
    config: PipelineConfig,
    stages: Vec<StageEntry>,
    ports: HashMap<PortKey, RegisteredPort>,
    bindings: Vec<Box<dyn Binding>>,
    graph: WorkerGraph,
    interrupt: InterruptSignal,
}

impl PipelineBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            config: PipelineConfig::default(),
            stages: Vec::new(),
            ports: HashMap::new(),
            bindings: Vec::new(),
            graph: WorkerGraph::new(),
            interrupt: InterruptSignal::new(),
        }
    }

    /// Create a builder with a custom configuration
    pub fn with_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Register a stage.
    ///
    /// `factory` receives a [`PortFactory`] for declaring the stage's ports;
    /// the placeholders it hands out become real once `build()` runs.
    pub fn create_stage<S, F>(&mut self, descriptor: StageDescriptor, factory: F) -> Result<StageId>
    where
        S: Stage,
        F: FnOnce(&mut PortFactory<'_>) -> S,
    {
        let id = StageId::new(self.stages.len());
        let mut ports = PortFactory::new(self.id, id, descriptor.name());
        let stage = factory(&mut ports);
        let declared = ports
            .finish()
            .map_err(|port| PipelineError::DuplicatePort {
                stage: descriptor.name().to_string(),
                port,
            })?;

        for port in declared {
            self.ports.insert(
                port.key,
                RegisteredPort {
                    handle: port.handle,
                    connected: false,
                },
            );
        }

        let graph_id = self.graph.add_node(descriptor.name(), descriptor.mode());
        debug_assert_eq!(graph_id, id);
        debug!(
            stage = %descriptor.name(),
            mode = ?descriptor.mode(),
            stateful = descriptor.is_stateful(),
            "created stage"
        );

        let stage: Box<dyn Stage> = Box::new(stage);
        self.stages.push(StageEntry {
            descriptor,
            stage: Arc::new(Mutex::new(stage)),
            metrics: StageMetrics::new(self.config.latency_window),
            exit: PassiveExit::default(),
        });
        Ok(id)
    }

    /// Look up an output port by name
    pub fn output<T: Send + 'static>(&self, stage: StageId, name: &str) -> Result<Output<T>> {
        self.lookup::<Output<T>>(stage, name, Direction::Output)
    }

    /// Look up an input port by name
    pub fn input<T: Send + 'static>(&self, stage: StageId, name: &str) -> Result<Input<T>> {
        self.lookup::<Input<T>>(stage, name, Direction::Input)
    }

    fn lookup<P: Clone + 'static>(&self, stage: StageId, name: &str, direction: Direction) -> Result<P> {
        let stage_name = self
            .stages
            .get(stage.index())
            .map(|entry| entry.descriptor.name().to_string())
            .unwrap_or_else(|| stage.to_string());
        let key = PortKey {
            stage,
            direction,
            name: name.to_string(),
        };
        let registered = self.ports.get(&key).ok_or_else(|| PipelineError::UnknownPort {
            stage: stage_name.clone(),
            port: name.to_string(),
            direction: direction.as_str(),
        })?;
        registered
            .handle
            .downcast_ref::<P>()
            .cloned()
            .ok_or(PipelineError::PortTypeMismatch {
                stage: stage_name,
                port: name.to_string(),
            })
    }

    /// Connect two ports with a buffer of the configured default capacity
    pub fn connect<T: Send + 'static>(&mut self, output: &Output<T>, input: &Input<T>) -> Result<()> {
        let capacity = self.config.default_capacity;
        self.connect_with_capacity(output, input, capacity)
    }

    /// Connect two ports with a buffer holding up to `capacity` items.
    ///
    /// If the producing stage is on-request-only the connection uses a
    /// [`PullBuffer`] and `capacity` is ignored.
    pub fn connect_with_capacity<T: Send + 'static>(
        &mut self,
        output: &Output<T>,
        input: &Input<T>,
        capacity: usize,
    ) -> Result<()> {
        if capacity == 0 {
            return Err(PipelineError::InvalidCapacity(capacity));
        }
        self.check_port(output.key(), output.stage_name(), output.builder_id())?;
        self.check_port(input.key(), input.stage_name(), input.builder_id())?;

        let producer = output.stage();
        let consumer = input.stage();
        let entry = &self.stages[producer.index()];

        let (buffer, conduit): (Arc<dyn Buffer<T>>, Arc<dyn Conduit>) = match entry.descriptor.mode() {
            ExecutionMode::OnRequestOnly => {
                let pull = Arc::new(PullBuffer::<T>::new(
                    Arc::downgrade(&entry.stage),
                    entry.descriptor.name(),
                    entry.metrics.clone(),
                    entry.exit.clone(),
                    self.interrupt.clone(),
                ));
                let buffer: Arc<dyn Buffer<T>> = pull.clone();
                let conduit: Arc<dyn Conduit> = pull;
                (buffer, conduit)
            }
            ExecutionMode::Eager => {
                let blocking = Arc::new(BlockingBuffer::<T>::new(capacity, self.interrupt.clone()));
                let buffer: Arc<dyn Buffer<T>> = blocking.clone();
                let conduit: Arc<dyn Conduit> = blocking;
                (buffer, conduit)
            }
        };

        self.graph.add_edge(producer, conduit, consumer);
        self.bindings.push(port::connection(output, input, buffer));
        for key in [output.key(), input.key()] {
            if let Some(registered) = self.ports.get_mut(key) {
                registered.connected = true;
            }
        }
        Ok(())
    }

    fn check_port(&self, key: &PortKey, stage_name: &str, builder: u64) -> Result<()> {
        if builder != self.id {
            return Err(PipelineError::ForeignPort {
                stage: stage_name.to_string(),
                port: key.name.clone(),
            });
        }
        match self.ports.get(key) {
            Some(registered) if registered.connected => Err(PipelineError::AlreadyConnected {
                stage: stage_name.to_string(),
                port: key.name.clone(),
            }),
            Some(_) => Ok(()),
            None => Err(PipelineError::UnknownPort {
                stage: stage_name.to_string(),
                port: key.name.clone(),
                direction: key.direction.as_str(),
            }),
        }
    }

    /// Bind every port to its buffer, initialize every stage in creation
    /// order and return the runnable pipeline.
    ///
    /// Fails with `StageInit` if any stage rejects its parameters; no
    /// execution unit is created in that case.
    pub fn build(self) -> Result<Pipeline> {
        for binding in self.bindings {
            binding.bind();
        }

        for (key, registered) in &self.ports {
            if !registered.connected {
                warn!(
                    stage = %self.stages[key.stage.index()].descriptor.name(),
                    port = %key.name,
                    direction = key.direction.as_str(),
                    "port left unconnected"
                );
            }
        }

        for entry in &self.stages {
            entry
                .stage
                .lock()
                .init()
                .map_err(|source| PipelineError::StageInit {
                    stage: entry.descriptor.name().to_string(),
                    source,
                })?;
            debug!(stage = %entry.descriptor.name(), "initialized stage");
        }

        let mut runners = Vec::new();
        let mut stages = Vec::with_capacity(self.stages.len());
        for (index, entry) in self.stages.into_iter().enumerate() {
            if entry.descriptor.mode() == ExecutionMode::Eager {
                runners.push(StageRunner::new(
                    StageId::new(index),
                    entry.descriptor.name(),
                    Arc::clone(&entry.stage),
                    entry.metrics.clone(),
                    self.interrupt.clone(),
                ));
            }
            stages.push(StageInfo {
                descriptor: entry.descriptor,
                _stage: entry.stage,
                metrics: entry.metrics,
                exit: entry.exit,
            });
        }

        Ok(Pipeline::new(
            self.graph,
            stages,
            runners,
            self.interrupt,
            self.config,
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
