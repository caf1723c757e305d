use crate::error::{Iteration, StageError};
use crate::port::{Input, Output};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Trait for a processing stage in the pipeline.
///
/// A stage owns its ports and does one unit of work per `iterate()` call:
/// pop from its inputs, push to its outputs. Port operations return
/// `Halt`, so `?` ends the iteration as soon as an input runs dry or the
/// pipeline is interrupted.
pub trait Stage: Send + 'static {
    /// Called once after wiring, before the first iteration.
    /// Reject bad parameters here with `StageError::InvalidParameter`.
    fn init(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Perform one unit of work
    fn iterate(&mut self) -> Iteration;

    /// True once the stage has run out of work on its own, e.g. a source
    /// with no inputs that has nothing left to emit
    fn is_ended(&self) -> bool {
        false
    }
}

pub(crate) type SharedStage = Arc<Mutex<Box<dyn Stage>>>;

/// Index of a stage within its builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the stage in creation order
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a stage gets scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Runs on its own thread, iterating until it ends
    #[default]
    Eager,
    /// Has no thread; iterates on its consumer's thread only when the
    /// consumer pops from an empty buffer. Use for sources that could
    /// otherwise run ahead of demand forever.
    OnRequestOnly,
}

/// Name and scheduling markers supplied when a stage is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    name: String,
    mode: ExecutionMode,
    stateful: bool,
}

impl StageDescriptor {
    /// An eager, stateless stage
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: ExecutionMode::Eager,
            stateful: false,
        }
    }

    /// Mark the stage on-request-only
    pub fn on_request_only(mut self) -> Self {
        self.mode = ExecutionMode::OnRequestOnly;
        self
    }

    /// Mark the stage as carrying state between iterations. Such a stage
    /// must never be replicated across threads; the engine runs every stage
    /// exactly once today, so this is informational.
    pub fn stateful(mut self) -> Self {
        self.stateful = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }
}

/// Port name used by the stock stages for their single output
pub const OUTPUT: &str = "output";
/// Port name used by the stock stages for their single input
pub const INPUT: &str = "input";

/// Pushes the same value every time it is pulled. Register it with
/// [`ConstantSource::descriptor`] so it only runs on demand.
pub struct ConstantSource<T> {
    output: Output<T>,
    value: T,
}

impl<T: Clone + Send + 'static> ConstantSource<T> {
    pub fn new(output: Output<T>, value: T) -> Self {
        Self { output, value }
    }

    /// On-request-only descriptor for a constant source
    pub fn descriptor(name: impl Into<String>) -> StageDescriptor {
        StageDescriptor::new(name).on_request_only()
    }
}

impl<T: Clone + Send + 'static> Stage for ConstantSource<T> {
    fn iterate(&mut self) -> Iteration {
        self.output.push(self.value.clone())
    }
}

/// Emits the items of an iterator, then ends its output
pub struct IterSource<I: Iterator> {
    output: Output<I::Item>,
    items: I,
}

impl<I> IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    pub fn new(output: Output<I::Item>, items: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            output,
            items: items.into_iter(),
        }
    }
}

impl<I> Stage for IterSource<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn iterate(&mut self) -> Iteration {
        match self.items.next() {
            Some(item) => self.output.push(item),
            None => self.output.end(),
        }
    }
}

/// Forwards every item unchanged
pub struct PassthroughStage<T> {
    input: Input<T>,
    output: Output<T>,
}

impl<T: Send + 'static> PassthroughStage<T> {
    pub fn new(input: Input<T>, output: Output<T>) -> Self {
        Self { input, output }
    }
}

impl<T: Send + 'static> Stage for PassthroughStage<T> {
    fn iterate(&mut self) -> Iteration {
        let item = self.input.pop()?;
        self.output.push(item)
    }
}

/// A mapping stage that transforms each item
pub struct MapStage<A, B, F> {
    input: Input<A>,
    output: Output<B>,
    mapper: F,
}

impl<A, B, F> MapStage<A, B, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> Result<B, StageError> + Send + 'static,
{
    pub fn new(input: Input<A>, output: Output<B>, mapper: F) -> Self {
        Self {
            input,
            output,
            mapper,
        }
    }
}

impl<A, B, F> Stage for MapStage<A, B, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnMut(A) -> Result<B, StageError> + Send + 'static,
{
    fn iterate(&mut self) -> Iteration {
        let item = self.input.pop()?;
        let mapped = (self.mapper)(item)?;
        self.output.push(mapped)
    }
}

/// A filtering stage that passes through items matching a predicate
pub struct FilterStage<T, F> {
    input: Input<T>,
    output: Output<T>,
    predicate: F,
}

impl<T, F> FilterStage<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    pub fn new(input: Input<T>, output: Output<T>, predicate: F) -> Self {
        Self {
            input,
            output,
            predicate,
        }
    }
}

impl<T, F> Stage for FilterStage<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    fn iterate(&mut self) -> Iteration {
        let item = self.input.pop()?;
        if (self.predicate)(&item) {
            self.output.push(item)?;
        }
        Ok(())
    }
}

/// Items gathered by a [`CollectSink`], readable from outside the pipeline
#[derive(Debug)]
pub struct Collected<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collected<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: Clone> Collected<T> {
    /// Copy of everything collected so far
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T> Collected<T> {
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Take everything collected so far
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

/// Terminal stage that stores every item it receives
pub struct CollectSink<T> {
    input: Input<T>,
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> CollectSink<T> {
    pub fn new(input: Input<T>) -> (Self, Collected<T>) {
        let items = Arc::new(Mutex::new(Vec::new()));
        let collected = Collected {
            items: Arc::clone(&items),
        };
        (Self { input, items }, collected)
    }
}

impl<T: Send + 'static> Stage for CollectSink<T> {
    fn iterate(&mut self) -> Iteration {
        let item = self.input.pop()?;
        self.items.lock().push(item);
        Ok(())
    }
}
