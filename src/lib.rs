//! A thread-per-stage dataflow engine.
//!
//! Stages are wired together through typed, capacity-bounded, blocking
//! buffers and run concurrently until their input is exhausted. When a stage
//! stops, the buffers it feeds are poisoned: consumers drain what is left,
//! then stop in turn. The run is over once every terminal stage has finished.
//!
//! # Features
//!
//! - Blocking FIFO buffers with a fixed capacity (backpressure by parking)
//! - Pull-driven buffers for on-request-only sources that must never run
//!   ahead of demand
//! - Typed port handles wired through an explicit builder
//! - Poison-pill termination and cooperative forced interruption
//! - Per-stage metrics: iterations, throughput, latency percentiles
//!
//! # Example
//!
//! ```ignore
//! use worker_pipeline::{CollectSink, IterSource, PipelineBuilder, StageDescriptor, INPUT, OUTPUT};
//!
//! let mut builder = PipelineBuilder::new();
//! let numbers = builder.create_stage(StageDescriptor::new("numbers"), |ports| {
//!     IterSource::new(ports.output::<u32>(OUTPUT), 0..5)
//! })?;
//! let mut collected = None;
//! let sink = builder.create_stage(StageDescriptor::new("sink"), |ports| {
//!     let (sink, items) = CollectSink::new(ports.input::<u32>(INPUT));
//!     collected = Some(items);
//!     sink
//! })?;
//!
//! let output = builder.output::<u32>(numbers, OUTPUT)?;
//! let input = builder.input::<u32>(sink, INPUT)?;
//! builder.connect_with_capacity(&output, &input, 2)?;
//!
//! let report = builder.build()?.start()?.join()?;
//! assert!(report.is_success());
//! ```

pub mod buffer;
pub mod builder;
pub mod config;
pub mod error;
mod graph;
mod interrupt;
pub mod metrics;
pub mod pipeline;
pub mod port;
pub mod runner;
pub mod stage;

// Re-exports for convenience
pub use buffer::{BlockingBuffer, Buffer, Conduit, PullBuffer};
pub use builder::PipelineBuilder;
pub use config::{PipelineConfig, DEFAULT_CAPACITY};
pub use error::{Halt, Iteration, PipelineError, Result, StageError};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{Pipeline, RunReport, RunningPipeline, StageReport};
pub use port::{Input, Output, PortFactory};
pub use runner::StageExit;
pub use stage::{
    Collected, CollectSink, ConstantSource, ExecutionMode, FilterStage, IterSource, MapStage,
    PassthroughStage, Stage, StageDescriptor, StageId, INPUT, OUTPUT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
