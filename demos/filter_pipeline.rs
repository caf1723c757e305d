//! Number processing pipeline demonstrating filtering and transformations
//!
//! Pipeline:
//! 1. Generate: Produces numbers 1-100
//! 2. Filter: Keep only even numbers
//! 3. Scale: Multiply by a factor pulled on demand from a constant source
//! 4. Aggregate: Sum all numbers
//!
//! Usage: cargo run --example filter_pipeline --release

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use worker_pipeline::{
    ConstantSource, FilterStage, Input, IterSource, Iteration, Output, PipelineBuilder,
    PipelineConfig, Stage, StageDescriptor, INPUT, OUTPUT,
};

/// Multiplies each number by a factor read from a second input
struct Scale {
    numbers: Input<u32>,
    factor: Input<u32>,
    output: Output<u64>,
}

impl Stage for Scale {
    fn iterate(&mut self) -> Iteration {
        let number = self.numbers.pop()?;
        let factor = self.factor.pop()?;
        self.output.push(u64::from(number) * u64::from(factor))
    }
}

/// Aggregator that sums all numbers
struct Aggregate {
    input: Input<u64>,
    sum: Arc<AtomicU64>,
    count: u64,
}

impl Stage for Aggregate {
    fn iterate(&mut self) -> Iteration {
        let value = self.input.pop()?;
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count += 1;
        if self.count % 10 == 0 {
            println!("  aggregated {} numbers", self.count);
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Number Processing Pipeline");
    println!("==========================");
    println!("Processing numbers 1-100: filter evens, multiply by 10, sum\n");

    let sum = Arc::new(AtomicU64::new(0));
    let config = PipelineConfig::new()
        .with_default_capacity(16)
        .with_join_timeout(Duration::from_secs(30));
    let mut builder = PipelineBuilder::with_config(config)?;

    let generator = builder.create_stage(StageDescriptor::new("generator"), |ports| {
        IterSource::new(ports.output(OUTPUT), 1..=100u32)
    })?;
    let filter = builder.create_stage(StageDescriptor::new("even_filter"), |ports| {
        FilterStage::new(ports.input(INPUT), ports.output(OUTPUT), |n: &u32| n % 2 == 0)
    })?;
    let factor = builder.create_stage(ConstantSource::<u32>::descriptor("factor"), |ports| {
        ConstantSource::new(ports.output(OUTPUT), 10u32)
    })?;
    let scale = builder.create_stage(StageDescriptor::new("scale"), |ports| Scale {
        numbers: ports.input("numbers"),
        factor: ports.input("factor"),
        output: ports.output(OUTPUT),
    })?;
    let aggregate = builder.create_stage(StageDescriptor::new("aggregate").stateful(), |ports| Aggregate {
        input: ports.input(INPUT),
        sum: Arc::clone(&sum),
        count: 0,
    })?;

    let generated = builder.output::<u32>(generator, OUTPUT)?;
    let filter_in = builder.input::<u32>(filter, INPUT)?;
    builder.connect(&generated, &filter_in)?;

    let evens = builder.output::<u32>(filter, OUTPUT)?;
    let scale_numbers = builder.input::<u32>(scale, "numbers")?;
    builder.connect(&evens, &scale_numbers)?;

    let factor_out = builder.output::<u32>(factor, OUTPUT)?;
    let scale_factor = builder.input::<u32>(scale, "factor")?;
    builder.connect(&factor_out, &scale_factor)?;

    let scaled = builder.output::<u64>(scale, OUTPUT)?;
    let aggregate_in = builder.input::<u64>(aggregate, INPUT)?;
    builder.connect(&scaled, &aggregate_in)?;

    let start = Instant::now();
    let report = builder.build()?.start()?.join()?;

    println!("\n=== Results ===");
    println!("Sum of (even numbers * 10): {}", sum.load(Ordering::Relaxed));
    println!("Expected: {}", (1..=100u64).filter(|n| n % 2 == 0).map(|n| n * 10).sum::<u64>());
    println!("Time elapsed: {:?}", start.elapsed());
    println!("\n{}", report.summary());

    Ok(())
}
