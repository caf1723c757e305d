use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use worker_pipeline::{
    CollectSink, Collected, ConstantSource, FilterStage, Input, IterSource, Iteration, MapStage,
    Output, PassthroughStage, PipelineBuilder, PipelineConfig, PipelineError, Stage,
    StageDescriptor, StageError, StageExit, StageId, INPUT, OUTPUT,
};

/// Consumes a fixed number of items, then reports itself ended
struct Take<T> {
    input: Input<T>,
    remaining: usize,
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> Stage for Take<T> {
    fn iterate(&mut self) -> Iteration {
        let item = self.input.pop()?;
        self.seen.lock().push(item);
        self.remaining -= 1;
        Ok(())
    }

    fn is_ended(&self) -> bool {
        self.remaining == 0
    }
}

/// Source without inputs that runs out of work on its own
struct Countdown {
    output: Output<u32>,
    next: u32,
}

impl Stage for Countdown {
    fn iterate(&mut self) -> Iteration {
        self.output.push(self.next)?;
        self.next -= 1;
        Ok(())
    }

    fn is_ended(&self) -> bool {
        self.next == 0
    }
}

/// Counts how often it is asked to produce
struct Counting {
    output: Output<usize>,
    calls: Arc<AtomicUsize>,
}

impl Stage for Counting {
    fn iterate(&mut self) -> Iteration {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.output.push(call)
    }
}

/// Joins a number with a suffix pulled from a second input
struct Label {
    numbers: Input<u32>,
    suffixes: Input<String>,
    output: Output<String>,
}

impl Stage for Label {
    fn iterate(&mut self) -> Iteration {
        let number = self.numbers.pop()?;
        let suffix = self.suffixes.pop()?;
        self.output.push(format!("{}{}", number, suffix))
    }
}

struct Rejects {
    input: Input<u32>,
    output: Output<u32>,
    iterations: Arc<AtomicUsize>,
}

impl Stage for Rejects {
    fn init(&mut self) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(
            "directory '/missing' does not exist".into(),
        ))
    }

    fn iterate(&mut self) -> Iteration {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        let item = self.input.pop()?;
        self.output.push(item)
    }
}

/// Sink that is slow to consume
struct Slow {
    input: Input<u64>,
    delay: Duration,
}

impl Stage for Slow {
    fn iterate(&mut self) -> Iteration {
        self.input.pop()?;
        std::thread::sleep(self.delay);
        Ok(())
    }
}

fn source<T, I>(builder: &mut PipelineBuilder, name: &str, items: I) -> (StageId, Output<T>)
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let id = builder
        .create_stage(StageDescriptor::new(name), |ports| {
            IterSource::new(ports.output::<T>(OUTPUT), items)
        })
        .expect("create source");
    let output = builder.output::<T>(id, OUTPUT).expect("source output");
    (id, output)
}

fn passthrough<T: Send + 'static>(builder: &mut PipelineBuilder, name: &str) -> (Input<T>, Output<T>) {
    let id = builder
        .create_stage(StageDescriptor::new(name), |ports| {
            PassthroughStage::new(ports.input::<T>(INPUT), ports.output::<T>(OUTPUT))
        })
        .expect("create passthrough");
    (
        builder.input::<T>(id, INPUT).expect("passthrough input"),
        builder.output::<T>(id, OUTPUT).expect("passthrough output"),
    )
}

fn collector<T: Send + 'static>(builder: &mut PipelineBuilder, name: &str) -> (Input<T>, Collected<T>) {
    let mut collected = None;
    let id = builder
        .create_stage(StageDescriptor::new(name), |ports| {
            let (sink, items) = CollectSink::new(ports.input::<T>(INPUT));
            collected = Some(items);
            sink
        })
        .expect("create sink");
    (
        builder.input::<T>(id, INPUT).expect("sink input"),
        collected.expect("collected handle"),
    )
}

#[test]
fn test_three_stage_chain_preserves_order() {
    let mut builder = PipelineBuilder::new();
    let (_, a_out) = source(&mut builder, "a", 1..=5u32);
    let (b_in, b_out) = passthrough::<u32>(&mut builder, "b");
    let (c_in, collected) = collector::<u32>(&mut builder, "c");

    builder.connect_with_capacity(&a_out, &b_in, 2).unwrap();
    builder.connect_with_capacity(&b_out, &c_in, 2).unwrap();

    let report = builder
        .build()
        .expect("Pipeline build failed")
        .start()
        .expect("Pipeline start failed")
        .join()
        .expect("Join failed");

    assert_eq!(collected.items(), vec![1, 2, 3, 4, 5]);
    assert!(!report.abandoned);
    assert!(report.is_success(), "{}", report.summary());
    for name in ["a", "b", "c"] {
        assert_eq!(report.stage(name).unwrap().exit, StageExit::EndOfStream);
    }
}

#[test]
fn test_pull_source_never_runs_ahead() {
    let mut builder = PipelineBuilder::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let source = builder
        .create_stage(StageDescriptor::new("counting").on_request_only(), |ports| Counting {
            output: ports.output(OUTPUT),
            calls: Arc::clone(&calls),
        })
        .unwrap();
    let take = builder
        .create_stage(StageDescriptor::new("take"), |ports| Take {
            input: ports.input::<usize>(INPUT),
            remaining: 3,
            seen: Arc::clone(&seen),
        })
        .unwrap();
    let output = builder.output::<usize>(source, OUTPUT).unwrap();
    let input = builder.input::<usize>(take, INPUT).unwrap();
    builder.connect(&output, &input).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
    let counting = report.stage("counting").unwrap();
    assert_eq!(counting.exit, StageExit::Passive);
    assert_eq!(counting.metrics.total_iterations, 3);
    assert_eq!(report.stage("take").unwrap().exit, StageExit::Completed);
    assert!(!report.abandoned);
}

#[test]
fn test_init_error_prevents_start() {
    let mut builder = PipelineBuilder::new();
    let iterations = Arc::new(AtomicUsize::new(0));
    let (_, a_out) = source(&mut builder, "reader", 0..3u32);
    let scanner = builder
        .create_stage(StageDescriptor::new("scanner"), |ports| Rejects {
            input: ports.input(INPUT),
            output: ports.output(OUTPUT),
            iterations: Arc::clone(&iterations),
        })
        .unwrap();
    let (c_in, collected) = collector::<u32>(&mut builder, "writer");

    let scanner_in = builder.input::<u32>(scanner, INPUT).unwrap();
    let scanner_out = builder.output::<u32>(scanner, OUTPUT).unwrap();
    builder.connect(&a_out, &scanner_in).unwrap();
    builder.connect(&scanner_out, &c_in).unwrap();

    match builder.build() {
        Err(PipelineError::StageInit { stage, source }) => {
            assert_eq!(stage, "scanner");
            assert!(source.to_string().contains("/missing"));
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("build should fail"),
    }
    assert_eq!(iterations.load(Ordering::SeqCst), 0);
    assert!(collected.is_empty());
}

#[test]
fn test_interrupt_stops_blocked_stages() {
    let mut builder = PipelineBuilder::new();
    let (_, out) = source(&mut builder, "endless", 0u64..);
    let sink = builder
        .create_stage(StageDescriptor::new("slow"), |ports| Slow {
            input: ports.input(INPUT),
            delay: Duration::from_millis(5),
        })
        .unwrap();
    let input = builder.input::<u64>(sink, INPUT).unwrap();
    builder.connect_with_capacity(&out, &input, 4).unwrap();

    let running = builder.build().unwrap().start().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    running.interrupt();
    let report = running.join().expect("Join failed");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.abandoned);
    assert!(!report.is_success());
    assert_eq!(report.stage("endless").unwrap().exit, StageExit::Interrupted);
    assert_eq!(report.stage("slow").unwrap().exit, StageExit::Interrupted);
}

#[test]
fn test_map_and_filter_stages() {
    let mut builder = PipelineBuilder::new();
    let (_, numbers) = source(&mut builder, "numbers", 1..=10u32);

    let filter = builder
        .create_stage(StageDescriptor::new("even_filter"), |ports| {
            FilterStage::new(ports.input::<u32>(INPUT), ports.output::<u32>(OUTPUT), |n| n % 2 == 0)
        })
        .unwrap();
    let map = builder
        .create_stage(StageDescriptor::new("times_ten"), |ports| {
            MapStage::new(ports.input::<u32>(INPUT), ports.output::<u32>(OUTPUT), |n| Ok(n * 10))
        })
        .unwrap();
    let (sink, collected) = collector::<u32>(&mut builder, "sum");

    let filter_in = builder.input::<u32>(filter, INPUT).unwrap();
    builder.connect(&numbers, &filter_in).unwrap();
    let filter_out = builder.output::<u32>(filter, OUTPUT).unwrap();
    let map_in = builder.input::<u32>(map, INPUT).unwrap();
    builder.connect(&filter_out, &map_in).unwrap();
    let map_out = builder.output::<u32>(map, OUTPUT).unwrap();
    builder.connect(&map_out, &sink).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();
    assert!(report.is_success());
    assert_eq!(collected.items(), vec![20, 40, 60, 80, 100]);
}

#[test]
fn test_source_that_ends_itself() {
    let mut builder = PipelineBuilder::new();
    let countdown = builder
        .create_stage(StageDescriptor::new("countdown").stateful(), |ports| Countdown {
            output: ports.output(OUTPUT),
            next: 4,
        })
        .unwrap();
    let (sink, collected) = collector::<u32>(&mut builder, "sink");
    let output = builder.output::<u32>(countdown, OUTPUT).unwrap();
    builder.connect_with_capacity(&output, &sink, 1).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();
    assert_eq!(collected.items(), vec![4, 3, 2, 1]);
    assert_eq!(report.stage("countdown").unwrap().exit, StageExit::Completed);
    assert_eq!(report.stage("sink").unwrap().exit, StageExit::EndOfStream);
}

#[test]
fn test_constant_source_feeds_second_input() {
    let mut builder = PipelineBuilder::new();
    let (_, numbers) = source(&mut builder, "numbers", 0..3u32);
    let suffix = builder
        .create_stage(ConstantSource::<String>::descriptor("suffix"), |ports| {
            ConstantSource::new(ports.output(OUTPUT), ".png".to_string())
        })
        .unwrap();
    let label = builder
        .create_stage(StageDescriptor::new("label"), |ports| Label {
            numbers: ports.input("numbers"),
            suffixes: ports.input("suffixes"),
            output: ports.output(OUTPUT),
        })
        .unwrap();
    let (sink, collected) = collector::<String>(&mut builder, "names");

    let label_numbers = builder.input::<u32>(label, "numbers").unwrap();
    let label_suffixes = builder.input::<String>(label, "suffixes").unwrap();
    let suffix_out = builder.output::<String>(suffix, OUTPUT).unwrap();
    let label_out = builder.output::<String>(label, OUTPUT).unwrap();
    builder.connect(&numbers, &label_numbers).unwrap();
    builder.connect(&suffix_out, &label_suffixes).unwrap();
    builder.connect(&label_out, &sink).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(collected.items(), vec!["0.png", "1.png", "2.png"]);
    // The label stage stops on its numbers input before pulling a fourth suffix
    assert_eq!(report.stage("suffix").unwrap().metrics.total_iterations, 3);
}

#[test]
fn test_failing_stage_poisons_downstream() {
    let mut builder = PipelineBuilder::new();
    let (_, numbers) = source(&mut builder, "numbers", 0..100u32);
    let map = builder
        .create_stage(StageDescriptor::new("fragile"), |ports| {
            MapStage::new(ports.input::<u32>(INPUT), ports.output::<u32>(OUTPUT), |n| {
                if n == 3 {
                    Err(StageError::Failed(format!("cannot handle {}", n)))
                } else {
                    Ok(n)
                }
            })
        })
        .unwrap();
    let (sink, collected) = collector::<u32>(&mut builder, "sink");
    let map_in = builder.input::<u32>(map, INPUT).unwrap();
    let map_out = builder.output::<u32>(map, OUTPUT).unwrap();
    builder.connect_with_capacity(&numbers, &map_in, 2).unwrap();
    builder.connect_with_capacity(&map_out, &sink, 2).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();
    assert_eq!(collected.items(), vec![0, 1, 2]);
    assert!(!report.abandoned);
    let failures: Vec<_> = report.failures().map(|stage| stage.name.as_str()).collect();
    assert_eq!(failures, vec!["fragile"]);
    assert_eq!(report.stage("sink").unwrap().exit, StageExit::EndOfStream);
}

#[test]
fn test_panicking_stage_does_not_hang() {
    let mut builder = PipelineBuilder::new();
    let (_, numbers) = source(&mut builder, "numbers", 0..10u32);
    let map = builder
        .create_stage(StageDescriptor::new("explodes"), |ports| {
            MapStage::new(ports.input::<u32>(INPUT), ports.output::<u32>(OUTPUT), |n| {
                if n == 5 {
                    panic!("unexpected item");
                }
                Ok(n)
            })
        })
        .unwrap();
    let (sink, collected) = collector::<u32>(&mut builder, "sink");
    let map_in = builder.input::<u32>(map, INPUT).unwrap();
    let map_out = builder.output::<u32>(map, OUTPUT).unwrap();
    builder.connect(&numbers, &map_in).unwrap();
    builder.connect(&map_out, &sink).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();
    assert_eq!(collected.len(), 5);
    assert_eq!(
        report.stage("explodes").unwrap().exit,
        StageExit::Panicked("unexpected item".into())
    );
}

#[test]
fn test_unconnected_port_fails_stage() {
    let mut builder = PipelineBuilder::new();
    let (_, numbers) = source(&mut builder, "numbers", 0..10u32);
    let (pass_in, _pass_out) = passthrough::<u32>(&mut builder, "dangling");
    builder.connect(&numbers, &pass_in).unwrap();

    let report = builder.build().unwrap().start().unwrap().join().unwrap();
    match &report.stage("dangling").unwrap().exit {
        StageExit::Failed(msg) => assert!(msg.contains("dangling.output")),
        other => panic!("unexpected exit: {}", other),
    }
}

#[test]
fn test_join_timeout_interrupts() {
    let config = PipelineConfig::new()
        .with_join_timeout(Duration::from_millis(100))
        .with_thread_name_prefix("timeout");
    let mut builder = PipelineBuilder::with_config(config).unwrap();
    let (_, out) = source(&mut builder, "endless", 0u64..);
    let sink = builder
        .create_stage(StageDescriptor::new("slow"), |ports| Slow {
            input: ports.input(INPUT),
            delay: Duration::from_millis(1),
        })
        .unwrap();
    let input = builder.input::<u64>(sink, INPUT).unwrap();
    builder.connect(&out, &input).unwrap();

    let result = builder.build().unwrap().start().unwrap().join();
    assert!(matches!(result, Err(PipelineError::JoinTimeout(_))));
}

#[test]
fn test_drop_without_join_stops_threads() {
    let mut builder = PipelineBuilder::new();
    let (_, out) = source(&mut builder, "endless", 0u64..);
    let (pass_in, pass_out) = passthrough::<u64>(&mut builder, "pass");
    let (sink, _collected) = collector::<u64>(&mut builder, "sink");
    builder.connect_with_capacity(&out, &pass_in, 8).unwrap();
    builder.connect_with_capacity(&pass_out, &sink, 8).unwrap();

    let running = builder.build().unwrap().start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert!(!running.is_finished());
    drop(running);
}

#[test]
fn test_live_metrics() {
    let mut builder = PipelineBuilder::new();
    let (source_id, out) = source(&mut builder, "numbers", 0..50u32);
    let (sink, _collected) = collector::<u32>(&mut builder, "sink");
    builder.connect(&out, &sink).unwrap();

    let pipeline = builder.build().unwrap();
    let running = pipeline.start().unwrap();
    let metrics = running.stage_metrics(source_id).unwrap().clone();
    let report = running.join().unwrap();

    assert_eq!(metrics.total_iterations(), 51);
    assert_eq!(report.stage("numbers").unwrap().metrics.total_iterations, 51);
}

/// On-request source that produces a few items, then breaks
struct Flaky {
    output: Output<u32>,
    produced: u32,
    limit: u32,
    panics: bool,
}

impl Stage for Flaky {
    fn iterate(&mut self) -> Iteration {
        if self.produced == self.limit {
            if self.panics {
                panic!("source state corrupted");
            }
            return Err(StageError::Failed("source went away".into()).into());
        }
        self.produced += 1;
        self.output.push(self.produced)
    }
}

fn flaky_into_sink(panics: bool) -> (PipelineBuilder, Collected<u32>) {
    let mut builder = PipelineBuilder::new();
    let source = builder
        .create_stage(StageDescriptor::new("flaky").on_request_only(), |ports| Flaky {
            output: ports.output(OUTPUT),
            produced: 0,
            limit: 2,
            panics,
        })
        .unwrap();
    let (sink, collected) = collector::<u32>(&mut builder, "sink");
    let output = builder.output::<u32>(source, OUTPUT).unwrap();
    builder.connect(&output, &sink).unwrap();
    (builder, collected)
}

#[test]
fn test_failing_on_request_source_is_reported() {
    let (builder, collected) = flaky_into_sink(false);
    let report = builder.build().unwrap().start().unwrap().join().unwrap();

    assert_eq!(collected.items(), vec![1, 2]);
    assert!(!report.is_success(), "{}", report.summary());
    assert_eq!(
        report.stage("flaky").unwrap().exit,
        StageExit::Failed("Stage execution failed: source went away".into())
    );
    assert_eq!(report.stage("sink").unwrap().exit, StageExit::EndOfStream);
    let failures: Vec<_> = report.failures().map(|stage| stage.name.as_str()).collect();
    assert_eq!(failures, vec!["flaky"]);
}

#[test]
fn test_panicking_on_request_source_is_charged_to_source() {
    let (builder, collected) = flaky_into_sink(true);
    let report = builder.build().unwrap().start().unwrap().join().unwrap();

    assert_eq!(collected.items(), vec![1, 2]);
    assert_eq!(
        report.stage("flaky").unwrap().exit,
        StageExit::Panicked("source state corrupted".into())
    );
    assert_eq!(report.stage("sink").unwrap().exit, StageExit::EndOfStream);
    assert!(!report.is_success());
}
