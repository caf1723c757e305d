use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::graph::WorkerGraph;
use crate::interrupt::{InterruptSignal, Interrupter};
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::runner::{Completion, PassiveExit, StageExit, StageRunner};
use crate::stage::{ExecutionMode, SharedStage, StageDescriptor, StageId};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A registered stage as the pipeline keeps it after `build()`
pub(crate) struct StageInfo {
    pub(crate) descriptor: StageDescriptor,
    // Keeps on-request stages alive; pull buffers only hold weak references
    pub(crate) _stage: SharedStage,
    pub(crate) metrics: StageMetrics,
    pub(crate) exit: PassiveExit,
}

/// A fully wired pipeline, ready to start
pub struct Pipeline {
    graph: WorkerGraph,
    stages: Vec<StageInfo>,
    runners: Vec<StageRunner>,
    interrupt: InterruptSignal,
    config: PipelineConfig,
}

impl Pipeline {
    pub(crate) fn new(
        graph: WorkerGraph,
        stages: Vec<StageInfo>,
        runners: Vec<StageRunner>,
        interrupt: InterruptSignal,
        config: PipelineConfig,
    ) -> Self {
        Self {
            graph,
            stages,
            runners,
            interrupt,
            config,
        }
    }

    /// Number of stages, including on-request-only ones
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in creation order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|info| info.descriptor.name()).collect()
    }

    /// Get metrics for a specific stage
    pub fn stage_metrics(&self, id: StageId) -> Option<&StageMetrics> {
        self.stages.get(id.index()).map(|info| &info.metrics)
    }

    /// Launch one thread per eager stage plus the scheduler thread.
    ///
    /// On-request-only stages get no thread; they run when pulled.
    pub fn start(self) -> Result<RunningPipeline> {
        let Pipeline {
            graph,
            stages,
            runners,
            interrupt,
            config,
        } = self;

        info!(
            stages = stages.len(),
            threads = runners.len(),
            "starting pipeline"
        );

        let interrupter = Arc::new(Interrupter::new(interrupt, graph.conduits()));
        let forced = Arc::new(AtomicBool::new(false));
        let (completion_tx, completion_rx) = channel::unbounded();
        let (report_tx, report_rx) = channel::bounded(1);

        let passive = stages
            .iter()
            .map(|info| match info.descriptor.mode() {
                ExecutionMode::OnRequestOnly => {
                    debug!(stage = %info.descriptor.name(), "on-request-only stage runs on its consumer's thread");
                    Some(info.exit.clone())
                }
                ExecutionMode::Eager => None,
            })
            .collect();
        let exits = vec![None; stages.len()];
        let metrics = stages.iter().map(|info| info.metrics.clone()).collect();

        // Dropping `running` on an early return interrupts and reaps whatever started
        let mut running = RunningPipeline {
            stages,
            interrupter: Arc::clone(&interrupter),
            forced: Arc::clone(&forced),
            runners: Vec::with_capacity(runners.len()),
            supervisor: None,
            report: report_rx,
            join_timeout: config.join_timeout,
        };

        for runner in runners {
            let completions = completion_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, runner.name()))
                .spawn(move || runner.run_and_report(completions))
                .map_err(|e| PipelineError::ThreadError(format!("failed to spawn stage thread: {}", e)))?;
            running.runners.push(handle);
        }
        drop(completion_tx);

        let supervisor = Supervisor {
            graph,
            exits,
            passive,
            metrics,
            completions: completion_rx,
            interrupter,
            forced,
            completed: false,
            started: Instant::now(),
        };
        let handle = thread::Builder::new()
            .name(format!("{}-supervisor", config.thread_name_prefix))
            .spawn(move || {
                let report = supervisor.run();
                let _ = report_tx.send(report);
            })
            .map_err(|e| PipelineError::ThreadError(format!("failed to spawn scheduler thread: {}", e)))?;
        running.supervisor = Some(handle);

        Ok(running)
    }
}

/// Drains runner completions: poisons the finished stage's outputs, then
/// interrupts everything once every leaf stage is done.
struct Supervisor {
    graph: WorkerGraph,
    exits: Vec<Option<StageExit>>,
    // Exit slots of on-request-only stages, filled in by their pull buffers
    passive: Vec<Option<PassiveExit>>,
    metrics: Vec<StageMetrics>,
    completions: Receiver<Completion>,
    interrupter: Arc<Interrupter>,
    forced: Arc<AtomicBool>,
    completed: bool,
    started: Instant,
}

impl Supervisor {
    fn run(mut self) -> RunReport {
        self.check_termination();

        // Ends once every runner has reported and dropped its sender
        while let Ok(Completion { stage, exit }) = self.completions.recv() {
            debug!(
                stage = %self.graph.name(stage),
                leaf = self.graph.is_leaf(stage),
                %exit,
                "stage finished"
            );
            self.graph.mark_finished(stage);
            // A forced interrupt abandons the stage; its outputs are not poisoned
            if exit != StageExit::Interrupted {
                self.graph.poison_edges(stage);
            }
            self.exits[stage.index()] = Some(exit);
            self.check_termination();
        }

        let abandoned = self.forced.load(Ordering::SeqCst) && !self.completed;
        let elapsed = self.started.elapsed();
        info!(?elapsed, abandoned, "pipeline finished");

        let stages = (0..self.graph.len())
            .map(|index| {
                let id = StageId::new(index);
                let exit = match &self.passive[index] {
                    Some(passive) => passive.exit(),
                    None => self.exits[index].take().unwrap_or(StageExit::Interrupted),
                };
                StageReport {
                    id,
                    name: self.graph.name(id).to_string(),
                    exit,
                    metrics: self.metrics[index].snapshot(),
                }
            })
            .collect();

        RunReport {
            stages,
            abandoned,
            elapsed,
        }
    }

    fn check_termination(&mut self) {
        if self.interrupter.is_raised() || !self.graph.is_ended() {
            return;
        }
        if self.interrupter.interrupt() {
            self.completed = true;
            info!("all terminal stages finished; stopping remaining stages");
        }
    }
}

/// A started pipeline. Join it to collect the [`RunReport`].
///
/// Dropping it without joining interrupts the pipeline and waits for its
/// threads.
pub struct RunningPipeline {
    stages: Vec<StageInfo>,
    interrupter: Arc<Interrupter>,
    forced: Arc<AtomicBool>,
    runners: Vec<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
    report: Receiver<RunReport>,
    join_timeout: Option<Duration>,
}

impl RunningPipeline {
    /// Get live metrics for a stage
    pub fn stage_metrics(&self, id: StageId) -> Option<&StageMetrics> {
        self.stages.get(id.index()).map(|info| &info.metrics)
    }

    /// Whether the scheduler has finished
    pub fn is_finished(&self) -> bool {
        self.supervisor
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Force every stage to stop. Stages parked on a buffer wake up and
    /// exit; the run is reported as abandoned rather than completed.
    ///
    /// Cancellation is cooperative: a stage blocked on something other than
    /// a pipeline buffer stops only when that call returns.
    pub fn interrupt(&self) {
        if !self.interrupter.is_raised() {
            self.forced.store(true, Ordering::SeqCst);
        }
        if self.interrupter.interrupt() {
            info!("pipeline interrupted");
        }
    }

    /// Wait for the pipeline to finish, bounded by the configured join timeout
    pub fn join(mut self) -> Result<RunReport> {
        let timeout = self.join_timeout;
        self.wait(timeout)
    }

    /// Wait at most `timeout`, then interrupt the pipeline and fail with
    /// `JoinTimeout`
    pub fn join_timeout(mut self, timeout: Duration) -> Result<RunReport> {
        self.wait(Some(timeout))
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<RunReport> {
        let outcome = match timeout {
            None => self.report.recv().map_err(|_| {
                PipelineError::ThreadError("scheduler exited without a report".into())
            }),
            Some(timeout) => match self.report.recv_timeout(timeout) {
                Ok(report) => Ok(report),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(?timeout, "pipeline did not finish in time; interrupting");
                    self.interrupt();
                    Err(PipelineError::JoinTimeout(timeout))
                }
                Err(RecvTimeoutError::Disconnected) => Err(PipelineError::ThreadError(
                    "scheduler exited without a report".into(),
                )),
            },
        };
        self.reap()?;
        outcome
    }

    fn reap(&mut self) -> Result<()> {
        let mut panicked = 0;
        for handle in self.runners.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(PipelineError::ThreadError(format!(
                "{} pipeline thread(s) panicked",
                panicked
            )));
        }
        Ok(())
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if self.runners.is_empty() && self.supervisor.is_none() {
            return;
        }
        self.interrupter.interrupt();
        let _ = self.reap();
    }
}

/// Final state of one stage
#[derive(Debug, Clone)]
pub struct StageReport {
    pub id: StageId,
    pub name: String,
    pub exit: StageExit,
    pub metrics: MetricsSnapshot,
}

/// Outcome of a pipeline run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One entry per stage, in creation order
    pub stages: Vec<StageReport>,
    /// True if the run was cut short by `interrupt()` or a join timeout
    /// before every terminal stage finished
    pub abandoned: bool,
    pub elapsed: Duration,
}

impl RunReport {
    /// Find a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Stages that failed or panicked
    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|stage| stage.exit.is_failure())
    }

    /// Completed without interruption and without stage failures
    pub fn is_success(&self) -> bool {
        !self.abandoned && self.failures().next().is_none()
    }

    /// Get a summary of all stages
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Pipeline finished in {:.2}s{}:\n",
            self.elapsed.as_secs_f64(),
            if self.abandoned { " (abandoned)" } else { "" }
        );
        for stage in &self.stages {
            summary.push_str(&format!(
                "  Stage {} [{}]: {}\n",
                stage.name,
                stage.exit,
                stage.metrics.format()
            ));
        }
        summary
    }
}
