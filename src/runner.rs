use crate::error::Halt;
use crate::interrupt::InterruptSignal;
use crate::metrics::StageMetrics;
use crate::stage::{SharedStage, StageId};
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Why a stage stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageExit {
    /// The stage reported `is_ended()`
    Completed,
    /// An input ran dry, or the stage ended its own output
    EndOfStream,
    /// The pipeline was interrupted while the stage was running
    Interrupted,
    /// `iterate()` returned a fault
    Failed(String),
    /// `iterate()` panicked
    Panicked(String),
    /// On-request-only stage; it never had an execution unit
    Passive,
}

impl StageExit {
    /// True for exits that indicate something went wrong
    pub fn is_failure(&self) -> bool {
        matches!(self, StageExit::Failed(_) | StageExit::Panicked(_))
    }
}

impl fmt::Display for StageExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageExit::Completed => write!(f, "completed"),
            StageExit::EndOfStream => write!(f, "end of stream"),
            StageExit::Interrupted => write!(f, "interrupted"),
            StageExit::Failed(msg) => write!(f, "failed: {}", msg),
            StageExit::Panicked(msg) => write!(f, "panicked: {}", msg),
            StageExit::Passive => write!(f, "passive"),
        }
    }
}

/// Exit of an on-request-only stage, recorded by the buffers that pull it.
///
/// Only failures are recorded; a stage that never failed reports `Passive`.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassiveExit {
    failure: Arc<Mutex<Option<StageExit>>>,
}

impl PassiveExit {
    /// Keep the first failure; later ones are consequences of it
    pub(crate) fn record(&self, exit: StageExit) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(exit);
        }
    }

    pub(crate) fn exit(&self) -> StageExit {
        self.failure.lock().clone().unwrap_or(StageExit::Passive)
    }
}

/// Sent to the scheduler when a runner stops
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) stage: StageId,
    pub(crate) exit: StageExit,
}

/// Execution unit driving one eager stage on its own thread
pub(crate) struct StageRunner {
    id: StageId,
    name: String,
    stage: SharedStage,
    metrics: StageMetrics,
    interrupt: InterruptSignal,
}

impl StageRunner {
    pub(crate) fn new(
        id: StageId,
        name: impl Into<String>,
        stage: SharedStage,
        metrics: StageMetrics,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            stage,
            metrics,
            interrupt,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Iterate the stage until it stops. Runs exactly once per runner.
    pub(crate) fn run(&self) -> StageExit {
        debug!(stage = %self.name, "starting runner");
        let mut stage = self.stage.lock();

        loop {
            if self.interrupt.is_raised() {
                debug!(stage = %self.name, "stopping runner (interrupted)");
                return StageExit::Interrupted;
            }

            let start = Instant::now();
            let outcome = stage.iterate();
            self.metrics.record_iteration(start.elapsed());

            match outcome {
                Ok(()) => {
                    if stage.is_ended() {
                        debug!(stage = %self.name, "stopping runner (stage signalled it was finished)");
                        return StageExit::Completed;
                    }
                }
                Err(Halt::EndOfStream) => {
                    debug!(stage = %self.name, "stopping runner (buffer ended)");
                    return StageExit::EndOfStream;
                }
                Err(Halt::Interrupted) => {
                    debug!(stage = %self.name, "stopping runner (interrupted)");
                    return StageExit::Interrupted;
                }
                Err(Halt::Fault(err)) => {
                    error!(stage = %self.name, error = %err, "stage failed");
                    return StageExit::Failed(err.to_string());
                }
            }
        }
    }

    /// Run the stage, containing panics, and report the exit exactly once
    pub(crate) fn run_and_report(self, completions: Sender<Completion>) {
        let exit = panic::catch_unwind(AssertUnwindSafe(|| self.run())).unwrap_or_else(|payload| {
            let msg = panic_message(payload.as_ref());
            error!(stage = %self.name, panic = %msg, "stage panicked");
            StageExit::Panicked(msg)
        });

        // The scheduler outlives every runner; a closed channel means it is gone anyway
        let _ = completions.send(Completion {
            stage: self.id,
            exit,
        });
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
