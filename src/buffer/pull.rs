use super::{Buffer, Conduit};
use crate::error::Halt;
use crate::interrupt::InterruptSignal;
use crate::metrics::StageMetrics;
use crate::runner::{panic_message, PassiveExit, StageExit};
use crate::stage::Stage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::time::Instant;
use tracing::{debug, error};

#[derive(Debug)]
struct State<T> {
    pending: VecDeque<T>,
    finished: bool,
}

/// Buffer fed by an on-request-only stage.
///
/// `pop()` on an empty buffer runs the producer's `iterate()` on the calling
/// thread until an item shows up or the producer stops. The pending queue is
/// unbounded, but it only ever holds what a single iteration pushed.
///
/// A producer that fails or panics ends the stream; the failure is charged
/// to the producer, not to the consumer that happened to pull it.
pub struct PullBuffer<T> {
    state: Mutex<State<T>>,
    producer: Weak<Mutex<Box<dyn Stage>>>,
    producer_name: String,
    metrics: StageMetrics,
    exit: PassiveExit,
    interrupt: InterruptSignal,
}

impl<T: Send> PullBuffer<T> {
    pub(crate) fn new(
        producer: Weak<Mutex<Box<dyn Stage>>>,
        producer_name: impl Into<String>,
        metrics: StageMetrics,
        exit: PassiveExit,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                finished: false,
            }),
            producer,
            producer_name: producer_name.into(),
            metrics,
            exit,
            interrupt,
        }
    }

    /// Run one producer iteration. Any way the producer stops finishes the buffer.
    fn pull(&self) -> Result<(), Halt> {
        let Some(producer) = self.producer.upgrade() else {
            self.safe_end();
            return Ok(());
        };
        let mut producer = producer.lock();

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| producer.iterate()));
        self.metrics.record_iteration(start.elapsed());

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(stage = %self.producer_name, panic = %msg, "on-request stage panicked");
                self.exit.record(StageExit::Panicked(msg));
                self.safe_end();
                return Ok(());
            }
        };

        match outcome {
            Ok(()) => {
                if producer.is_ended() {
                    debug!(stage = %self.producer_name, "on-request stage signalled it was finished");
                    self.safe_end();
                }
                Ok(())
            }
            Err(Halt::EndOfStream) => {
                debug!(stage = %self.producer_name, "on-request stage reached end of stream");
                self.safe_end();
                Ok(())
            }
            Err(Halt::Interrupted) => Err(Halt::Interrupted),
            Err(Halt::Fault(err)) => {
                error!(stage = %self.producer_name, error = %err, "on-request stage failed");
                self.exit.record(StageExit::Failed(err.to_string()));
                self.safe_end();
                Ok(())
            }
        }
    }
}

impl<T: Send> Conduit for PullBuffer<T> {
    fn safe_end(&self) {
        self.state.lock().finished = true;
    }

    // Nothing ever parks on the pending queue itself
    fn wake(&self) {}

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}

impl<T: Send> Buffer<T> for PullBuffer<T> {
    fn push(&self, value: T) -> Result<(), Halt> {
        let mut state = self.state.lock();
        if !state.finished {
            state.pending.push_back(value);
        }
        Ok(())
    }

    fn pop(&self) -> Result<T, Halt> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(value) = state.pending.pop_front() {
                    return Ok(value);
                }
                if state.finished {
                    return Err(Halt::EndOfStream);
                }
            }
            if self.interrupt.is_raised() {
                return Err(Halt::Interrupted);
            }
            self.pull()?;
        }
    }
}
