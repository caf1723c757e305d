use super::{Buffer, Conduit};
use crate::error::Halt;
use crate::interrupt::InterruptSignal;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    finished: bool,
}

/// A fixed-capacity FIFO guarded by a mutex and two condition variables.
///
/// `push` parks while the queue is full, `pop` parks while it is empty.
/// Both give up with `Halt::Interrupted` once the pipeline is interrupted.
#[derive(Debug)]
pub struct BlockingBuffer<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    interrupt: InterruptSignal,
}

impl<T: Send> BlockingBuffer<T> {
    /// `capacity` must be non-zero; `PipelineBuilder::connect_with_capacity`
    /// rejects zero before a buffer is ever created.
    pub(crate) fn new(capacity: usize, interrupt: InterruptSignal) -> Self {
        debug_assert!(capacity > 0, "buffer capacity must be non-zero");
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                finished: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            interrupt,
        }
    }

    /// Get the utilization of the buffer as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity).min(100) as u32
    }
}

impl<T: Send> Conduit for BlockingBuffer<T> {
    fn safe_end(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn wake(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}

impl<T: Send> Buffer<T> for BlockingBuffer<T> {
    fn push(&self, value: T) -> Result<(), Halt> {
        let mut state = self.state.lock();
        loop {
            if state.finished {
                return Ok(());
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(value);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.interrupt.is_raised() {
                return Err(Halt::Interrupted);
            }
            self.not_full.wait(&mut state);
        }
    }

    fn pop(&self) -> Result<T, Halt> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(value);
            }
            if state.finished {
                return Err(Halt::EndOfStream);
            }
            if self.interrupt.is_raised() {
                return Err(Halt::Interrupted);
            }
            self.not_empty.wait(&mut state);
        }
    }
}
