use crate::buffer::Conduit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline-wide cancellation flag shared by runners and buffers
#[derive(Debug, Clone, Default)]
pub(crate) struct InterruptSignal {
    raised: Arc<AtomicBool>,
}

impl InterruptSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    fn raise(&self) -> bool {
        !self.raised.swap(true, Ordering::SeqCst)
    }
}

/// Raises the signal and wakes every thread parked on a buffer.
///
/// The flag is set before any buffer lock is taken, so a waiter either sees
/// the flag on its next check or is already parked when the wakeup arrives.
pub(crate) struct Interrupter {
    signal: InterruptSignal,
    conduits: Vec<Arc<dyn Conduit>>,
}

impl Interrupter {
    pub(crate) fn new(signal: InterruptSignal, conduits: Vec<Arc<dyn Conduit>>) -> Self {
        Self { signal, conduits }
    }

    /// Returns false if the pipeline was already interrupted
    pub(crate) fn interrupt(&self) -> bool {
        let first = self.signal.raise();
        for conduit in &self.conduits {
            conduit.wake();
        }
        first
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.signal.is_raised()
    }
}
