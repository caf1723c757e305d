//! Bounded, end-signaling conduits between two stages.
//!
//! Every buffer has exactly one producing stage and one consuming stage.
//! Two strategies exist:
//!
//! - [`BlockingBuffer`]: a fixed-capacity FIFO that parks the producer when
//!   full and the consumer when empty.
//! - [`PullBuffer`]: fed by an on-request-only stage whose `iterate()` runs on
//!   the consumer's thread whenever the consumer pops from an empty buffer.

mod blocking;
mod pull;

pub use blocking::BlockingBuffer;
pub use pull::PullBuffer;

use crate::error::Halt;

/// Type-erased view of a buffer used by the graph and the scheduler
pub trait Conduit: Send + Sync {
    /// Mark the buffer finished without signalling the caller.
    ///
    /// Pending items are still delivered; once drained, `pop()` yields
    /// `Halt::EndOfStream`. Further pushes are discarded.
    fn safe_end(&self);

    /// Wake any thread parked on this buffer so it can observe an interrupt
    fn wake(&self);

    /// Whether the producer side has been ended
    fn is_finished(&self) -> bool;

    /// Number of items waiting to be popped
    fn len(&self) -> usize;

    /// Check if no items are pending
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of pending items, `None` when unbounded
    fn capacity(&self) -> Option<usize>;
}

/// A typed single-producer, single-consumer buffer
pub trait Buffer<T>: Conduit {
    /// Hand an item to the consumer. Items pushed after the buffer is
    /// finished are silently discarded.
    fn push(&self, value: T) -> Result<(), Halt>;

    /// Take the next item, or `Halt::EndOfStream` once finished and drained
    fn pop(&self) -> Result<T, Halt>;

    /// Finish the buffer from the producer side and return the end signal
    /// so the producing stage stops too.
    fn end(&self) -> Halt {
        self.safe_end();
        Halt::EndOfStream
    }
}
