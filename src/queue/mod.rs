//! # Queue Module
//!
//! The request queue family: a plain FIFO and the decorators that stack on it.
//!
//! ## Overview
//!
//! Every queue implements [`RequestQueue`]. Behaviour is added by wrapping, never
//! by inspecting what kind of queue something is:
//!
//! - **SimpleQueue**: unbounded in-memory FIFO.
//! - **SpillQueue<Q>**: keeps at most a threshold of requests in memory and
//!   moves the oldest ones into an append-only spill file.
//! - **RecoverableQueue<Q>**: adds [`Recoverable`] (`stash`/`recover`) on top of
//!   any queue.
//! - **select_queue**: picks one of the four compositions from a spider's
//!   declared spill threshold and recoverability.
//!
//! ## Ownership
//!
//! Queues are plain `&mut self` structures without locks. The task engine is
//! their only owner and mutates them from a single coordinator, so no
//! synchronization is needed.

mod recoverable;
mod selector;
mod simple;
mod spill;

pub(crate) use recoverable::stage_queue;
pub use recoverable::{DEFAULT_RECOVER_BATCH, RecoverableQueue, RecoverableSpillQueue};
pub use selector::{QueueConfig, SelectedQueue, select_queue, select_queue_with};
pub use simple::SimpleQueue;
pub use spill::SpillQueue;

use crate::checkpoint::RecordWriter;
use crate::error::SpiderError;
use crate::request::Request;
use std::path::Path;

/// A FIFO of requests.
pub trait RequestQueue: Send {
    /// Appends one request at the tail.
    fn put(&mut self, request: Request) -> Result<(), SpiderError>;

    /// Appends requests at the tail, preserving their order.
    fn put_many(&mut self, requests: Vec<Request>) -> Result<(), SpiderError> {
        for request in requests {
            self.put(request)?;
        }
        Ok(())
    }

    /// Removes the head. Returns `None` when empty; never waits.
    fn get(&mut self) -> Result<Option<Request>, SpiderError>;

    /// Logical number of queued requests, wherever they are stored.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out the full logical order without consuming anything.
    fn snapshot(&self) -> Result<Vec<Request>, SpiderError>;

    /// Streams the full logical order into a checkpoint file, exactly `len()`
    /// records, without consuming anything.
    fn write_records(&self, writer: &mut RecordWriter) -> Result<(), SpiderError> {
        self.snapshot()?.iter().try_for_each(|request| writer.write(request))
    }

    /// Drops every queued request.
    fn clear(&mut self) -> Result<(), SpiderError>;

    /// Decorator composition, e.g. `recoverable(spill(simple))`.
    fn describe(&self) -> String;
}

/// Durable checkpoint/restore of queue contents.
pub trait Recoverable {
    /// Writes the full logical queue into `dir`. The queue itself is unchanged.
    fn stash(&self, dir: &Path) -> Result<(), SpiderError>;

    /// Replaces the current contents with the ones stashed in `dir`.
    ///
    /// Anything already queued is discarded. Call once at startup, before any `put`.
    fn recover(&mut self, dir: &Path) -> Result<(), SpiderError>;

    /// Whether `dir` holds a checkpoint this queue could recover from. Never fails.
    fn can_recover(&self, dir: &Path) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::RequestQueue;

    /// Drains `queue` and returns the targets in dequeue order.
    pub fn drain_targets<Q: RequestQueue + ?Sized>(queue: &mut Q) -> Vec<String> {
        let mut targets = Vec::new();
        while let Some(request) = queue.get().unwrap() {
            targets.push(request.target().to_string());
        }
        targets
    }

    pub fn targets(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }
}
