//! Module for tracking requests that are currently being crawled.
//!
//! This module defines `InFlightSet`, the record of every request that has been
//! taken off the queue but whose `crawl` has not returned yet. The task engine
//! adds a request when it hands it to a worker and removes it when the worker
//! reports back, whether the crawl succeeded or failed.
//!
//! The set is what makes a crash survivable: a checkpoint stores it next to the
//! queue, and recovery puts every stashed in-flight request back into the queue
//! so it is crawled again. Its size never exceeds the number of workers, so a
//! plain vector is enough.

use crate::checkpoint::{self, IN_FLIGHT_FILE, StagedFile};
use crate::error::SpiderError;
use crate::request::{Request, RequestId};
use std::path::Path;
use tracing::trace;
use ulid::Ulid;

/// Requests dequeued but not yet completed, in dispatch order.
#[derive(Debug, Default)]
pub struct InFlightSet {
    requests: Vec<Request>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `request` as being crawled.
    pub fn insert(&mut self, request: Request) {
        trace!("In flight: {}", request);
        self.requests.push(request);
    }

    /// Forgets the request with `id`, returning it if it was present.
    pub fn remove(&mut self, id: RequestId) -> Option<Request> {
        let position = self.requests.iter().position(|r| r.id() == id)?;
        Some(self.requests.remove(position))
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.iter().any(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    /// Empties the set, returning what was in it.
    pub fn take(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    /// Writes the current set into `dir` on its own.
    pub fn stash(&self, dir: &Path) -> Result<(), SpiderError> {
        checkpoint::save_requests(dir, IN_FLIGHT_FILE, &self.requests)
    }

    /// Writes the current set next to a queue file of the same `generation`,
    /// without making it visible yet.
    pub fn stage(&self, dir: &Path, generation: Ulid) -> Result<StagedFile, SpiderError> {
        checkpoint::stage(dir, IN_FLIGHT_FILE, generation, self.requests.len(), |writer| {
            self.requests.iter().try_for_each(|request| writer.write(request))
        })
    }

    /// Reads a stashed set from `dir` without touching `self`.
    pub fn load(dir: &Path) -> Result<Vec<Request>, SpiderError> {
        checkpoint::load_requests(dir, IN_FLIGHT_FILE)
    }

    pub fn can_recover(dir: &Path) -> bool {
        checkpoint::is_present(dir, IN_FLIGHT_FILE)
    }
}
