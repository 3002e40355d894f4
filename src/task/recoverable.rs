//! Task-level checkpoints: the queue plus the requests in flight.
//!
//! A stash stages `queue.msgpack` and `in_flight.msgpack` under one generation
//! and only then renames them into place, queue first. A failed write leaves the
//! previous pair alone; a crash between the two renames leaves files of
//! different generations, which recovery refuses as `CorruptedState`.

use super::control::TaskHandle;
use super::engine::AsyncTask;
use super::{Lifecycle, RunOutcome};
use crate::checkpoint::{self, IN_FLIGHT_FILE, QUEUE_FILE};
use crate::error::SpiderError;
use crate::queue::{Recoverable, RequestQueue, stage_queue};
use crate::request::Request;
use crate::spider::Spider;
use crate::state::InFlightSet;
use crate::stats::StatCollector;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use ulid::Ulid;

/// An [`AsyncTask`] that also checkpoints the requests it has in flight.
///
/// A request enters the in-flight set when it is handed to a worker and leaves
/// it once its crawl returned and whatever it discovered has been enqueued. A
/// stash therefore never loses a request: it is either in the queue file or in
/// the in-flight file. Recovery puts in-flight requests back at the tail of the
/// queue, so interrupted work is crawled again (at-least-once).
pub struct RecoverableTask<S: Spider, Q: RequestQueue + Recoverable> {
    pub(crate) task: AsyncTask<S, Q>,
    pub(crate) in_flight: InFlightSet,
}

impl<S: Spider, Q: RequestQueue + Recoverable> RecoverableTask<S, Q> {
    pub fn new(spider: S, queue: Q) -> Self {
        Self::from_task(AsyncTask::new(spider, queue))
    }

    pub fn from_task(task: AsyncTask<S, Q>) -> Self {
        Self {
            task,
            in_flight: InFlightSet::new(),
        }
    }

    pub fn task(&self) -> &AsyncTask<S, Q> {
        &self.task
    }

    pub fn handle(&self) -> TaskHandle {
        self.task.handle()
    }

    pub fn queue(&self) -> &Q {
        self.task.queue()
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        self.task.stats()
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    pub fn seed(&mut self) -> Result<usize, SpiderError> {
        self.task.seed()
    }

    pub async fn run(&mut self) -> Result<RunOutcome, SpiderError> {
        let Self { task, in_flight } = self;
        task.drive(&mut InFlightTracker { in_flight }).await
    }
}

impl<S: Spider, Q: RequestQueue + Recoverable> Recoverable for RecoverableTask<S, Q> {
    /// Writes the queue, then the in-flight set.
    fn stash(&self, dir: &Path) -> Result<(), SpiderError> {
        stash_all(self.task.queue(), &self.in_flight, dir)
    }

    /// Restores the queue and re-enqueues every stashed in-flight request.
    ///
    /// Both files must be present and come from the same stash. A checkpoint
    /// with only one of them, or with files of different generations, is
    /// reported as `CorruptedState` and nothing is changed.
    fn recover(&mut self, dir: &Path) -> Result<(), SpiderError> {
        let queue_present = self.task.queue().can_recover(dir);
        let in_flight_present = InFlightSet::can_recover(dir);
        match (queue_present, in_flight_present) {
            (false, false) => return Err(SpiderError::NotFound(dir.to_path_buf())),
            (true, false) => return Err(partial(dir, IN_FLIGHT_FILE)),
            (false, true) => return Err(partial(dir, QUEUE_FILE)),
            (true, true) => {}
        }
        let queue_generation = checkpoint::read_generation(dir, QUEUE_FILE)?;
        let in_flight_generation = checkpoint::read_generation(dir, IN_FLIGHT_FILE)?;
        if queue_generation != in_flight_generation {
            return Err(SpiderError::CorruptedState {
                path: dir.to_path_buf(),
                reason: format!(
                    "torn checkpoint, {} is from stash {} but {} is from stash {}",
                    QUEUE_FILE, queue_generation, IN_FLIGHT_FILE, in_flight_generation
                ),
            });
        }

        let interrupted = InFlightSet::load(dir)?;
        let requeued = interrupted.len();
        let queue = self.task.queue_mut();
        queue.recover(dir)?;
        queue.put_many(interrupted)?;
        self.in_flight.take();

        let stats = self.task.stats();
        stats.add_requests_requeued(requeued);
        stats.add_requests_enqueued(self.task.queue().len());
        info!(
            "Recovered task from {:?}: {} queued, {} of them interrupted in flight",
            dir,
            self.task.queue().len(),
            requeued
        );
        Ok(())
    }

    fn can_recover(&self, dir: &Path) -> bool {
        if !self.task.queue().can_recover(dir) || !InFlightSet::can_recover(dir) {
            return false;
        }
        matches!(
            (
                checkpoint::read_generation(dir, QUEUE_FILE),
                checkpoint::read_generation(dir, IN_FLIGHT_FILE),
            ),
            (Ok(queue), Ok(in_flight)) if queue == in_flight
        )
    }
}

fn partial(dir: &Path, missing: &str) -> SpiderError {
    SpiderError::CorruptedState {
        path: dir.to_path_buf(),
        reason: format!("partial checkpoint, {} is missing", missing),
    }
}

pub(crate) fn stash_all<Q: RequestQueue + Recoverable>(
    queue: &Q,
    in_flight: &InFlightSet,
    dir: &Path,
) -> Result<(), SpiderError> {
    let generation = Ulid::new();
    let queue_file = stage_queue(queue, dir, generation)?;
    let in_flight_file = in_flight.stage(dir, generation)?;
    queue_file.commit()?;
    in_flight_file.commit()?;
    debug!("Checkpoint generation {} written to {:?}", generation, dir);
    Ok(())
}

/// Keeps the in-flight set in step with the coordinator.
pub(crate) struct InFlightTracker<'a> {
    pub(crate) in_flight: &'a mut InFlightSet,
}

impl<Q: RequestQueue + Recoverable> Lifecycle<Q> for InFlightTracker<'_> {
    fn dispatched(&mut self, request: &Request) {
        self.in_flight.insert(request.clone());
    }

    fn finished(&mut self, _queue: &Q, request: &Request, _succeeded: bool) {
        self.in_flight.remove(request.id());
    }

    fn stash(&mut self, queue: &Q, dir: &Path) -> Result<(), SpiderError> {
        stash_all(queue, self.in_flight, dir)
    }
}
