//! The core crawl engine.
//!
//! `AsyncTask` owns a queue and a spider and drives a pool of workers until the
//! queue is exhausted and no request is in flight. The coordinator loop below is
//! the only place the queue is read or written while a run is in progress:
//!
//! 1. hand queued requests to idle workers until every worker is busy or the
//!    queue is empty;
//! 2. if nothing is in flight, the run is over;
//! 3. otherwise wait for a completion (enqueue what it discovered, log what
//!    failed) or a control command, and start again.
//!
//! Waiting on completions replaces any kind of idle polling: a worker that finds
//! nothing to do simply is not given a request until another one finishes.

use super::control::{Command, TaskHandle};
use super::worker::{Completion, run_worker};
use super::{Lifecycle, RunOutcome};
use crate::error::SpiderError;
use crate::formatter::ErrorFormatterRegistry;
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::spider::Spider;
use crate::stats::StatCollector;
use kanal::{AsyncReceiver, AsyncSender};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Runs a spider's crawls concurrently against a queue.
pub struct AsyncTask<S: Spider, Q: RequestQueue> {
    spider: Arc<S>,
    queue: Q,
    num_workers: usize,
    formatters: Arc<ErrorFormatterRegistry>,
    stats: Arc<StatCollector>,
    control_tx: AsyncSender<Command>,
    control_rx: AsyncReceiver<Command>,
}

impl<S: Spider, Q: RequestQueue> AsyncTask<S, Q> {
    pub fn new(spider: S, queue: Q) -> Self {
        Self::from_arc(Arc::new(spider), queue)
    }

    /// Like `new`, for a spider that is shared with other code.
    pub fn from_arc(spider: Arc<S>, queue: Q) -> Self {
        let requested = spider.num_threads();
        if requested == 0 {
            warn!("Spider asked for 0 threads, running with 1 worker");
        }
        let (control_tx, control_rx) = kanal::unbounded_async();
        Self {
            spider,
            queue,
            num_workers: requested.max(1),
            formatters: Arc::new(ErrorFormatterRegistry::default()),
            stats: Arc::new(StatCollector::new()),
            control_tx,
            control_rx,
        }
    }

    /// Replaces the registry used to render failed crawls in the log.
    pub fn with_formatters(mut self, formatters: Arc<ErrorFormatterRegistry>) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.control_tx.clone())
    }

    pub fn spider(&self) -> &Arc<S> {
        &self.spider
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    /// Returns a cloned Arc to the `StatCollector` of this task.
    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Enqueues the spider's start targets. Returns how many were added.
    pub fn seed(&mut self) -> Result<usize, SpiderError> {
        let requests = self.spider.start_targets();
        let count = requests.len();
        self.queue.put_many(requests)?;
        self.stats.add_requests_enqueued(count);
        info!("Seeded {} start targets", count);
        Ok(count)
    }

    /// Crawls until the queue is drained and nothing is in flight, or until a
    /// shutdown is requested through a [`TaskHandle`].
    ///
    /// A plain task does not track in-flight requests, so stash commands are
    /// refused with `NotRecoverable`; use `RecoverableTask` for checkpoints.
    pub async fn run(&mut self) -> Result<RunOutcome, SpiderError> {
        self.drive(&mut Untracked).await
    }

    pub(crate) async fn drive<H: Lifecycle<Q>>(&mut self, hooks: &mut H) -> Result<RunOutcome, SpiderError> {
        info!(
            "Task starting with {} workers on a {} queue ({} requests queued)",
            self.num_workers,
            self.queue.describe(),
            self.queue.len()
        );

        trace!("Creating worker channels with capacity: {}", self.num_workers);
        let (jobs_tx, jobs_rx) = kanal::bounded_async::<Request>(self.num_workers);
        let (completions_tx, completions_rx) = kanal::unbounded_async::<Completion>();

        let mut workers = JoinSet::new();
        for worker_id in 0..self.num_workers {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&self.spider),
                jobs_rx.clone(),
                completions_tx.clone(),
            ));
        }
        drop(jobs_rx);
        drop(completions_tx);

        let result = self.coordinate(hooks, &jobs_tx, &completions_rx).await;

        trace!("Closing jobs channel");
        drop(jobs_tx);
        match &result {
            Ok(_) => {
                while let Some(joined) = workers.join_next().await {
                    if let Err(e) = joined {
                        error!("A worker task failed: {:?}", e);
                    }
                }
            }
            Err(e) => {
                error!("Task aborted: {}", e);
                workers.shutdown().await;
            }
        }
        self.reject_pending_commands();

        if let Ok(outcome) = &result {
            info!(
                "Task finished ({:?}). Stats: requests_enqueued={}, requests_succeeded={}, requests_failed={}, still_queued={}",
                outcome,
                self.stats.requests_enqueued.load(Ordering::SeqCst),
                self.stats.requests_succeeded.load(Ordering::SeqCst),
                self.stats.requests_failed.load(Ordering::SeqCst),
                self.queue.len()
            );
            debug!("{}", self.stats);
        }
        result
    }

    async fn coordinate<H: Lifecycle<Q>>(
        &mut self,
        hooks: &mut H,
        jobs: &AsyncSender<Request>,
        completions: &AsyncReceiver<Completion>,
    ) -> Result<RunOutcome, SpiderError> {
        let control = self.control_rx.clone();
        let mut in_flight = 0usize;
        let mut shutting_down = false;

        loop {
            while let Ok(Some(command)) = control.try_recv() {
                self.handle_command(hooks, command, in_flight, &mut shutting_down);
            }

            while !shutting_down && in_flight < self.num_workers {
                let Some(request) = self.queue.get()? else {
                    break;
                };
                trace!("Dispatching {}", request);
                hooks.dispatched(&request);
                self.stats.increment_requests_dispatched();
                // Never blocks: the channel holds as many requests as there are workers.
                jobs.send(request)
                    .await
                    .map_err(|_| SpiderError::GeneralError("worker pool has shut down".into()))?;
                in_flight += 1;
            }

            if in_flight == 0 {
                return Ok(if shutting_down {
                    RunOutcome::Interrupted
                } else {
                    RunOutcome::Completed
                });
            }

            tokio::select! {
                completion = completions.recv() => {
                    let completion = completion
                        .map_err(|_| SpiderError::GeneralError("all workers exited with requests in flight".into()))?;
                    in_flight -= 1;
                    self.complete(hooks, completion)?;
                }
                command = control.recv() => {
                    let command = command
                        .map_err(|_| SpiderError::GeneralError("control channel closed".into()))?;
                    self.handle_command(hooks, command, in_flight, &mut shutting_down);
                }
            }
        }
    }

    fn complete<H: Lifecycle<Q>>(&mut self, hooks: &mut H, completion: Completion) -> Result<(), SpiderError> {
        let Completion {
            worker_id,
            request,
            outcome,
            elapsed,
        } = completion;

        let succeeded = match outcome {
            Ok(discovered) => {
                let count = discovered.len();
                self.queue.put_many(discovered)?;
                self.stats.add_requests_enqueued(count);
                self.stats.increment_requests_succeeded();
                debug!(
                    "Worker {} crawled {} in {:?}, discovered {} requests",
                    worker_id, request, elapsed, count
                );
                true
            }
            Err(e) => {
                self.stats.record_failure(e.category());
                warn!(
                    "Worker {} dropped {} after {:?}: {}",
                    worker_id,
                    request,
                    elapsed,
                    self.formatters.format(&e)
                );
                false
            }
        };

        hooks.finished(&self.queue, &request, succeeded);
        Ok(())
    }

    fn handle_command<H: Lifecycle<Q>>(
        &mut self,
        hooks: &mut H,
        command: Command,
        in_flight: usize,
        shutting_down: &mut bool,
    ) {
        match command {
            Command::Stash { dir, reply } => {
                let result = hooks.stash(&self.queue, &dir);
                match &result {
                    Ok(()) => {
                        self.stats.increment_checkpoints_saved();
                        info!("Checkpoint saved to {:?}", dir);
                    }
                    Err(e) => {
                        self.stats.increment_checkpoints_failed();
                        error!("Checkpoint to {:?} failed: {}", dir, e);
                    }
                }
                if reply.send(result).is_err() {
                    trace!("Stash requester went away before the reply");
                }
            }
            Command::Shutdown => {
                if !*shutting_down {
                    info!("Shutdown requested, waiting for {} in-flight requests", in_flight);
                }
                *shutting_down = true;
            }
        }
    }

    fn reject_pending_commands(&self) {
        while let Ok(Some(command)) = self.control_rx.try_recv() {
            if let Command::Stash { reply, .. } = command {
                let _ = reply.send(Err(SpiderError::GeneralError(
                    "task finished before the stash could run".into(),
                )));
            }
        }
    }
}

struct Untracked;

impl<Q: RequestQueue> Lifecycle<Q> for Untracked {
    fn stash(&mut self, queue: &Q, _dir: &Path) -> Result<(), SpiderError> {
        Err(SpiderError::NotRecoverable(format!(
            "{} under an untracked task",
            queue.describe()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::queue::{SimpleQueue, SpillQueue};
    use crate::task::test_support::{Gate, Recorder};
    use tokio::sync::oneshot;

    fn seeds(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_seed_is_crawled_exactly_once() {
        let spider = Recorder::new(4, seeds(0..40));
        let crawled = spider.crawled.clone();
        let mut task = AsyncTask::new(spider, SimpleQueue::new());
        assert_eq!(task.num_workers(), 4);
        task.seed().unwrap();

        let outcome = task.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(crawled.len(), 40);
        assert!(crawled.iter().all(|entry| *entry.value() == 1));
        assert!(task.queue().is_empty());
        assert_eq!(task.stats().requests_dispatched.load(Ordering::SeqCst), 40);
        assert_eq!(task.stats().requests_succeeded.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn discovered_requests_are_crawled_too() {
        // Every node n < 31 links to 2n+1 and 2n+2: a full binary tree of 63 nodes.
        let spider = Recorder::new(3, seeds(0..1)).discovering(|target| {
            let n: usize = target.parse().unwrap_or(usize::MAX);
            if n < 31 {
                vec![Request::new((2 * n + 1).to_string()), Request::new((2 * n + 2).to_string())]
            } else {
                Vec::new()
            }
        });
        let crawled = spider.crawled.clone();
        let mut task = AsyncTask::new(spider, SpillQueue::new(SimpleQueue::new(), 3, 2));
        task.seed().unwrap();

        assert_eq!(task.run().await.unwrap(), RunOutcome::Completed);
        assert_eq!(crawled.len(), 63);
        assert!(crawled.iter().all(|entry| *entry.value() == 1));
        assert_eq!(task.stats().requests_enqueued.load(Ordering::SeqCst), 63);
    }

    #[tokio::test]
    async fn failures_are_logged_and_dropped() {
        let mut targets = seeds(0..5);
        targets.push("bad-1".into());
        targets.push("bad-2".into());
        let spider = Recorder::new(2, targets);
        let crawled = spider.crawled.clone();
        let mut task = AsyncTask::new(spider, SimpleQueue::new());
        task.seed().unwrap();

        assert_eq!(task.run().await.unwrap(), RunOutcome::Completed);
        let stats = task.stats();
        assert_eq!(stats.requests_succeeded.load(Ordering::SeqCst), 5);
        assert_eq!(stats.failures(ErrorCategory::Client), 2);
        assert_eq!(crawled.get("bad-1").map(|v| *v), Some(1));
        assert!(task.queue().is_empty());
    }

    #[tokio::test]
    async fn panicking_crawl_is_contained() {
        let mut targets = seeds(0..3);
        targets.insert(1, "boom".into());
        let spider = Recorder::new(2, targets);
        let crawled = spider.crawled.clone();
        let mut task = AsyncTask::new(spider, SimpleQueue::new());
        task.seed().unwrap();

        assert_eq!(task.run().await.unwrap(), RunOutcome::Completed);
        assert_eq!(crawled.len(), 4);
        assert_eq!(task.stats().failures(ErrorCategory::Other), 1);
        assert_eq!(task.stats().requests_succeeded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn shutdown_lets_in_flight_finish() {
        let spider = Gate::new(1, seeds(0..10));
        let started = spider.started.clone();
        let release = spider.release.clone();
        let crawled = spider.crawled.clone();
        let mut task = AsyncTask::new(spider, SimpleQueue::new());
        task.seed().unwrap();
        let handle = task.handle();

        let run = tokio::spawn(async move {
            let outcome = task.run().await;
            (task, outcome)
        });

        started.notified().await;
        let refused = handle.stash("/nonexistent/checkpoint").await;
        assert!(matches!(refused, Err(SpiderError::NotRecoverable(_))));
        handle.shutdown().await.unwrap();
        release.notify_one();

        let (task, outcome) = run.await.unwrap();
        assert_eq!(outcome.unwrap(), RunOutcome::Interrupted);
        assert_eq!(crawled.len(), 1);
        assert_eq!(task.queue().len(), 9);
        assert_eq!(task.stats().requests_succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(task.stats().checkpoints_failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leftover_commands_are_rejected() {
        let task = AsyncTask::new(Recorder::new(1, Vec::new()), SimpleQueue::new());
        let (reply, response) = oneshot::channel();
        task.control_tx
            .send(Command::Stash {
                dir: "unused".into(),
                reply,
            })
            .await
            .unwrap();

        task.reject_pending_commands();
        assert!(response.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn empty_queue_completes_immediately() {
        let mut task = AsyncTask::new(Recorder::new(4, Vec::new()), SimpleQueue::new());
        assert_eq!(task.run().await.unwrap(), RunOutcome::Completed);
        assert_eq!(task.stats().requests_dispatched.load(Ordering::SeqCst), 0);
    }
}
