//! # Task Module
//!
//! The crawl engine and its checkpointing decorators.
//!
//! ## Overview
//!
//! - **AsyncTask**: runs `num_threads` workers against a queue until the queue is
//!   exhausted and nothing is in flight.
//! - **RecoverableTask**: additionally tracks the in-flight set, so `stash`
//!   captures requests that were dequeued but not finished, and `recover` puts
//!   them back into the queue.
//! - **CountDownRecoverableTask**: stashes automatically every
//!   `auto_save_frequency` successful crawls.
//!
//! ## Implementation Details
//!
//! One coordinator future owns the queue and the in-flight set. Workers are
//! tokio tasks that receive requests over a bounded `kanal` channel and report
//! [`worker::Completion`]s on a second channel. The decorators do not wrap the
//! loop itself; they hand the coordinator a [`Lifecycle`] implementation whose
//! hooks run between two suspension points, which is the only place state is
//! ever mutated.

mod control;
mod countdown;
mod engine;
mod recoverable;
mod worker;

pub use control::TaskHandle;
pub use countdown::CountDownRecoverableTask;
pub use engine::AsyncTask;
pub use recoverable::RecoverableTask;

use crate::error::SpiderError;
use crate::request::Request;
use std::path::Path;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The queue was drained and no request was left in flight.
    Completed,
    /// A shutdown was requested; in-flight crawls finished, the rest is still queued.
    Interrupted,
}

/// Hooks the coordinator calls while it owns the queue.
pub(crate) trait Lifecycle<Q>: Send {
    /// A request was taken off the queue and handed to a worker.
    fn dispatched(&mut self, _request: &Request) {}

    /// A crawl returned. Discovered requests are already in `queue`.
    fn finished(&mut self, _queue: &Q, _request: &Request, _succeeded: bool) {}

    /// Checkpoints everything this lifecycle knows about into `dir`.
    fn stash(&mut self, queue: &Q, dir: &Path) -> Result<(), SpiderError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::error::SpiderError;
    use crate::request::Request;
    use crate::spider::Spider;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Counts crawls per target. Targets starting with `bad` fail, `boom` panics.
    pub struct Recorder {
        threads: usize,
        seeds: Vec<String>,
        discover: Option<fn(&str) -> Vec<Request>>,
        pub crawled: Arc<DashMap<String, usize>>,
        pub auto_save: usize,
        pub recoverable: bool,
    }

    impl Recorder {
        pub fn new(threads: usize, seeds: Vec<String>) -> Self {
            Self {
                threads,
                seeds,
                discover: None,
                crawled: Arc::new(DashMap::new()),
                auto_save: 0,
                recoverable: false,
            }
        }

        pub fn discovering(mut self, discover: fn(&str) -> Vec<Request>) -> Self {
            self.discover = Some(discover);
            self
        }
    }

    #[async_trait]
    impl Spider for Recorder {
        fn start_targets(&self) -> Vec<Request> {
            self.seeds.iter().map(Request::new).collect()
        }

        fn num_threads(&self) -> usize {
            self.threads
        }

        fn auto_save_frequency(&self) -> usize {
            self.auto_save
        }

        fn is_recoverable(&self) -> bool {
            self.recoverable
        }

        async fn crawl(&self, request: &Request) -> Result<Vec<Request>, SpiderError> {
            *self.crawled.entry(request.target().to_string()).or_insert(0) += 1;
            tokio::task::yield_now().await;

            let target = request.target();
            if target.starts_with("bad") {
                return Err(SpiderError::client(target, Some(404), "not found"));
            }
            if target == "boom" {
                panic!("boom");
            }
            Ok(self.discover.map(|discover| discover(target)).unwrap_or_default())
        }
    }

    /// Signals `started` whenever a crawl begins, then waits for `release`.
    pub struct Gate {
        threads: usize,
        seeds: Vec<String>,
        pub started: Arc<Notify>,
        pub release: Arc<Notify>,
        pub crawled: Arc<DashMap<String, usize>>,
        pub recoverable: bool,
    }

    impl Gate {
        pub fn new(threads: usize, seeds: Vec<String>) -> Self {
            Self {
                threads,
                seeds,
                started: Arc::new(Notify::new()),
                release: Arc::new(Notify::new()),
                crawled: Arc::new(DashMap::new()),
                recoverable: false,
            }
        }
    }

    #[async_trait]
    impl Spider for Gate {
        fn start_targets(&self) -> Vec<Request> {
            self.seeds.iter().map(Request::new).collect()
        }

        fn num_threads(&self) -> usize {
            self.threads
        }

        fn is_recoverable(&self) -> bool {
            self.recoverable
        }

        async fn crawl(&self, request: &Request) -> Result<Vec<Request>, SpiderError> {
            *self.crawled.entry(request.target().to_string()).or_insert(0) += 1;
            self.started.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }
}
