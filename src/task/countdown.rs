//! Automatic checkpoints every `auto_save_frequency` successful crawls.

use super::control::TaskHandle;
use super::recoverable::{InFlightTracker, RecoverableTask};
use super::{Lifecycle, RunOutcome};
use crate::error::SpiderError;
use crate::queue::{Recoverable, RequestQueue};
use crate::request::Request;
use crate::spider::Spider;
use crate::state::InFlightSet;
use crate::stats::StatCollector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// A [`RecoverableTask`] that checkpoints itself every `auto_save_frequency`
/// successful crawls.
///
/// Failed crawls do not count. A failed automatic checkpoint leaves the previous
/// one in place, is logged and counted in the stats; the run carries on and
/// tries again after the next `auto_save_frequency` successes.
pub struct CountDownRecoverableTask<S: Spider, Q: RequestQueue + Recoverable> {
    inner: RecoverableTask<S, Q>,
    frequency: usize,
    remaining: usize,
    checkpoint_dir: PathBuf,
}

impl<S: Spider, Q: RequestQueue + Recoverable> CountDownRecoverableTask<S, Q> {
    /// Wraps `inner`, saving into `checkpoint_dir`.
    ///
    /// Fails with `ConfigurationError` when the spider's `auto_save_frequency` is 0.
    pub fn new<P: AsRef<Path>>(inner: RecoverableTask<S, Q>, checkpoint_dir: P) -> Result<Self, SpiderError> {
        let frequency = inner.task().spider().auto_save_frequency();
        if frequency == 0 {
            return Err(SpiderError::ConfigurationError(
                "auto_save_frequency must be greater than 0 for a countdown task.".to_string(),
            ));
        }
        Ok(Self {
            inner,
            frequency,
            remaining: frequency,
            checkpoint_dir: checkpoint_dir.as_ref().to_path_buf(),
        })
    }

    pub fn frequency(&self) -> usize {
        self.frequency
    }

    /// Successful crawls left before the next automatic checkpoint.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn inner(&self) -> &RecoverableTask<S, Q> {
        &self.inner
    }

    pub fn handle(&self) -> TaskHandle {
        self.inner.handle()
    }

    pub fn queue(&self) -> &Q {
        self.inner.queue()
    }

    pub fn stats(&self) -> Arc<StatCollector> {
        self.inner.stats()
    }

    pub fn in_flight(&self) -> &InFlightSet {
        self.inner.in_flight()
    }

    pub fn seed(&mut self) -> Result<usize, SpiderError> {
        self.inner.seed()
    }

    pub async fn run(&mut self) -> Result<RunOutcome, SpiderError> {
        let Self {
            inner,
            frequency,
            remaining,
            checkpoint_dir,
        } = self;
        let RecoverableTask { task, in_flight } = inner;
        let stats = task.stats();
        let mut hooks = CountDown {
            inner: InFlightTracker { in_flight },
            frequency: *frequency,
            remaining,
            dir: checkpoint_dir.as_path(),
            stats,
        };
        task.drive(&mut hooks).await
    }
}

impl<S: Spider, Q: RequestQueue + Recoverable> Recoverable for CountDownRecoverableTask<S, Q> {
    fn stash(&self, dir: &Path) -> Result<(), SpiderError> {
        self.inner.stash(dir)
    }

    fn recover(&mut self, dir: &Path) -> Result<(), SpiderError> {
        self.inner.recover(dir)
    }

    fn can_recover(&self, dir: &Path) -> bool {
        self.inner.can_recover(dir)
    }
}

/// Counts successful crawls down and stashes through `inner` at zero.
pub(crate) struct CountDown<'a, H> {
    pub(crate) inner: H,
    pub(crate) frequency: usize,
    pub(crate) remaining: &'a mut usize,
    pub(crate) dir: &'a Path,
    pub(crate) stats: Arc<StatCollector>,
}

impl<Q, H: Lifecycle<Q>> Lifecycle<Q> for CountDown<'_, H> {
    fn dispatched(&mut self, request: &Request) {
        self.inner.dispatched(request);
    }

    fn finished(&mut self, queue: &Q, request: &Request, succeeded: bool) {
        self.inner.finished(queue, request, succeeded);
        if !succeeded {
            return;
        }

        *self.remaining = self.remaining.saturating_sub(1);
        if *self.remaining > 0 {
            return;
        }
        *self.remaining = self.frequency;

        match self.inner.stash(queue, self.dir) {
            Ok(()) => {
                self.stats.increment_checkpoints_saved();
                debug!("Automatic checkpoint saved to {:?}", self.dir);
            }
            Err(e) => {
                self.stats.increment_checkpoints_failed();
                error!("Automatic checkpoint to {:?} failed: {}", self.dir, e);
            }
        }
    }

    fn stash(&mut self, queue: &Q, dir: &Path) -> Result<(), SpiderError> {
        self.inner.stash(queue, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint;
    use crate::queue::{RecoverableQueue, SimpleQueue};
    use crate::task::engine::AsyncTask;
    use crate::task::test_support::Recorder;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    /// Records stash calls instead of writing anything.
    #[derive(Default)]
    struct CountingStash {
        stashes: usize,
    }

    impl<Q> Lifecycle<Q> for CountingStash {
        fn stash(&mut self, _queue: &Q, _dir: &Path) -> Result<(), SpiderError> {
            self.stashes += 1;
            Ok(())
        }
    }

    fn seeds(count: usize) -> Vec<String> {
        (0..count).map(|i| i.to_string()).collect()
    }

    async fn stashes_after(successes: usize, failures: usize) -> (usize, usize) {
        let mut targets = seeds(successes);
        targets.extend((0..failures).map(|i| format!("bad-{i}")));
        let mut task = AsyncTask::new(Recorder::new(2, targets), SimpleQueue::new());
        task.seed().unwrap();

        let mut remaining = 5;
        let mut hooks = CountDown {
            inner: CountingStash::default(),
            frequency: 5,
            remaining: &mut remaining,
            dir: Path::new("unused"),
            stats: task.stats(),
        };
        assert_eq!(task.drive(&mut hooks).await.unwrap(), RunOutcome::Completed);
        let stashes = hooks.inner.stashes;
        drop(hooks);
        (stashes, remaining)
    }

    #[tokio::test]
    async fn stashes_once_per_frequency() {
        assert_eq!(stashes_after(4, 0).await, (0, 1));
        assert_eq!(stashes_after(5, 0).await, (1, 5));
        assert_eq!(stashes_after(12, 0).await, (2, 3));
    }

    #[tokio::test]
    async fn failures_do_not_count() {
        assert_eq!(stashes_after(4, 6).await, (0, 1));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let task = RecoverableTask::new(Recorder::new(1, Vec::new()), RecoverableQueue::new(SimpleQueue::new()));
        let err = CountDownRecoverableTask::new(task, "unused").err().unwrap();
        assert!(matches!(err, SpiderError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn writes_checkpoints_while_running() {
        let dir = TempDir::new().unwrap();
        let mut spider = Recorder::new(1, seeds(7));
        spider.recoverable = true;
        spider.auto_save = 3;
        let task = RecoverableTask::new(spider, RecoverableQueue::new(SimpleQueue::new()));
        let mut task = CountDownRecoverableTask::new(task, dir.path()).unwrap();
        task.seed().unwrap();

        assert_eq!(task.run().await.unwrap(), RunOutcome::Completed);
        assert_eq!(task.stats().checkpoints_saved.load(Ordering::SeqCst), 2);
        assert_eq!(task.remaining(), 2);

        // The second checkpoint was taken after the sixth crawl: one request left.
        let queued = checkpoint::load_requests(dir.path(), checkpoint::QUEUE_FILE).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].target(), "6");
        assert!(InFlightSet::load(dir.path()).unwrap().is_empty());
    }
}
