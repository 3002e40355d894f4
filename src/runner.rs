//! # Runner Module
//!
//! `Crawl` is the startup glue around a task engine: it decides between
//! resuming and starting fresh, optionally turns Ctrl-C into a graceful
//! shutdown, and writes a final checkpoint when the run ends.
//!
//! ## Startup
//!
//! For a recoverable spider, a checkpoint directory holding any checkpoint file
//! means "resume": the engine recovers from it, and a partial checkpoint fails
//! the run instead of silently starting over. Otherwise the spider's start
//! targets are enqueued. Either happens once, on the first `run`.
//!
//! ## Exit
//!
//! With `stash_on_exit`, a recoverable crawl writes its state when `run`
//! returns, whatever the outcome. After a completed run that is an empty
//! checkpoint, so the next start resumes into an already finished crawl rather
//! than re-seeding.

use crate::builder::CrawlConfig;
use crate::checkpoint;
use crate::error::SpiderError;
use crate::queue::{Recoverable, RequestQueue, SelectedQueue};
use crate::spider::Spider;
use crate::stats::StatCollector;
use crate::task::{AsyncTask, CountDownRecoverableTask, RecoverableTask, RunOutcome, TaskHandle};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The engine a [`Crawl`] drives, chosen by the builder.
pub(crate) enum TaskEngine<S: Spider> {
    Plain(AsyncTask<S, SelectedQueue>),
    Recoverable(RecoverableTask<S, SelectedQueue>),
    CountDown(CountDownRecoverableTask<S, SelectedQueue>),
}

impl<S: Spider> TaskEngine<S> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            TaskEngine::Plain(_) => "async",
            TaskEngine::Recoverable(_) => "recoverable",
            TaskEngine::CountDown(_) => "countdown",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, TaskEngine::Plain(_))
    }

    fn handle(&self) -> TaskHandle {
        match self {
            TaskEngine::Plain(task) => task.handle(),
            TaskEngine::Recoverable(task) => task.handle(),
            TaskEngine::CountDown(task) => task.handle(),
        }
    }

    pub(crate) fn queue(&self) -> &SelectedQueue {
        match self {
            TaskEngine::Plain(task) => task.queue(),
            TaskEngine::Recoverable(task) => task.queue(),
            TaskEngine::CountDown(task) => task.queue(),
        }
    }

    fn stats(&self) -> Arc<StatCollector> {
        match self {
            TaskEngine::Plain(task) => task.stats(),
            TaskEngine::Recoverable(task) => task.stats(),
            TaskEngine::CountDown(task) => task.stats(),
        }
    }

    fn seed(&mut self) -> Result<usize, SpiderError> {
        match self {
            TaskEngine::Plain(task) => task.seed(),
            TaskEngine::Recoverable(task) => task.seed(),
            TaskEngine::CountDown(task) => task.seed(),
        }
    }

    async fn run(&mut self) -> Result<RunOutcome, SpiderError> {
        match self {
            TaskEngine::Plain(task) => task.run().await,
            TaskEngine::Recoverable(task) => task.run().await,
            TaskEngine::CountDown(task) => task.run().await,
        }
    }

    fn stash(&self, dir: &Path) -> Result<(), SpiderError> {
        match self {
            TaskEngine::Plain(task) => Err(SpiderError::NotRecoverable(task.queue().describe())),
            TaskEngine::Recoverable(task) => task.stash(dir),
            TaskEngine::CountDown(task) => task.stash(dir),
        }
    }

    fn recover(&mut self, dir: &Path) -> Result<(), SpiderError> {
        match self {
            TaskEngine::Plain(task) => Err(SpiderError::NotRecoverable(task.queue().describe())),
            TaskEngine::Recoverable(task) => task.recover(dir),
            TaskEngine::CountDown(task) => task.recover(dir),
        }
    }
}

/// A configured crawl, built by [`CrawlBuilder`](crate::builder::CrawlBuilder).
pub struct Crawl<S: Spider> {
    engine: TaskEngine<S>,
    config: CrawlConfig,
    prepared: bool,
}

impl<S: Spider> Crawl<S> {
    pub(crate) fn new(engine: TaskEngine<S>, config: CrawlConfig) -> Self {
        Self {
            engine,
            config,
            prepared: false,
        }
    }

    /// `async`, `recoverable` or `countdown`.
    pub fn engine_kind(&self) -> &'static str {
        self.engine.kind()
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn handle(&self) -> TaskHandle {
        self.engine.handle()
    }

    pub fn queue(&self) -> &SelectedQueue {
        self.engine.queue()
    }

    /// Returns a cloned Arc to the `StatCollector` of the underlying engine.
    pub fn stats(&self) -> Arc<StatCollector> {
        self.engine.stats()
    }

    /// Resumes or seeds (first call only), then runs the engine to the end.
    pub async fn run(&mut self) -> Result<RunOutcome, SpiderError> {
        if !self.prepared {
            self.prepare()?;
            self.prepared = true;
        }

        let watcher = self
            .config
            .handle_ctrl_c
            .then(|| spawn_ctrl_c_watcher(self.engine.handle()));
        let result = self.engine.run().await;
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        if let Err(e) = self.final_stash() {
            error!("Final checkpoint save failed: {}", e);
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }

    fn prepare(&mut self) -> Result<(), SpiderError> {
        if self.engine.is_recoverable() {
            if let Some(dir) = self.config.checkpoint_dir.clone() {
                if checkpoint::any_present(&dir) {
                    info!("Resuming from checkpoint in {:?}", dir);
                    return self.engine.recover(&dir);
                }
                info!("No checkpoint in {:?}, starting fresh", dir);
            }
        }
        self.engine.seed().map(|_| ())
    }

    fn final_stash(&self) -> Result<(), SpiderError> {
        if !self.config.stash_on_exit || !self.engine.is_recoverable() {
            return Ok(());
        }
        let Some(dir) = &self.config.checkpoint_dir else {
            return Ok(());
        };
        let stats = self.engine.stats();
        match self.engine.stash(dir) {
            Ok(()) => {
                stats.increment_checkpoints_saved();
                info!("Final checkpoint saved successfully to {:?}", dir);
                Ok(())
            }
            Err(e) => {
                stats.increment_checkpoints_failed();
                Err(e)
            }
        }
    }
}

fn spawn_ctrl_c_watcher(handle: TaskHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, initiating graceful shutdown.");
                if let Err(e) = handle.shutdown().await {
                    warn!("Could not request shutdown: {}", e);
                }
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    })
}
