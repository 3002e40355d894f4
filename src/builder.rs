//! # Builder Module
//!
//! Provides the `CrawlBuilder`, a fluent API for wiring a spider into a ready to
//! run [`Crawl`].
//!
//! ## Overview
//!
//! The builder reads what the spider declares (threads, spill threshold,
//! recoverability, auto-save frequency), adds the settings a spider does not
//! own (where to spill, where to checkpoint, what to do on exit) and picks the
//! matching queue and engine:
//!
//! | spider | engine |
//! |---|---|
//! | not recoverable | `AsyncTask` |
//! | recoverable, `auto_save_frequency == 0` | `RecoverableTask` |
//! | recoverable, `auto_save_frequency > 0` | `CountDownRecoverableTask` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_task::CrawlBuilder;
//!
//! async fn crawl() -> Result<(), SpiderError> {
//!     let mut crawl = CrawlBuilder::new(MySpider)
//!         .with_checkpoint_dir("./checkpoints")
//!         .spill_dir("./spill")
//!         .handle_ctrl_c(true)
//!         .build()?;
//!
//!     crawl.run().await?;
//!     Ok(())
//! }
//! ```

use crate::error::SpiderError;
use crate::formatter::ErrorFormatterRegistry;
use crate::queue::{QueueConfig, RequestQueue, select_queue_with};
use crate::runner::{Crawl, TaskEngine};
use crate::spider::Spider;
use crate::task::{AsyncTask, CountDownRecoverableTask, RecoverableTask};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Settings a spider does not declare itself.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Requests per spill write/reload. Defaults to the spider's spill threshold.
    pub spill_chunk_size: Option<usize>,
    /// Directory for spill files. Defaults to the OS temp directory.
    pub spill_dir: Option<PathBuf>,
    /// Directory for checkpoints. Required for recoverable spiders.
    pub checkpoint_dir: Option<PathBuf>,
    /// Write a final checkpoint when a run ends.
    pub stash_on_exit: bool,
    /// Turn Ctrl-C into a graceful shutdown.
    pub handle_ctrl_c: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            spill_chunk_size: None,
            spill_dir: None,
            checkpoint_dir: None,
            stash_on_exit: true,
            handle_ctrl_c: false,
        }
    }
}

pub struct CrawlBuilder<S: Spider> {
    spider: Option<S>,
    config: CrawlConfig,
    formatters: ErrorFormatterRegistry,
}

impl<S: Spider> CrawlBuilder<S> {
    /// Creates a new `CrawlBuilder` for a given spider.
    pub fn new(spider: S) -> Self {
        Self {
            spider: Some(spider),
            config: CrawlConfig::default(),
            formatters: ErrorFormatterRegistry::default(),
        }
    }

    /// Sets how many requests are moved per spill write/reload.
    pub fn spill_chunk_size(mut self, size: usize) -> Self {
        self.config.spill_chunk_size = Some(size);
        self
    }

    /// Creates spill files in `dir`.
    pub fn spill_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.spill_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets the directory checkpoints are written to and recovered from.
    pub fn with_checkpoint_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.checkpoint_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Replaces the registry used to log failed crawls.
    pub fn formatters(mut self, formatters: ErrorFormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn stash_on_exit(mut self, enabled: bool) -> Self {
        self.config.stash_on_exit = enabled;
        self
    }

    pub fn handle_ctrl_c(mut self, enabled: bool) -> Self {
        self.config.handle_ctrl_c = enabled;
        self
    }

    /// Validates the configuration and assembles the `Crawl`.
    pub fn build(mut self) -> Result<Crawl<S>, SpiderError> {
        let spider = self.validate_and_get_spider()?;
        let recoverable = spider.is_recoverable();
        let auto_save_frequency = spider.auto_save_frequency();

        let queue_config = QueueConfig {
            chunk_size: self.config.spill_chunk_size,
            spill_dir: self.config.spill_dir.clone(),
        };
        let queue = select_queue_with(&spider, &queue_config);
        let task = AsyncTask::new(spider, queue).with_formatters(Arc::new(self.formatters));

        let engine = match (&self.config.checkpoint_dir, recoverable) {
            (_, false) => {
                if self.config.checkpoint_dir.is_some() {
                    warn!("Spider is not recoverable, ignoring the checkpoint directory");
                }
                if auto_save_frequency > 0 {
                    warn!("Spider is not recoverable, ignoring auto_save_frequency={}", auto_save_frequency);
                }
                TaskEngine::Plain(task)
            }
            (Some(dir), true) if auto_save_frequency > 0 => {
                TaskEngine::CountDown(CountDownRecoverableTask::new(RecoverableTask::from_task(task), dir)?)
            }
            (Some(_), true) => TaskEngine::Recoverable(RecoverableTask::from_task(task)),
            (None, true) => {
                return Err(SpiderError::ConfigurationError(
                    "a recoverable spider needs a checkpoint directory.".to_string(),
                ));
            }
        };

        debug!("Built {} engine on a {} queue", engine.kind(), engine.queue().describe());
        Ok(Crawl::new(engine, self.config))
    }

    fn validate_and_get_spider(&mut self) -> Result<S, SpiderError> {
        if self.config.spill_chunk_size == Some(0) {
            return Err(SpiderError::ConfigurationError(
                "spill_chunk_size must be greater than 0.".to_string(),
            ));
        }
        let spider = self.spider.take().ok_or_else(|| {
            SpiderError::ConfigurationError("Crawl must have a spider.".to_string())
        })?;
        if spider.num_threads() == 0 {
            return Err(SpiderError::ConfigurationError(
                "num_threads must be greater than 0.".to_string(),
            ));
        }
        if spider.is_recoverable() && self.config.checkpoint_dir.is_none() {
            return Err(SpiderError::ConfigurationError(
                "a recoverable spider needs a checkpoint directory.".to_string(),
            ));
        }
        Ok(spider)
    }
}
