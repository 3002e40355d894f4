//! # spider-task
//!
//! Recoverable, disk-spilling request queue and the asynchronous crawl-task
//! engine that drives it.
//!
//! Provides the queue family (`SimpleQueue`, `SpillQueue`, `RecoverableQueue`),
//! the engines (`AsyncTask`, `RecoverableTask`, `CountDownRecoverableTask`), the
//! `Spider` trait they run, and `CrawlBuilder` to wire everything together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_task::prelude::*;
//!
//! struct MySpider;
//!
//! #[async_trait]
//! impl Spider for MySpider {
//!     fn start_targets(&self) -> Vec<Request> {
//!         vec![Request::new("https://example.com")]
//!     }
//!     fn spill_threshold(&self) -> usize { 10_000 }
//!     fn is_recoverable(&self) -> bool { true }
//!     fn auto_save_frequency(&self) -> usize { 500 }
//!
//!     async fn crawl(&self, request: &Request) -> Result<Vec<Request>, SpiderError> {
//!         todo!()
//!     }
//! }
//!
//! async fn run() -> Result<(), SpiderError> {
//!     let mut crawl = CrawlBuilder::new(MySpider)
//!         .with_checkpoint_dir("./checkpoints")
//!         .handle_ctrl_c(true)
//!         .build()?;
//!     crawl.run().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod formatter;
pub mod prelude;
pub mod queue;
pub mod request;
pub mod runner;
pub mod spider;
pub mod state;
pub mod stats;
pub mod task;

pub use builder::{CrawlBuilder, CrawlConfig};
pub use error::{ErrorCategory, SpiderError};
pub use formatter::ErrorFormatterRegistry;
pub use queue::{
    QueueConfig, Recoverable, RecoverableQueue, RecoverableSpillQueue, RequestQueue, SelectedQueue, SimpleQueue,
    SpillQueue, select_queue, select_queue_with,
};
pub use request::{Request, RequestId};
pub use runner::Crawl;
pub use spider::Spider;
pub use state::InFlightSet;
pub use stats::StatCollector;
pub use task::{AsyncTask, CountDownRecoverableTask, RecoverableTask, RunOutcome, TaskHandle};

pub use async_trait::async_trait;
pub use tokio;
