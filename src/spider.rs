//! # Spider Module
//!
//! Defines the `Spider` trait, the boundary between the task engine and the code
//! that actually fetches things.
//!
//! ## Overview
//!
//! A spider declares how a crawl should be run (seed targets, concurrency,
//! checkpoint cadence, spill threshold, recoverability) and implements `crawl`,
//! which performs one fetch and returns whatever new requests it discovered. The
//! spider never touches the queue: the engine enqueues discovered requests on its
//! behalf and owns every piece of scheduling state.
//!
//! A failed `crawl` is logged and the request is dropped. A spider that wants a
//! retry returns the request again from a later `crawl`, or re-creates it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_task::{async_trait, Request, Spider, SpiderError};
//!
//! struct SitemapSpider;
//!
//! #[async_trait]
//! impl Spider for SitemapSpider {
//!     fn start_targets(&self) -> Vec<Request> {
//!         vec![Request::new("https://example.com/sitemap.xml")]
//!     }
//!
//!     fn num_threads(&self) -> usize {
//!         8
//!     }
//!
//!     async fn crawl(&self, request: &Request) -> Result<Vec<Request>, SpiderError> {
//!         let url = request.url()?;
//!         // ... fetch and parse ...
//!         Ok(Vec::new())
//!     }
//! }
//! ```

use crate::error::SpiderError;
use crate::request::Request;
use async_trait::async_trait;

/// Defines the contract for a crawl spider.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// The requests a fresh crawl starts from.
    fn start_targets(&self) -> Vec<Request>;

    /// Number of concurrent workers.
    fn num_threads(&self) -> usize {
        num_cpus::get().clamp(1, 16)
    }

    /// Successful crawls between automatic checkpoints. `0` disables them.
    fn auto_save_frequency(&self) -> usize {
        0
    }

    /// In-memory queue size above which requests spill to disk. `0` disables spilling.
    fn spill_threshold(&self) -> usize {
        0
    }

    /// Whether queue and in-flight state should be checkpointed.
    fn is_recoverable(&self) -> bool {
        false
    }

    /// Fetches one request and returns newly discovered requests.
    async fn crawl(&self, request: &Request) -> Result<Vec<Request>, SpiderError>;
}
