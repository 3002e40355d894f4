//! A "prelude" for users of the `spider-task` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use spider_task::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawl,
    CrawlBuilder,
    Request,
    RunOutcome,
    SpiderError,
    TaskHandle,
    // Core traits
    Recoverable,
    RequestQueue,
    Spider,
    // Essential re-export for trait implementation
    async_trait,
};
