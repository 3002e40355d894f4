//! # Formatter Module
//!
//! Turns crawl failures into short, loggable lines.
//!
//! ## Overview
//!
//! The engine never retries a failed crawl on its own; it logs the failure and
//! drops the request. What that log line looks like is decided here: an
//! `ErrorFormatterRegistry` maps each [`ErrorCategory`] to a formatting function,
//! and falls back to the error's `Display` output for categories nobody
//! registered. The registry is built once at startup and shared with the task
//! engine behind an `Arc`; it never influences control flow.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_task::formatter::ErrorFormatterRegistry;
//! use spider_task::error::{ErrorCategory, SpiderError};
//!
//! let mut formatters = ErrorFormatterRegistry::default();
//! formatters.register(ErrorCategory::Timeout, |err| format!("slow: {err}"));
//! ```

use crate::error::{ErrorCategory, SpiderError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A function rendering one error as a single log line.
pub type FormatFn = Arc<dyn Fn(&SpiderError) -> String + Send + Sync>;

/// Registry of per-category error formatters.
#[derive(Clone)]
pub struct ErrorFormatterRegistry {
    formatters: HashMap<ErrorCategory, FormatFn>,
}

impl ErrorFormatterRegistry {
    /// An empty registry: every error is rendered with its `Display` form.
    pub fn new() -> Self {
        Self {
            formatters: HashMap::new(),
        }
    }

    /// Registers `formatter` for `category`, returning the one it replaced.
    pub fn register<F>(&mut self, category: ErrorCategory, formatter: F) -> Option<FormatFn>
    where
        F: Fn(&SpiderError) -> String + Send + Sync + 'static,
    {
        self.formatters.insert(category, Arc::new(formatter))
    }

    pub fn is_registered(&self, category: ErrorCategory) -> bool {
        self.formatters.contains_key(&category)
    }

    pub fn format(&self, err: &SpiderError) -> String {
        match self.formatters.get(&err.category()) {
            Some(formatter) => formatter(err),
            None => err.to_string(),
        }
    }
}

/// The default registry knows how to shorten client-side failures.
impl Default for ErrorFormatterRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(ErrorCategory::Client, format_client_error);
        registry
    }
}

impl fmt::Debug for ErrorFormatterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut categories: Vec<_> = self.formatters.keys().map(|c| c.as_str()).collect();
        categories.sort_unstable();
        f.debug_struct("ErrorFormatterRegistry")
            .field("categories", &categories)
            .finish()
    }
}

fn format_client_error(err: &SpiderError) -> String {
    match err {
        SpiderError::ClientError {
            target,
            status: Some(status),
            message,
        } => format!("[client] {target} -> {status} {message}"),
        SpiderError::ClientError {
            target,
            status: None,
            message,
        } => format!("[client] {target} -> {message}"),
        other => other.to_string(),
    }
}
