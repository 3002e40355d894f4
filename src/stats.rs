//! # Statistics Module
//!
//! Collects counters about a task run.
//!
//! ## Overview
//!
//! The `StatCollector` is shared between the coordinator and whoever holds a
//! handle to it (`AsyncTask::stats`). All counters are atomics, so reading them
//! while a run is in progress is fine.
//!
//! ## Key Metrics Tracked
//!
//! - **Requests**: enqueued, dispatched to a worker, succeeded, failed, and
//!   re-queued after a recovery
//! - **Failures by category**: how many crawls failed per [`ErrorCategory`]
//! - **Checkpoints**: saved and failed
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = task.stats();
//! task.run().await?;
//! println!("{}", stats);
//! println!("{}", stats.to_json_string_pretty()?);
//! ```

use crate::error::{ErrorCategory, SpiderError};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// Plain copy of the counters, so every presentation reads one consistent view.
struct StatsSnapshot {
    requests_enqueued: usize,
    requests_dispatched: usize,
    requests_succeeded: usize,
    requests_failed: usize,
    requests_requeued: usize,
    checkpoints_saved: usize,
    checkpoints_failed: usize,
    failures_by_category: BTreeMap<&'static str, usize>,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs_f64();
        if total_seconds > 0.0 {
            (self.requests_succeeded + self.requests_failed) as f64 / total_seconds
        } else {
            0.0
        }
    }
}

/// Counters describing a task run.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    pub requests_enqueued: AtomicUsize,
    pub requests_dispatched: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    pub requests_requeued: AtomicUsize,

    pub checkpoints_saved: AtomicUsize,
    pub checkpoints_failed: AtomicUsize,

    pub failures_by_category: DashMap<ErrorCategory, usize>,
}

impl StatCollector {
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_dispatched: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_requeued: AtomicUsize::new(0),
            checkpoints_saved: AtomicUsize::new(0),
            checkpoints_failed: AtomicUsize::new(0),
            failures_by_category: DashMap::new(),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let failures_by_category = self
            .failures_by_category
            .iter()
            .map(|entry| (entry.key().as_str(), *entry.value()))
            .collect();

        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_dispatched: self.requests_dispatched.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            requests_requeued: self.requests_requeued.load(Ordering::SeqCst),
            checkpoints_saved: self.checkpoints_saved.load(Ordering::SeqCst),
            checkpoints_failed: self.checkpoints_failed.load(Ordering::SeqCst),
            failures_by_category,
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn add_requests_enqueued(&self, count: usize) {
        self.requests_enqueued.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_dispatched(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a failed crawl under its error category.
    pub(crate) fn record_failure(&self, category: ErrorCategory) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        *self.failures_by_category.entry(category).or_insert(0) += 1;
    }

    pub(crate) fn add_requests_requeued(&self, count: usize) {
        self.requests_requeued.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_checkpoints_saved(&self) {
        self.checkpoints_saved.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_checkpoints_failed(&self) {
        self.checkpoints_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Failed crawls recorded for `category`.
    pub fn failures(&self, category: ErrorCategory) -> usize {
        self.failures_by_category.get(&category).map(|v| *v).unwrap_or(0)
    }

    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nTask Statistics")?;
        writeln!(f, "---------------")?;
        writeln!(f, "  duration    : {:?}", snapshot.elapsed_duration)?;
        writeln!(f, "  speed       : req/s: {:.2}", snapshot.requests_per_second())?;
        writeln!(
            f,
            "  requests    : enqueued: {}, dispatched: {}, ok: {}, fail: {}, requeued: {}",
            snapshot.requests_enqueued,
            snapshot.requests_dispatched,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_requeued
        )?;
        writeln!(
            f,
            "  checkpoints : saved: {}, failed: {}",
            snapshot.checkpoints_saved, snapshot.checkpoints_failed
        )?;

        let failures = if snapshot.failures_by_category.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .failures_by_category
                .iter()
                .map(|(category, count)| format!("{}: {}", category, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  failures    : {}\n", failures)
    }
}
