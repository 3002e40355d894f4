//! Picks the queue composition a spider asks for.
//!
//! | spill threshold | recoverable | queue |
//! |---|---|---|
//! | 0 | no | `simple` |
//! | 0 | yes | `recoverable(simple)` |
//! | > 0 | no | `spill(simple)` |
//! | > 0 | yes | `recoverable(spill(simple))` |

use super::{Recoverable, RecoverableQueue, RecoverableSpillQueue, RequestQueue, SimpleQueue, SpillQueue};
use crate::checkpoint::RecordWriter;
use crate::error::SpiderError;
use crate::request::Request;
use crate::spider::Spider;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Queue-level knobs that are not part of a spider's declaration.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Requests moved per spill write/reload. Defaults to the spill threshold.
    pub chunk_size: Option<usize>,
    /// Where spill files go. Defaults to the OS temp directory.
    pub spill_dir: Option<PathBuf>,
}

/// One of the four queue compositions a spider can ask for.
#[derive(Debug)]
pub enum SelectedQueue {
    Simple(SimpleQueue),
    Recoverable(RecoverableQueue<SimpleQueue>),
    Spill(SpillQueue<SimpleQueue>),
    RecoverableSpill(RecoverableSpillQueue),
}

/// Picks the queue for `spider` with default [`QueueConfig`].
pub fn select_queue<S: Spider + ?Sized>(spider: &S) -> SelectedQueue {
    select_queue_with(spider, &QueueConfig::default())
}

/// Picks the queue for `spider`.
///
/// Only the spill threshold and recoverability decide the composition; `config`
/// merely tunes the spill layer when there is one.
pub fn select_queue_with<S: Spider + ?Sized>(spider: &S, config: &QueueConfig) -> SelectedQueue {
    let threshold = spider.spill_threshold();
    let selected = match (threshold, spider.is_recoverable()) {
        (0, false) => SelectedQueue::Simple(SimpleQueue::new()),
        (0, true) => SelectedQueue::Recoverable(RecoverableQueue::new(SimpleQueue::new())),
        (_, false) => SelectedQueue::Spill(spill_queue(threshold, config)),
        (_, true) => {
            let spill = spill_queue(threshold, config);
            let batch_size = spill.chunk_size();
            SelectedQueue::RecoverableSpill(RecoverableQueue::new(spill).with_batch_size(batch_size))
        }
    };
    debug!("Selected {} queue", selected.describe());
    selected
}

fn spill_queue(threshold: usize, config: &QueueConfig) -> SpillQueue<SimpleQueue> {
    let chunk_size = config.chunk_size.unwrap_or(threshold);
    let queue = SpillQueue::new(SimpleQueue::new(), threshold, chunk_size);
    match &config.spill_dir {
        Some(dir) => queue.with_spill_dir(dir),
        None => queue,
    }
}

impl SelectedQueue {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SelectedQueue::Recoverable(_) | SelectedQueue::RecoverableSpill(_))
    }

    fn as_queue(&self) -> &dyn RequestQueue {
        match self {
            SelectedQueue::Simple(q) => q,
            SelectedQueue::Recoverable(q) => q,
            SelectedQueue::Spill(q) => q,
            SelectedQueue::RecoverableSpill(q) => q,
        }
    }

    fn as_queue_mut(&mut self) -> &mut dyn RequestQueue {
        match self {
            SelectedQueue::Simple(q) => q,
            SelectedQueue::Recoverable(q) => q,
            SelectedQueue::Spill(q) => q,
            SelectedQueue::RecoverableSpill(q) => q,
        }
    }
}

impl RequestQueue for SelectedQueue {
    fn put(&mut self, request: Request) -> Result<(), SpiderError> {
        self.as_queue_mut().put(request)
    }

    fn put_many(&mut self, requests: Vec<Request>) -> Result<(), SpiderError> {
        self.as_queue_mut().put_many(requests)
    }

    fn get(&mut self) -> Result<Option<Request>, SpiderError> {
        self.as_queue_mut().get()
    }

    fn len(&self) -> usize {
        self.as_queue().len()
    }

    fn snapshot(&self) -> Result<Vec<Request>, SpiderError> {
        self.as_queue().snapshot()
    }

    fn write_records(&self, writer: &mut RecordWriter) -> Result<(), SpiderError> {
        self.as_queue().write_records(writer)
    }

    fn clear(&mut self) -> Result<(), SpiderError> {
        self.as_queue_mut().clear()
    }

    fn describe(&self) -> String {
        self.as_queue().describe()
    }
}

/// Non-recoverable compositions refuse `stash`/`recover` with `NotRecoverable`.
impl Recoverable for SelectedQueue {
    fn stash(&self, dir: &Path) -> Result<(), SpiderError> {
        match self {
            SelectedQueue::Recoverable(q) => q.stash(dir),
            SelectedQueue::RecoverableSpill(q) => q.stash(dir),
            other => Err(SpiderError::NotRecoverable(other.describe())),
        }
    }

    fn recover(&mut self, dir: &Path) -> Result<(), SpiderError> {
        match self {
            SelectedQueue::Recoverable(q) => q.recover(dir),
            SelectedQueue::RecoverableSpill(q) => q.recover(dir),
            other => Err(SpiderError::NotRecoverable(other.describe())),
        }
    }

    fn can_recover(&self, dir: &Path) -> bool {
        match self {
            SelectedQueue::Recoverable(q) => q.can_recover(dir),
            SelectedQueue::RecoverableSpill(q) => q.can_recover(dir),
            _ => false,
        }
    }
}
