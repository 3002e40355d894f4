//! Checkpointing decorator.
//!
//! Wraps any queue with [`Recoverable`]. The queue file is streamed in both
//! directions: a stash copies the wrapped queue record by record (a spill queue
//! copies its spill file as is), and a recovery feeds the queue in batches so the
//! spill layer keeps its memory bound while a large checkpoint is restored.

use super::{Recoverable, RequestQueue, SimpleQueue, SpillQueue};
use crate::checkpoint::{self, QUEUE_FILE, RecordReader, RecordWriter, StagedFile};
use crate::error::SpiderError;
use crate::request::Request;
use std::path::Path;
use tracing::{info, warn};
use ulid::Ulid;

/// Requests handed to the wrapped queue per `put_many` during recovery.
pub const DEFAULT_RECOVER_BATCH: usize = 1024;

/// Adds stash/recover to any queue.
///
/// `stash` writes the full logical order (for a spill queue that means the
/// in-memory head, every spilled record and the in-memory tail) without touching
/// the queue. `recover` validates the checkpoint header before replacing
/// anything; if a record turns out to be unreadable halfway through, the queue
/// is emptied again and the error returned.
#[derive(Debug)]
pub struct RecoverableQueue<Q> {
    inner: Q,
    batch_size: usize,
}

/// A spill queue whose contents, including what is on disk, can be checkpointed.
pub type RecoverableSpillQueue = RecoverableQueue<SpillQueue<SimpleQueue>>;

impl<Q: Default> Default for RecoverableQueue<Q> {
    fn default() -> Self {
        Self {
            inner: Q::default(),
            batch_size: DEFAULT_RECOVER_BATCH,
        }
    }
}

impl<Q: RequestQueue> RecoverableQueue<Q> {
    pub fn new(inner: Q) -> Self {
        Self {
            inner,
            batch_size: DEFAULT_RECOVER_BATCH,
        }
    }

    /// Sets how many requests are restored at a time. For a spill queue, its
    /// chunk size keeps memory within the spill threshold plus one chunk.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn inner(&self) -> &Q {
        &self.inner
    }

    pub fn into_inner(self) -> Q {
        self.inner
    }

    /// Writes the queue file for `generation` without making it visible yet.
    pub fn stage(&self, dir: &Path, generation: Ulid) -> Result<StagedFile, SpiderError> {
        stage_queue(&self.inner, dir, generation)
    }

    fn restore(&mut self, reader: &mut RecordReader) -> Result<(), SpiderError> {
        while reader.remaining() > 0 {
            let batch = reader.next_batch(self.batch_size)?;
            self.inner.put_many(batch)?;
        }
        Ok(())
    }
}

/// Streams `queue` into a staged queue file.
pub(crate) fn stage_queue<Q: RequestQueue + ?Sized>(
    queue: &Q,
    dir: &Path,
    generation: Ulid,
) -> Result<StagedFile, SpiderError> {
    checkpoint::stage(dir, QUEUE_FILE, generation, queue.len(), |writer| queue.write_records(writer))
}

impl<Q: RequestQueue> RequestQueue for RecoverableQueue<Q> {
    fn put(&mut self, request: Request) -> Result<(), SpiderError> {
        self.inner.put(request)
    }

    fn put_many(&mut self, requests: Vec<Request>) -> Result<(), SpiderError> {
        self.inner.put_many(requests)
    }

    fn get(&mut self) -> Result<Option<Request>, SpiderError> {
        self.inner.get()
    }

    #[inline]
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn snapshot(&self) -> Result<Vec<Request>, SpiderError> {
        self.inner.snapshot()
    }

    fn write_records(&self, writer: &mut RecordWriter) -> Result<(), SpiderError> {
        self.inner.write_records(writer)
    }

    fn clear(&mut self) -> Result<(), SpiderError> {
        self.inner.clear()
    }

    fn describe(&self) -> String {
        format!("recoverable({})", self.inner.describe())
    }
}

impl<Q: RequestQueue> Recoverable for RecoverableQueue<Q> {
    fn stash(&self, dir: &Path) -> Result<(), SpiderError> {
        self.stage(dir, Ulid::new())?.commit()
    }

    fn recover(&mut self, dir: &Path) -> Result<(), SpiderError> {
        let mut reader = RecordReader::open(dir, QUEUE_FILE)?;
        let count = reader.remaining();
        self.inner.clear()?;

        if let Err(e) = self.restore(&mut reader).and_then(|()| reader.finish()) {
            if let Err(clear_err) = self.inner.clear() {
                warn!("Could not empty the queue after a failed recovery: {}", clear_err);
            }
            return Err(e);
        }
        info!("Recovered {} queued requests from {:?}", count, dir);
        Ok(())
    }

    fn can_recover(&self, dir: &Path) -> bool {
        checkpoint::is_present(dir, QUEUE_FILE)
    }
}
