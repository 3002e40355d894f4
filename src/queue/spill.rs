//! Spill-to-disk decorator.
//!
//! The logical queue is always `head ++ disk ++ inner`:
//!
//! - `inner` is the wrapped queue and receives every `put`;
//! - `disk` is an append-only spill file holding the oldest overflow from `inner`;
//! - `head` is the chunk most recently reloaded from the spill file.
//!
//! Spilling always takes the oldest requests of `inner` and appends them after
//! everything already on disk, and reloading always reads from the front of the
//! file, so FIFO order holds no matter where a request currently lives.
//!
//! Records are length-prefixed MessagePack, the framing checkpoint files use,
//! so a stash copies the unread part of the spill file without decoding it. The
//! file is created on the first spill and truncated whenever its last record
//! has been read back.
//!
//! Memory holds at most `threshold` requests, or up to two chunks when
//! `chunk_size` is larger than `threshold`: a reloaded chunk alone is then over
//! the threshold, and new requests collect in `inner` until a full chunk can be
//! spilled behind it.

use super::RequestQueue;
use crate::checkpoint::{self, RecordWriter};
use crate::error::SpiderError;
use crate::request::Request;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub struct SpillQueue<Q> {
    inner: Q,
    head: VecDeque<Request>,
    spill: Option<File>,
    spill_dir: Option<PathBuf>,
    read_offset: u64,
    write_offset: u64,
    on_disk: usize,
    threshold: usize,
    chunk_size: usize,
}

impl<Q: RequestQueue> SpillQueue<Q> {
    /// Wraps `inner`, spilling `chunk_size` requests at a time once more than
    /// `threshold` requests are held in memory.
    ///
    /// A `chunk_size` larger than `threshold` is allowed: spills then move more
    /// than strictly necessary, trading memory precision for fewer writes.
    pub fn new(inner: Q, threshold: usize, chunk_size: usize) -> Self {
        Self {
            inner,
            head: VecDeque::new(),
            spill: None,
            spill_dir: None,
            read_offset: 0,
            write_offset: 0,
            on_disk: 0,
            threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Creates the spill file in `dir` instead of the OS temp directory.
    pub fn with_spill_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.spill_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Requests currently materialized in memory.
    pub fn in_memory(&self) -> usize {
        self.head.len() + self.inner.len()
    }

    /// Requests currently stored in the spill file.
    pub fn on_disk(&self) -> usize {
        self.on_disk
    }

    fn spill_overflow(&mut self) -> Result<(), SpiderError> {
        while self.in_memory() > self.threshold && !self.inner.is_empty() {
            if self.head.len() > self.threshold && self.inner.len() < self.chunk_size {
                break;
            }
            self.spill_chunk()?;
        }
        Ok(())
    }

    fn spill_chunk(&mut self) -> Result<(), SpiderError> {
        let count = self.chunk_size.min(self.inner.len());
        let mut chunk = Vec::with_capacity(count);
        for _ in 0..count {
            match self.inner.get()? {
                Some(request) => chunk.push(request),
                None => break,
            }
        }

        if let Err(e) = self.append_to_disk(&chunk) {
            warn!("Spill write failed, keeping {} requests in memory: {}", chunk.len(), e);
            self.restore_chunk(chunk)?;
            return Err(e);
        }

        self.on_disk += chunk.len();
        debug!(
            "Spilled {} requests to disk ({} on disk, {} in memory)",
            chunk.len(),
            self.on_disk,
            self.in_memory()
        );
        Ok(())
    }

    /// Puts a chunk that could not be written back in front of `inner`.
    fn restore_chunk(&mut self, chunk: Vec<Request>) -> Result<(), SpiderError> {
        let mut rest = Vec::with_capacity(self.inner.len());
        while let Some(request) = self.inner.get()? {
            rest.push(request);
        }
        self.inner.put_many(chunk)?;
        self.inner.put_many(rest)
    }

    fn append_to_disk(&mut self, chunk: &[Request]) -> Result<(), SpiderError> {
        let mut buf = Vec::new();
        for request in chunk {
            checkpoint::encode_record(request, &mut buf)?;
        }

        let write_offset = self.write_offset;
        let file = self.spill_file()?;
        file.seek(SeekFrom::Start(write_offset))?;
        if let Err(e) = file.write_all(&buf) {
            // Drop whatever part of the chunk made it out.
            if let Err(truncate_err) = file.set_len(write_offset) {
                warn!("Could not truncate spill file to {} bytes: {}", write_offset, truncate_err);
            }
            return Err(e.into());
        }
        self.write_offset = write_offset + buf.len() as u64;
        Ok(())
    }

    fn spill_file(&mut self) -> Result<&mut File, SpiderError> {
        if self.spill.is_none() {
            let file = match &self.spill_dir {
                Some(dir) => {
                    fs::create_dir_all(dir)?;
                    tempfile::tempfile_in(dir)?
                }
                None => tempfile::tempfile()?,
            };
            trace!("Created spill file (threshold={}, chunk_size={})", self.threshold, self.chunk_size);
            self.spill = Some(file);
        }
        self.spill
            .as_mut()
            .ok_or_else(|| SpiderError::GeneralError("spill file unavailable".into()))
    }

    fn reload_chunk(&mut self) -> Result<(), SpiderError> {
        let count = self.chunk_size.min(self.on_disk);
        let file = self
            .spill
            .as_ref()
            .ok_or_else(|| SpiderError::GeneralError("spill file missing while requests are on disk".into()))?;
        let (requests, next_offset) = read_records(file, self.read_offset, count)?;

        self.read_offset = next_offset;
        self.on_disk -= requests.len();
        self.head.extend(requests);

        if self.on_disk == 0 {
            file.set_len(0)?;
            self.read_offset = 0;
            self.write_offset = 0;
        }
        trace!("Reloaded {} requests from disk ({} left on disk)", count, self.on_disk);
        Ok(())
    }
}

fn read_records(file: &File, offset: u64, count: usize) -> Result<(Vec<Request>, u64), SpiderError> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(offset))?;

    let mut offset = offset;
    let mut requests = Vec::with_capacity(count);
    for _ in 0..count {
        let (request, consumed) = checkpoint::read_record(&mut reader)?;
        requests.push(request);
        offset += consumed;
    }
    Ok((requests, offset))
}

impl<Q: RequestQueue> RequestQueue for SpillQueue<Q> {
    fn put(&mut self, request: Request) -> Result<(), SpiderError> {
        self.inner.put(request)?;
        self.spill_overflow()
    }

    fn put_many(&mut self, requests: Vec<Request>) -> Result<(), SpiderError> {
        self.inner.put_many(requests)?;
        self.spill_overflow()
    }

    fn get(&mut self) -> Result<Option<Request>, SpiderError> {
        if let Some(request) = self.head.pop_front() {
            return Ok(Some(request));
        }
        if self.on_disk > 0 {
            self.reload_chunk()?;
            return Ok(self.head.pop_front());
        }
        self.inner.get()
    }

    #[inline]
    fn len(&self) -> usize {
        self.head.len() + self.on_disk + self.inner.len()
    }

    fn snapshot(&self) -> Result<Vec<Request>, SpiderError> {
        let mut requests: Vec<Request> = self.head.iter().cloned().collect();
        if let (Some(file), true) = (&self.spill, self.on_disk > 0) {
            let (on_disk, _) = read_records(file, self.read_offset, self.on_disk)?;
            requests.extend(on_disk);
        }
        requests.extend(self.inner.snapshot()?);
        Ok(requests)
    }

    fn write_records(&self, writer: &mut RecordWriter) -> Result<(), SpiderError> {
        for request in &self.head {
            writer.write(request)?;
        }
        if let (Some(file), true) = (&self.spill, self.on_disk > 0) {
            let mut source: &File = file;
            source.seek(SeekFrom::Start(self.read_offset))?;
            writer.copy_framed(source, self.write_offset - self.read_offset, self.on_disk)?;
        }
        self.inner.write_records(writer)
    }

    fn clear(&mut self) -> Result<(), SpiderError> {
        self.head.clear();
        self.inner.clear()?;
        if let Some(file) = &self.spill {
            file.set_len(0)?;
        }
        self.read_offset = 0;
        self.write_offset = 0;
        self.on_disk = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("spill({})", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SimpleQueue;
    use crate::queue::test_support::{drain_targets, targets};
    use rand::Rng;
    use tempfile::TempDir;

    fn requests(range: std::ops::Range<usize>) -> Vec<Request> {
        targets(range).into_iter().map(Request::new).collect()
    }

    #[test]
    fn preserves_fifo_across_spills() {
        let mut queue = SpillQueue::new(SimpleQueue::new(), 10, 10);
        for request in requests(0..52) {
            queue.put(request).unwrap();
        }

        assert_eq!(queue.len(), 52);
        assert!(queue.on_disk() > 0);
        assert!(queue.in_memory() <= 10);
        assert_eq!(drain_targets(&mut queue), targets(0..52));
        assert!(queue.is_empty());
        assert_eq!(queue.on_disk(), 0);
    }

    #[test]
    fn len_counts_spilled_requests() {
        let mut queue = SpillQueue::new(SimpleQueue::new(), 3, 2);
        for n in 1..=25 {
            queue.put(Request::new(n.to_string())).unwrap();
            assert_eq!(queue.len(), n);
        }
        queue.get().unwrap();
        assert_eq!(queue.len(), 24);
    }

    #[test]
    fn small_threshold_still_spills_whole_chunks() {
        let mut queue = SpillQueue::new(SimpleQueue::new(), 2, 5);
        queue.put_many(requests(0..3)).unwrap();
        assert_eq!(queue.on_disk(), 3);
        assert_eq!(queue.in_memory(), 0);

        queue.put_many(requests(3..9)).unwrap();
        assert_eq!(queue.len(), 9);
        assert!(queue.in_memory() <= 2);
        assert_eq!(drain_targets(&mut queue), targets(0..9));
    }

    #[test]
    fn interleaved_puts_and_gets_keep_order() {
        let mut queue = SpillQueue::new(SimpleQueue::new(), 4, 3);
        let mut out = Vec::new();
        let mut next = 0;
        for round in 0..20 {
            let batch = (round % 5) + 1;
            queue.put_many(requests(next..next + batch)).unwrap();
            next += batch;
            for _ in 0..(round % 3) {
                if let Some(request) = queue.get().unwrap() {
                    out.push(request.target().to_string());
                }
            }
        }
        out.extend(drain_targets(&mut queue));
        assert_eq!(out, targets(0..next));
    }

    #[test]
    fn randomized_batches_and_thresholds() {
        let mut rng = rand::thread_rng();
        for _ in 0..25 {
            let threshold = rng.gen_range(0..12);
            let chunk_size = rng.gen_range(1..8);
            let mut queue = SpillQueue::new(SimpleQueue::new(), threshold, chunk_size);
            let mut model = VecDeque::new();
            let mut next = 0;

            for _ in 0..40 {
                if rng.gen_bool(0.6) {
                    let batch = rng.gen_range(1..10);
                    queue.put_many(requests(next..next + batch)).unwrap();
                    model.extend(targets(next..next + batch));
                    next += batch;
                } else {
                    let got = queue.get().unwrap().map(|r| r.target().to_string());
                    assert_eq!(got, model.pop_front());
                }
                assert_eq!(queue.len(), model.len());
            }

            assert_eq!(drain_targets(&mut queue), Vec::from(model));
        }
    }

    #[test]
    fn snapshot_includes_disk_without_consuming() {
        let mut queue = SpillQueue::new(SimpleQueue::new(), 4, 4);
        queue.put_many(requests(0..11)).unwrap();
        queue.get().unwrap();
        queue.get().unwrap();

        let snapshot: Vec<String> = queue
            .snapshot()
            .unwrap()
            .iter()
            .map(|r| r.target().to_string())
            .collect();
        assert_eq!(snapshot, targets(2..11));
        assert_eq!(queue.len(), 9);
        assert_eq!(drain_targets(&mut queue), targets(2..11));
    }

    #[test]
    fn clear_resets_disk_state() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpillQueue::new(SimpleQueue::new(), 2, 2).with_spill_dir(dir.path().join("spill"));
        queue.put_many(requests(0..10)).unwrap();
        assert!(queue.on_disk() > 0);

        queue.clear().unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.on_disk(), 0);

        queue.put_many(requests(10..15)).unwrap();
        assert_eq!(drain_targets(&mut queue), targets(10..15));
    }

    #[test]
    fn failed_spill_keeps_requests_in_memory() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("occupied");
        fs::write(&not_a_dir, b"").unwrap();
        let mut queue = SpillQueue::new(SimpleQueue::new(), 2, 2).with_spill_dir(&not_a_dir);

        let mut failures = 0;
        for (n, request) in requests(0..5).into_iter().enumerate() {
            if queue.put(request).is_err() {
                failures += 1;
            }
            assert_eq!(queue.len(), n + 1);
            assert_eq!(queue.on_disk(), 0);
        }
        assert_eq!(failures, 3);
        assert_eq!(queue.in_memory(), 5);
        assert_eq!(drain_targets(&mut queue), targets(0..5));
    }

    #[test]
    fn reloaded_chunk_over_threshold_waits_for_a_full_chunk() {
        let mut queue = SpillQueue::new(SimpleQueue::new(), 2, 5);
        queue.put_many(requests(0..10)).unwrap();
        assert_eq!(queue.on_disk(), 10);

        assert_eq!(queue.get().unwrap().unwrap().target(), "0");
        assert_eq!(queue.on_disk(), 5);

        // Head holds four reloaded requests: single puts must not each hit the disk.
        for request in requests(10..14) {
            queue.put(request).unwrap();
            assert_eq!(queue.on_disk(), 5);
        }
        queue.put(Request::new("14")).unwrap();
        assert_eq!(queue.on_disk(), 10);
        assert_eq!(queue.in_memory(), 4);
        assert_eq!(drain_targets(&mut queue), targets(1..15));
    }

    #[test]
    fn stash_stream_copies_spilled_records() {
        let dir = TempDir::new().unwrap();
        let mut queue = SpillQueue::new(SimpleQueue::new(), 3, 3);
        queue.put_many(requests(0..12)).unwrap();
        queue.get().unwrap();
        assert!(queue.on_disk() > 0);

        checkpoint::stage(dir.path(), checkpoint::QUEUE_FILE, ulid::Ulid::new(), queue.len(), |writer| {
            queue.write_records(writer)
        })
        .unwrap()
        .commit()
        .unwrap();

        let stashed: Vec<String> = checkpoint::load_requests(dir.path(), checkpoint::QUEUE_FILE)
            .unwrap()
            .iter()
            .map(|r| r.target().to_string())
            .collect();
        assert_eq!(stashed, targets(1..12));
        assert_eq!(drain_targets(&mut queue), targets(1..12));
    }

    #[test]
    fn describes_composition() {
        let queue = SpillQueue::new(SimpleQueue::new(), 1, 1);
        assert_eq!(queue.describe(), "spill(simple)");
    }
}
