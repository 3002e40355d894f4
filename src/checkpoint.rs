//! # Checkpoint Module
//!
//! On-disk format for stashed queue and in-flight state.
//!
//! ## Overview
//!
//! A checkpoint is a directory holding two files:
//!
//! - **`queue.msgpack`**: the full logical order of a queue, written by
//!   [`RecoverableQueue::stash`](crate::queue::RecoverableQueue).
//! - **`in_flight.msgpack`**: the requests that were dequeued but not finished,
//!   written by [`InFlightSet::stage`](crate::state::InFlightSet::stage).
//!
//! ## Implementation Details
//!
//! Both files are a stream of length-prefixed (`u32` little endian) MessagePack
//! records, the same framing the spill file uses, so spilled records are copied
//! into a checkpoint byte for byte. The first record is a [`CheckpointHeader`]
//! carrying the format version, the number of request records that follow and
//! the generation of the stash that wrote the file. Files written by one stash
//! share a generation; a pair with different generations is a torn checkpoint.
//!
//! Writes go to a temporary sibling ([`StagedFile`]) that is renamed into place
//! on [`StagedFile::commit`]. A stash stages every file before committing any of
//! them, so a failed write leaves the previous checkpoint untouched.
//!
//! Reading distinguishes a missing file (`NotFound`) from one that exists but
//! cannot be decoded, is truncated, or has the wrong version (`CorruptedState`).
//! [`RecordReader`] hands records out in batches, so restoring a checkpoint
//! never needs the whole queue in memory.

use crate::error::SpiderError;
use crate::request::Request;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use ulid::Ulid;

/// File holding the stashed queue contents.
pub const QUEUE_FILE: &str = "queue.msgpack";
/// File holding the stashed in-flight set.
pub const IN_FLIGHT_FILE: &str = "in_flight.msgpack";

/// Bumped whenever the layout of a checkpoint file changes.
pub const CHECKPOINT_VERSION: u32 = 2;

/// First record of every checkpoint file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub version: u32,
    /// Shared by every file written by the same stash.
    pub generation: Ulid,
    /// Number of request records after the header.
    pub count: u64,
}

/// Appends one length-prefixed record to `buf`.
pub(crate) fn encode_record<T: Serialize>(value: &T, buf: &mut Vec<u8>) -> Result<(), SpiderError> {
    let bytes = rmp_serde::to_vec_named(value)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| SpiderError::Serialization(format!("record of {} bytes is too large", bytes.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes);
    Ok(())
}

/// Reads one length-prefixed record. Returns it with the number of bytes consumed.
pub(crate) fn read_record<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<(T, u64), SpiderError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok((rmp_serde::from_slice(&body)?, 4 + len as u64))
}

/// A checkpoint file written under a temporary name.
///
/// Dropping it without calling [`commit`](StagedFile::commit) removes the
/// temporary file and leaves whatever was at the final path alone.
#[must_use = "a staged checkpoint file is discarded unless committed"]
#[derive(Debug)]
pub struct StagedFile {
    tmp_path: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replaces the final file with the staged one.
    pub fn commit(mut self) -> Result<(), SpiderError> {
        fs::rename(&self.tmp_path, &self.path)?;
        self.committed = true;
        trace!("Committed checkpoint file {:?}", self.path);
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not remove staged checkpoint file {:?}: {}", self.tmp_path, e);
            }
        }
    }
}

/// Sink for the request records of a checkpoint file.
pub struct RecordWriter {
    out: BufWriter<File>,
    written: u64,
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn write(&mut self, request: &Request) -> Result<(), SpiderError> {
        self.buf.clear();
        encode_record(request, &mut self.buf)?;
        self.out.write_all(&self.buf)?;
        self.written += 1;
        Ok(())
    }

    /// Copies `len` bytes holding `records` already framed records from `source`.
    pub fn copy_framed<R: Read>(&mut self, source: R, len: u64, records: usize) -> Result<(), SpiderError> {
        let copied = io::copy(&mut source.take(len), &mut self.out)?;
        if copied != len {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("expected {} framed bytes, copied {}", len, copied),
            )
            .into());
        }
        self.written += records as u64;
        Ok(())
    }

    fn write_header(&mut self, header: &CheckpointHeader) -> Result<(), SpiderError> {
        self.buf.clear();
        encode_record(header, &mut self.buf)?;
        self.out.write_all(&self.buf)?;
        Ok(())
    }
}

/// Writes `count` requests produced by `write` into a temporary sibling of
/// `dir/file_name`, stamped with `generation`.
///
/// Nothing is visible at the final path until the returned file is committed.
pub fn stage<F>(dir: &Path, file_name: &str, generation: Ulid, count: usize, write: F) -> Result<StagedFile, SpiderError>
where
    F: FnOnce(&mut RecordWriter) -> Result<(), SpiderError>,
{
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let tmp_path = path.with_extension("tmp");
    let file = File::create(&tmp_path)?;
    let staged = StagedFile {
        tmp_path,
        path,
        committed: false,
    };

    let mut writer = RecordWriter {
        out: BufWriter::new(file),
        written: 0,
        buf: Vec::new(),
    };
    writer.write_header(&CheckpointHeader {
        version: CHECKPOINT_VERSION,
        generation,
        count: count as u64,
    })?;
    write(&mut writer)?;
    if writer.written != count as u64 {
        return Err(SpiderError::GeneralError(format!(
            "checkpoint {:?} announced {} requests but {} were written",
            staged.path, count, writer.written
        )));
    }
    let file = writer.out.into_inner().map_err(|e| SpiderError::from(e.into_error()))?;
    file.sync_all()?;

    debug!("Staged {} requests for {:?} (generation {})", count, staged.path, generation);
    Ok(staged)
}

/// Serializes `requests` into `dir/file_name` under a fresh generation,
/// replacing any previous file atomically.
pub fn save_requests(dir: &Path, file_name: &str, requests: &[Request]) -> Result<(), SpiderError> {
    stage(dir, file_name, Ulid::new(), requests.len(), |writer| {
        requests.iter().try_for_each(|request| writer.write(request))
    })?
    .commit()
}

/// Reads a checkpoint file batch by batch.
pub struct RecordReader {
    reader: BufReader<File>,
    path: PathBuf,
    header: CheckpointHeader,
    remaining: u64,
}

impl RecordReader {
    /// Opens `dir/file_name` and validates its header.
    pub fn open(dir: &Path, file_name: &str) -> Result<Self, SpiderError> {
        let path = dir.join(file_name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SpiderError::NotFound(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let header: CheckpointHeader = match read_record(&mut reader) {
            Ok((header, _)) => header,
            Err(e) => return Err(corrupted(&path, format!("unreadable header: {}", e))),
        };
        if header.version != CHECKPOINT_VERSION {
            return Err(corrupted(
                &path,
                format!(
                    "unsupported checkpoint version {} (expected {})",
                    header.version, CHECKPOINT_VERSION
                ),
            ));
        }
        Ok(Self {
            reader,
            path,
            remaining: header.count,
            header,
        })
    }

    pub fn header(&self) -> &CheckpointHeader {
        &self.header
    }

    pub fn generation(&self) -> Ulid {
        self.header.generation
    }

    /// Requests not read yet.
    pub fn remaining(&self) -> usize {
        self.remaining as usize
    }

    /// Reads up to `max` requests.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<Request>, SpiderError> {
        let count = (max.max(1) as u64).min(self.remaining) as usize;
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            match read_record(&mut self.reader) {
                Ok((request, _)) => requests.push(request),
                Err(e) => {
                    return Err(corrupted(
                        &self.path,
                        format!("{} records missing or unreadable: {}", self.remaining, e),
                    ));
                }
            }
            self.remaining -= 1;
        }
        Ok(requests)
    }

    /// Checks that every announced record was read and nothing follows them.
    pub fn finish(mut self) -> Result<(), SpiderError> {
        if self.remaining > 0 {
            return Err(corrupted(&self.path, format!("{} records were not read", self.remaining)));
        }
        let mut trailing = [0u8; 1];
        match self.reader.read(&mut trailing)? {
            0 => Ok(()),
            _ => Err(corrupted(&self.path, "unexpected data after the last record".to_string())),
        }
    }
}

/// Loads every request stored in `dir/file_name`.
pub fn load_requests(dir: &Path, file_name: &str) -> Result<Vec<Request>, SpiderError> {
    let mut reader = RecordReader::open(dir, file_name)?;
    let requests = reader.next_batch(reader.remaining())?;
    reader.finish()?;
    trace!("Loaded {} requests from {:?}", requests.len(), dir.join(file_name));
    Ok(requests)
}

/// Generation stamp of `dir/file_name`.
pub fn read_generation(dir: &Path, file_name: &str) -> Result<Ulid, SpiderError> {
    RecordReader::open(dir, file_name).map(|reader| reader.generation())
}

/// True when `dir/file_name` exists as a regular file. Never fails.
pub fn is_present(dir: &Path, file_name: &str) -> bool {
    dir.join(file_name).is_file()
}

/// True when any checkpoint file exists in `dir`.
pub fn any_present(dir: &Path) -> bool {
    is_present(dir, QUEUE_FILE) || is_present(dir, IN_FLIGHT_FILE)
}

fn corrupted(path: &Path, reason: String) -> SpiderError {
    SpiderError::CorruptedState {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn requests(count: usize) -> Vec<Request> {
        (0..count).map(|i| Request::new(format!("t{i}"))).collect()
    }

    #[test]
    fn save_then_load_keeps_order_and_identity() {
        let dir = TempDir::new().unwrap();
        let requests = requests(5);

        save_requests(dir.path(), QUEUE_FILE, &requests).unwrap();
        assert!(is_present(dir.path(), QUEUE_FILE));
        assert!(!dir.path().join("queue.tmp").exists());

        let loaded = load_requests(dir.path(), QUEUE_FILE).unwrap();
        assert_eq!(loaded, requests);
    }

    #[test]
    fn reads_in_batches() {
        let dir = TempDir::new().unwrap();
        save_requests(dir.path(), QUEUE_FILE, &requests(7)).unwrap();

        let mut reader = RecordReader::open(dir.path(), QUEUE_FILE).unwrap();
        assert_eq!(reader.remaining(), 7);
        let sizes: Vec<usize> = std::iter::from_fn(|| {
            (reader.remaining() > 0).then(|| reader.next_batch(3).unwrap().len())
        })
        .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        reader.finish().unwrap();
    }

    #[test]
    fn uncommitted_stage_leaves_previous_file() {
        let dir = TempDir::new().unwrap();
        save_requests(dir.path(), QUEUE_FILE, &requests(2)).unwrap();
        let before = read_generation(dir.path(), QUEUE_FILE).unwrap();

        let staged = stage(dir.path(), QUEUE_FILE, Ulid::new(), 0, |_| Ok(())).unwrap();
        assert!(dir.path().join("queue.tmp").exists());
        drop(staged);

        assert!(!dir.path().join("queue.tmp").exists());
        assert_eq!(read_generation(dir.path(), QUEUE_FILE).unwrap(), before);
        assert_eq!(load_requests(dir.path(), QUEUE_FILE).unwrap().len(), 2);
    }

    #[test]
    fn short_write_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = stage(dir.path(), QUEUE_FILE, Ulid::new(), 3, |writer| {
            writer.write(&Request::new("only one"))
        })
        .unwrap_err();
        assert!(matches!(err, SpiderError::GeneralError(_)));
        assert!(!is_present(dir.path(), QUEUE_FILE));
        assert!(!dir.path().join("queue.tmp").exists());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_requests(dir.path(), QUEUE_FILE).unwrap_err();
        assert!(matches!(err, SpiderError::NotFound(_)));

        let err = load_requests(&dir.path().join("nope"), QUEUE_FILE).unwrap_err();
        assert!(matches!(err, SpiderError::NotFound(_)));
        assert!(!any_present(&dir.path().join("nope")));
    }

    #[test]
    fn garbage_is_corrupted_state() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IN_FLIGHT_FILE), b"definitely not msgpack").unwrap();
        let err = load_requests(dir.path(), IN_FLIGHT_FILE).unwrap_err();
        assert!(matches!(err, SpiderError::CorruptedState { .. }));
    }

    #[test]
    fn truncated_file_is_corrupted_state() {
        let dir = TempDir::new().unwrap();
        save_requests(dir.path(), QUEUE_FILE, &requests(4)).unwrap();
        let path = dir.path().join(QUEUE_FILE);
        let len = fs::metadata(&path).unwrap().len();
        fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        let err = load_requests(dir.path(), QUEUE_FILE).unwrap_err();
        assert!(matches!(err, SpiderError::CorruptedState { reason, .. } if reason.contains("missing")));
    }

    #[test]
    fn version_mismatch_is_corrupted_state() {
        let dir = TempDir::new().unwrap();
        let mut bytes = Vec::new();
        let header = CheckpointHeader {
            version: CHECKPOINT_VERSION + 1,
            generation: Ulid::new(),
            count: 0,
        };
        encode_record(&header, &mut bytes).unwrap();
        fs::write(dir.path().join(QUEUE_FILE), bytes).unwrap();

        let err = load_requests(dir.path(), QUEUE_FILE).unwrap_err();
        assert!(matches!(err, SpiderError::CorruptedState { reason, .. } if reason.contains("version")));
    }
}
