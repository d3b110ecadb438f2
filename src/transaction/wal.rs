//! Redo log: a fully synchronous, append-only write-ahead log.
//! Records are buffered in memory and flushed (serialized, fsynced)
//! either when the buffer fills or on an explicit `flush`/`checkpoint`
//! call. Recovery replays records with `lsn > checkpoint_lsn`; replay
//! is made idempotent by the caller's per-page LSN check, not by this
//! module.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::common::{Lsn, PageId, SpaceId, TransactionId};
use crate::error::{EngineError, Result};

const DEFAULT_BUFFER_BOUND: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RedoRecord {
    PageWrite { space_id: SpaceId, page_no: PageId, after_image: Vec<u8> },
    Prepare(TransactionId),
    Commit(TransactionId),
    Abort(TransactionId),
    Checkpoint { flushed_lsn: Lsn },
}

struct Buffered {
    lsn: Lsn,
    record: RedoRecord,
}

pub struct RedoLog {
    file: Mutex<File>,
    next_lsn: AtomicU64,
    flushed_lsn: AtomicU64,
    checkpoint_lsn: AtomicU64,
    buffer: Mutex<Vec<Buffered>>,
    buffer_bound: usize,
}

impl RedoLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_bound(path, DEFAULT_BUFFER_BOUND)
    }

    pub fn open_with_bound(path: impl AsRef<Path>, buffer_bound: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).append(true).create(true).open(path.as_ref())?;
        Ok(RedoLog {
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(1),
            flushed_lsn: AtomicU64::new(0),
            checkpoint_lsn: AtomicU64::new(0),
            buffer: Mutex::new(Vec::new()),
            buffer_bound,
        })
    }

    fn allocate_lsn(&self) -> Lsn {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    fn enqueue(&self, record: RedoRecord) -> Result<Lsn> {
        let lsn = self.allocate_lsn();
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push(Buffered { lsn, record });
        let should_flush = buffer.len() >= self.buffer_bound;
        drop(buffer);
        if should_flush {
            self.flush()?;
        }
        Ok(lsn)
    }

    pub fn log_page_write(&self, space_id: SpaceId, page_no: PageId, after_image: Vec<u8>) -> Result<Lsn> {
        self.enqueue(RedoRecord::PageWrite { space_id, page_no, after_image })
    }

    pub fn log_prepare(&self, txn: TransactionId) -> Result<Lsn> {
        self.enqueue(RedoRecord::Prepare(txn))
    }

    pub fn log_commit(&self, txn: TransactionId) -> Result<Lsn> {
        self.enqueue(RedoRecord::Commit(txn))
    }

    pub fn log_abort(&self, txn: TransactionId) -> Result<Lsn> {
        self.enqueue(RedoRecord::Abort(txn))
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.flushed_lsn.load(Ordering::SeqCst)
    }

    pub fn checkpoint_lsn(&self) -> Lsn {
        self.checkpoint_lsn.load(Ordering::SeqCst)
    }

    /// Serializes every buffered record in order, fsyncs, advances
    /// `flushed_lsn` and empties the buffer.
    pub fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock().unwrap();
        let mut max_lsn = self.flushed_lsn.load(Ordering::SeqCst);
        for entry in buffer.iter() {
            let payload = bincode::serde::encode_to_vec(&(entry.lsn, &entry.record), bincode::config::standard())
                .map_err(|e| EngineError::Serialization(e.to_string()))?;
            let len = payload.len() as u32;
            file.write_all(&len.to_le_bytes())?;
            file.write_all(&payload)?;
            max_lsn = max_lsn.max(entry.lsn);
        }
        file.sync_all()?;
        self.flushed_lsn.store(max_lsn, Ordering::SeqCst);
        buffer.clear();
        Ok(())
    }

    /// Flush, write a checkpoint record, flush again.
    pub fn checkpoint(&self) -> Result<Lsn> {
        self.flush()?;
        let lsn = self.enqueue(RedoRecord::Checkpoint { flushed_lsn: self.flushed_lsn() })?;
        self.flush()?;
        self.checkpoint_lsn.store(lsn, Ordering::SeqCst);
        Ok(lsn)
    }

    /// Scans the file from the start, tracks the latest checkpoint
    /// LSN, and returns every record with `lsn > checkpoint_lsn` for
    /// the caller to replay. A truncated trailing record ends the
    /// scan without error.
    pub fn recover(&self) -> Result<Vec<(Lsn, RedoRecord)>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;

        let mut all = Vec::new();
        let mut checkpoint_lsn = 0u64;
        let mut max_lsn = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(_) => break,
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            if file.read_exact(&mut payload).is_err() {
                break;
            }
            let Ok(((lsn, record), _)) = bincode::serde::decode_from_slice::<(Lsn, RedoRecord), _>(&payload, bincode::config::standard()) else {
                break;
            };

            if let RedoRecord::Checkpoint { flushed_lsn } = &record {
                checkpoint_lsn = checkpoint_lsn.max(*flushed_lsn);
            }
            max_lsn = max_lsn.max(lsn);
            all.push((lsn, record));
        }

        self.next_lsn.store(max_lsn + 1, Ordering::SeqCst);
        self.flushed_lsn.store(max_lsn, Ordering::SeqCst);
        self.checkpoint_lsn.store(checkpoint_lsn, Ordering::SeqCst);

        Ok(all.into_iter().filter(|(lsn, _)| *lsn > checkpoint_lsn).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_advances_flushed_lsn() {
        let dir = tempfile::tempdir().unwrap();
        let log = RedoLog::open(dir.path().join("redo.log")).unwrap();
        log.log_commit(1).unwrap();
        assert_eq!(log.flushed_lsn(), 0);
        log.flush().unwrap();
        assert_eq!(log.flushed_lsn(), 1);
    }

    #[test]
    fn auto_flush_on_buffer_bound() {
        let dir = tempfile::tempdir().unwrap();
        let log = RedoLog::open_with_bound(dir.path().join("redo.log"), 2).unwrap();
        log.log_commit(1).unwrap();
        assert_eq!(log.flushed_lsn(), 0);
        log.log_commit(2).unwrap();
        assert_eq!(log.flushed_lsn(), 2);
    }

    #[test]
    fn recover_returns_records_past_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redo.log");
        {
            let log = RedoLog::open(&path).unwrap();
            log.log_commit(1).unwrap();
            log.checkpoint().unwrap();
            log.log_commit(2).unwrap();
            log.flush().unwrap();
        }

        let reopened = RedoLog::open(&path).unwrap();
        let records = reopened.recover().unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].1, RedoRecord::Commit(2)));
    }

    #[test]
    fn truncated_trailing_record_ends_scan_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redo.log");
        {
            let log = RedoLog::open(&path).unwrap();
            log.log_commit(1).unwrap();
            log.flush().unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[7, 0, 0, 0]).unwrap();
            file.write_all(b"ab").unwrap();
        }

        let reopened = RedoLog::open(&path).unwrap();
        assert!(reopened.recover().is_ok());
    }
}
