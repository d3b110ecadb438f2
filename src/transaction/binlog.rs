//! Append-only binary log: one length-prefixed, little-endian-framed
//! record per logical event. Independent of the redo log's own
//! framing, but bound to it by the two-phase commit protocol.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::common::{Lsn, TransactionId};
use crate::error::Result;

/// Event-type tags used by the `event_type` field. The transaction
/// manager stamps `ROW_*` for row-level events and `COMMIT` for the
/// end-of-transaction marker that recovery looks for.
pub const ROW_INSERT: u32 = 1;
pub const ROW_UPDATE: u32 = 2;
pub const ROW_DELETE: u32 = 3;
pub const COMMIT: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogEvent {
    pub txn_id: TransactionId,
    pub event_type: u32,
    pub timestamp: u64,
    pub lsn: Lsn,
    pub name: String,
    pub sql: String,
}

/// `[u32 len][u64 txn_id][u32 event_type][u64 ts][u64 lsn]`
/// `[u32 name_len][name][u32 sql_len][sql]`, all little-endian.
pub struct BinlogManager {
    file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl BinlogManager {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).append(true).create(true).open(path.as_ref())?;
        Ok(BinlogManager { file: Mutex::new(file), next_lsn: AtomicU64::new(1) })
    }

    fn encode(event: &BinlogEvent) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&event.txn_id.to_le_bytes());
        payload.extend_from_slice(&event.event_type.to_le_bytes());
        payload.extend_from_slice(&event.timestamp.to_le_bytes());
        payload.extend_from_slice(&event.lsn.to_le_bytes());
        let name_bytes = event.name.as_bytes();
        payload.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(name_bytes);
        let sql_bytes = event.sql.as_bytes();
        payload.extend_from_slice(&(sql_bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(sql_bytes);

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn decode(payload: &[u8]) -> Option<BinlogEvent> {
        let mut cursor = 0usize;
        let take = |cursor: &mut usize, n: usize| -> Option<&[u8]> {
            let slice = payload.get(*cursor..*cursor + n)?;
            *cursor += n;
            Some(slice)
        };

        let txn_id = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().ok()?);
        let event_type = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().ok()?);
        let timestamp = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().ok()?);
        let lsn = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().ok()?);
        let name_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().ok()?) as usize;
        let name = String::from_utf8(take(&mut cursor, name_len)?.to_vec()).ok()?;
        let sql_len = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().ok()?) as usize;
        let sql = String::from_utf8(take(&mut cursor, sql_len)?.to_vec()).ok()?;

        Some(BinlogEvent { txn_id, event_type, timestamp, lsn, name, sql })
    }

    /// Allocates a monotone LSN, stamps `event.lsn`, and appends.
    /// Does not fsync — call `flush` for durability.
    pub fn append(&self, mut event: BinlogEvent) -> Result<Lsn> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        event.lsn = lsn;
        let frame = Self::encode(&event);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&frame)?;
        Ok(lsn)
    }

    pub fn flush(&self) -> Result<()> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }

    /// Linear scan; a short read at the end (truncated tail) ends the
    /// scan without error.
    pub fn read_all(&self) -> Result<Vec<BinlogEvent>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;

        let mut events = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            if file.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            if file.read_exact(&mut payload).is_err() {
                break;
            }
            match Self::decode(&payload) {
                Some(event) => events.push(event),
                None => break,
            }
        }
        Ok(events)
    }

    pub fn read_by_transaction(&self, txn_id: TransactionId) -> Result<Vec<BinlogEvent>> {
        Ok(self.read_all()?.into_iter().filter(|e| e.txn_id == txn_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(txn_id: TransactionId, name: &str) -> BinlogEvent {
        BinlogEvent { txn_id, event_type: 1, timestamp: 0, lsn: 0, name: name.to_string(), sql: "INSERT ...".to_string() }
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let binlog = BinlogManager::open(dir.path().join("t.log")).unwrap();
        binlog.append(event(1, "orders")).unwrap();
        binlog.append(event(2, "customers")).unwrap();
        binlog.flush().unwrap();

        let events = binlog.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "orders");
        assert_eq!(events[1].txn_id, 2);
        assert!(events[0].lsn < events[1].lsn);
    }

    #[test]
    fn read_by_transaction_filters() {
        let dir = tempfile::tempdir().unwrap();
        let binlog = BinlogManager::open(dir.path().join("t.log")).unwrap();
        binlog.append(event(1, "orders")).unwrap();
        binlog.append(event(2, "customers")).unwrap();
        binlog.append(event(1, "orders")).unwrap();

        let events = binlog.read_by_transaction(1).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn truncated_tail_ends_scan_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let binlog = BinlogManager::open(&path).unwrap();
        binlog.append(event(1, "orders")).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[9, 0, 0, 0]).unwrap();
            file.write_all(b"short").unwrap();
        }

        let events = binlog.read_all().unwrap();
        assert_eq!(events.len(), 1);
    }
}
