//! Undo log: per-row version chains addressed by arena index
//! (`undo_id`), never by owning pointers — `prev_undo_id == 0` is the
//! sentinel for "no older version".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::common::{RowId, TableName, TransactionId, UndoId};
use crate::error::Result;

#[derive(Debug, Clone)]
pub enum UndoKind {
    Insert,
    Delete { old_bytes: Vec<u8> },
    Update { old_bytes: Vec<u8>, new_bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub undo_id: UndoId,
    pub txn_id: TransactionId,
    pub table: TableName,
    pub row: RowId,
    pub prev_undo_id: UndoId,
    pub kind: UndoKind,
}

/// Callback surface the undo log drives during `rollback`. A concrete
/// row store (e.g. the clustered `BPlusTree`) implements this.
pub trait RowStore {
    fn reinsert(&self, table: &str, row: RowId, bytes: Vec<u8>);
    fn remove(&self, table: &str, row: RowId);
    fn restore(&self, table: &str, row: RowId, bytes: Vec<u8>);
}

pub struct UndoLog {
    next_id: AtomicU64,
    entries: RwLock<HashMap<UndoId, UndoEntry>>,
    chain_heads: RwLock<HashMap<(TableName, RowId), UndoId>>,
    txn_lists: RwLock<HashMap<TransactionId, Vec<UndoId>>>,
}

impl UndoLog {
    pub fn new() -> Self {
        UndoLog {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
            chain_heads: RwLock::new(HashMap::new()),
            txn_lists: RwLock::new(HashMap::new()),
        }
    }

    fn append(&self, txn: TransactionId, table: &str, row: RowId, kind: UndoKind) -> UndoId {
        let undo_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let chain_key = (table.to_string(), row);

        let mut chain_heads = self.chain_heads.write();
        let prev_undo_id = chain_heads.get(&chain_key).copied().unwrap_or(0);

        let entry = UndoEntry { undo_id, txn_id: txn, table: table.to_string(), row, prev_undo_id, kind };
        self.entries.write().insert(undo_id, entry);
        chain_heads.insert(chain_key, undo_id);
        self.txn_lists.write().entry(txn).or_default().push(undo_id);
        undo_id
    }

    pub fn log_insert(&self, txn: TransactionId, table: &str, row: RowId) -> UndoId {
        self.append(txn, table, row, UndoKind::Insert)
    }

    pub fn log_delete(&self, txn: TransactionId, table: &str, row: RowId, old_bytes: Vec<u8>) -> UndoId {
        self.append(txn, table, row, UndoKind::Delete { old_bytes })
    }

    pub fn log_update(&self, txn: TransactionId, table: &str, row: RowId, old_bytes: Vec<u8>, new_bytes: Vec<u8>) -> UndoId {
        self.append(txn, table, row, UndoKind::Update { old_bytes, new_bytes })
    }

    /// Applies the inverse of every record in `txn`'s undo list, in
    /// reverse order. Each step's outcome is independent; a fatal
    /// error from `store` aborts the remaining steps.
    pub fn rollback(&self, txn: TransactionId, store: &dyn RowStore) -> Result<()> {
        let ids = self.txn_lists.read().get(&txn).cloned().unwrap_or_default();
        let entries = self.entries.read();

        for undo_id in ids.into_iter().rev() {
            let Some(entry) = entries.get(&undo_id) else { continue };
            match &entry.kind {
                UndoKind::Insert => store.remove(&entry.table, entry.row),
                UndoKind::Delete { old_bytes } => store.reinsert(&entry.table, entry.row, old_bytes.clone()),
                UndoKind::Update { old_bytes, .. } => store.restore(&entry.table, entry.row, old_bytes.clone()),
            }
        }
        Ok(())
    }

    /// Drops `txn`'s undo records. Callers MUST only invoke this once
    /// no active read-view can reach them (`txn_id < min(active) ∪
    /// {next_txn_id}`).
    pub fn purge(&self, txn: TransactionId) {
        let ids = self.txn_lists.write().remove(&txn).unwrap_or_default();
        let mut entries = self.entries.write();
        for id in ids {
            entries.remove(&id);
        }
    }

    /// Walks the chain for `(table, row)` from newest to oldest.
    pub fn version_chain(&self, table: &str, row: RowId) -> Vec<UndoEntry> {
        let chain_heads = self.chain_heads.read();
        let entries = self.entries.read();
        let mut out = Vec::new();

        let mut cursor = chain_heads.get(&(table.to_string(), row)).copied().unwrap_or(0);
        while cursor != 0 {
            let Some(entry) = entries.get(&cursor) else { break };
            out.push(entry.clone());
            cursor = entry.prev_undo_id;
        }
        out
    }
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        log: Mutex<Vec<String>>,
    }

    impl RowStore for FakeStore {
        fn reinsert(&self, table: &str, row: RowId, _bytes: Vec<u8>) {
            self.log.lock().unwrap().push(format!("reinsert {table}:{row}"));
        }
        fn remove(&self, table: &str, row: RowId) {
            self.log.lock().unwrap().push(format!("remove {table}:{row}"));
        }
        fn restore(&self, table: &str, row: RowId, _bytes: Vec<u8>) {
            self.log.lock().unwrap().push(format!("restore {table}:{row}"));
        }
    }

    #[test]
    fn version_chain_walks_newest_to_oldest() {
        let log = UndoLog::new();
        log.log_insert(1, "orders", 1);
        log.log_update(1, "orders", 1, b"v1".to_vec(), b"v2".to_vec());
        log.log_update(1, "orders", 1, b"v2".to_vec(), b"v3".to_vec());

        let chain = log.version_chain("orders", 1);
        assert_eq!(chain.len(), 3);
        assert!(matches!(chain[0].kind, UndoKind::Update { .. }));
        assert!(matches!(chain[2].kind, UndoKind::Insert));
    }

    #[test]
    fn rollback_applies_inverses_in_reverse() {
        let log = UndoLog::new();
        log.log_insert(1, "orders", 1);
        log.log_update(1, "orders", 1, b"v1".to_vec(), b"v2".to_vec());

        let store = FakeStore::default();
        log.rollback(1, &store).unwrap();

        let events = store.log.lock().unwrap().clone();
        assert_eq!(events, vec!["restore orders:1".to_string(), "remove orders:1".to_string()]);
    }

    #[test]
    fn purge_drops_txn_records() {
        let log = UndoLog::new();
        log.log_insert(1, "orders", 1);
        log.purge(1);
        assert!(log.version_chain("orders", 1).is_empty());
    }
}
