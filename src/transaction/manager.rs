//! Transaction manager: the engine-facing handle that composes the
//! lock manager, undo log, redo log, binlog and MVCC manager into
//! `begin`/`commit`/`abort` and snapshot/current reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{RowId, TableName, TransactionId};
use crate::error::{EngineError, Result};

use super::binlog::{BinlogEvent, BinlogManager};
use super::lock_manager::LockManager;
use super::mvcc::{snapshot_read, MVCCManager, VersionedRow};
use super::two_phase_commit::TwoPhaseCommit;
use super::types::{IsolationLevel, Transaction, TransactionState};
use super::undo::{RowStore, UndoLog};
use super::wal::RedoLog;

/// Coordinates transaction lifecycle. Holds no row data; row storage
/// and its undo entries are driven through the `RowStore` the caller
/// passes to `commit`/`abort`.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    active_txns: RwLock<HashMap<TransactionId, Transaction>>,
    lock_manager: Arc<LockManager>,
    undo_log: Arc<UndoLog>,
    redo_log: Arc<RedoLog>,
    binlog: Arc<BinlogManager>,
    mvcc: MVCCManager,
    default_isolation: IsolationLevel,
    pending_events: Mutex<HashMap<TransactionId, Vec<BinlogEvent>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, undo_log: Arc<UndoLog>, redo_log: Arc<RedoLog>, binlog: Arc<BinlogManager>) -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            active_txns: RwLock::new(HashMap::new()),
            lock_manager,
            undo_log,
            redo_log,
            binlog,
            mvcc: MVCCManager::new(),
            default_isolation: IsolationLevel::RepeatableRead,
            pending_events: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self) -> TransactionId {
        self.begin_with_isolation(self.default_isolation)
    }

    pub fn begin_with_isolation(&self, isolation_level: IsolationLevel) -> TransactionId {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Transaction::new(txn_id, isolation_level);
        self.active_txns.write().insert(txn_id, txn);
        txn_id
    }

    pub fn is_active(&self, txn_id: TransactionId) -> bool {
        self.active_txns.read().get(&txn_id).map(|t| t.state == TransactionState::Active).unwrap_or(false)
    }

    pub fn active_transaction_ids(&self) -> Vec<TransactionId> {
        self.active_txns.read().iter().filter(|(_, t)| t.state == TransactionState::Active).map(|(id, _)| *id).collect()
    }

    fn active_set(&self, exclude: TransactionId) -> std::collections::HashSet<TransactionId> {
        self.active_txns
            .read()
            .iter()
            .filter(|(id, t)| **id != exclude && t.state == TransactionState::Active)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Snapshot read through the five-step visibility predicate,
    /// walking `chain` (newest first) when the current version isn't
    /// visible. `Serializable` and `ReadUncommitted` callers should use
    /// `current_read` instead; this returns the latest bytes unfiltered
    /// for `ReadUncommitted`.
    pub fn snapshot_read(&self, txn_id: TransactionId, current: &VersionedRow, chain: &[super::undo::UndoEntry]) -> Result<Option<Vec<u8>>> {
        let isolation = self.active_txns.read().get(&txn_id).map(|t| t.isolation_level).ok_or(EngineError::NotActive(txn_id))?;

        if isolation == IsolationLevel::ReadUncommitted {
            return Ok(Some(current.bytes.clone()));
        }

        let next = self.next_txn_id.load(Ordering::SeqCst);
        let active = self.active_set(txn_id);
        let view = self.mvcc.view_for_read(isolation, txn_id, &active, next);

        match view {
            Some(view) => Ok(snapshot_read(&view, current, chain)),
            None => Ok(Some(current.bytes.clone())),
        }
    }

    /// Current read: caller is responsible for taking the appropriate
    /// lock before/after calling this; it simply returns the newest
    /// version unfiltered.
    pub fn current_read(&self, current: &VersionedRow) -> Vec<u8> {
        current.bytes.clone()
    }

    /// Stages a binlog event to be flushed at commit time.
    pub fn stage_event(&self, txn_id: TransactionId, event: BinlogEvent) {
        self.pending_events.lock().entry(txn_id).or_default().push(event);
    }

    pub fn log_insert(&self, txn_id: TransactionId, table: &TableName, row: RowId) {
        self.undo_log.log_insert(txn_id, table, row);
    }

    pub fn log_delete(&self, txn_id: TransactionId, table: &TableName, row: RowId, old_bytes: Vec<u8>) {
        self.undo_log.log_delete(txn_id, table, row, old_bytes);
    }

    pub fn log_update(&self, txn_id: TransactionId, table: &TableName, row: RowId, old_bytes: Vec<u8>, new_bytes: Vec<u8>) {
        self.undo_log.log_update(txn_id, table, row, old_bytes, new_bytes);
    }

    /// Marks committed, runs the two-phase commit protocol, releases
    /// locks, removes the transaction from the active set.
    pub fn commit(&self, txn_id: TransactionId) -> Result<()> {
        {
            let mut active = self.active_txns.write();
            let txn = active.get_mut(&txn_id).ok_or(EngineError::NotActive(txn_id))?;
            if txn.state.is_terminal() {
                return Err(EngineError::AlreadyFinalized(txn_id));
            }
        }

        let events = self.pending_events.lock().remove(&txn_id).unwrap_or_default();
        TwoPhaseCommit::commit(&self.redo_log, &self.binlog, txn_id, events)?;

        {
            let mut active = self.active_txns.write();
            if let Some(txn) = active.get_mut(&txn_id) {
                txn.state = TransactionState::Committed;
            }
        }

        self.lock_manager.release_all(txn_id);
        self.mvcc.forget(txn_id);
        self.active_txns.write().remove(&txn_id);
        Ok(())
    }

    /// Rolls back via the undo log, releases locks, removes the
    /// transaction from the active set.
    pub fn abort(&self, txn_id: TransactionId, store: &dyn RowStore) -> Result<()> {
        {
            let mut active = self.active_txns.write();
            let txn = active.get_mut(&txn_id).ok_or(EngineError::NotActive(txn_id))?;
            if txn.state.is_terminal() {
                return Err(EngineError::AlreadyFinalized(txn_id));
            }
        }

        self.undo_log.rollback(txn_id, store)?;
        self.redo_log.log_abort(txn_id)?;

        {
            let mut active = self.active_txns.write();
            if let Some(txn) = active.get_mut(&txn_id) {
                txn.state = TransactionState::Aborted;
            }
        }

        self.lock_manager.release_all(txn_id);
        self.mvcc.forget(txn_id);
        self.pending_events.lock().remove(&txn_id);
        self.active_txns.write().remove(&txn_id);
        Ok(())
    }

    pub fn min_active_txn(&self) -> Option<TransactionId> {
        self.active_txns.read().keys().copied().min()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NoopStore;
    impl RowStore for NoopStore {
        fn reinsert(&self, _table: &str, _row: RowId, _bytes: Vec<u8>) {}
        fn remove(&self, _table: &str, _row: RowId) {}
        fn restore(&self, _table: &str, _row: RowId, _bytes: Vec<u8>) {}
    }

    fn manager(dir: &std::path::Path) -> TransactionManager {
        TransactionManager::new(
            Arc::new(LockManager::new()),
            Arc::new(UndoLog::new()),
            Arc::new(RedoLog::open(dir.join("redo.log")).unwrap()),
            Arc::new(BinlogManager::open(dir.join("bin.log")).unwrap()),
        )
    }

    #[test]
    fn begin_assigns_monotone_ids() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        assert_eq!(tm.begin(), 1);
        assert_eq!(tm.begin(), 2);
    }

    #[test]
    fn commit_removes_from_active_set_and_releases_locks() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        let txn = tm.begin();
        tm.lock_manager().acquire_table(txn, "orders", super::types::LockMode::Exclusive);

        tm.commit(txn).unwrap();
        assert!(!tm.is_active(txn));
        assert_eq!(tm.lock_manager().held_lock_count(txn), 0);
    }

    #[test]
    fn abort_rolls_back_via_undo_log() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        let txn = tm.begin();
        tm.log_insert(txn, &"orders".to_string(), 1);

        let store = NoopStore::default();
        tm.abort(txn, &store).unwrap();
        assert!(!tm.is_active(txn));
    }

    #[test]
    fn commit_on_unknown_txn_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        assert!(matches!(tm.commit(999), Err(EngineError::NotActive(999))));
    }

    #[test]
    fn double_commit_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        let txn = tm.begin();
        tm.commit(txn).unwrap();
        assert!(matches!(tm.commit(txn), Err(EngineError::NotActive(txn_id)) if txn_id == txn));
    }

    #[test]
    fn min_active_txn_tracks_the_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        assert!(tm.min_active_txn().is_none());
        let t1 = tm.begin();
        let _t2 = tm.begin();
        assert_eq!(tm.min_active_txn(), Some(t1));
    }

    #[test]
    fn read_uncommitted_sees_latest_unfiltered() {
        let dir = tempfile::tempdir().unwrap();
        let tm = manager(dir.path());
        let txn = tm.begin_with_isolation(IsolationLevel::ReadUncommitted);
        let current = VersionedRow { bytes: b"v1".to_vec(), db_trx_id: 999 };
        let result = tm.snapshot_read(txn, &current, &[]).unwrap();
        assert_eq!(result, Some(b"v1".to_vec()));
    }
}
