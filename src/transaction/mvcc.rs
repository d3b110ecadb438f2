//! MVCC visibility: read-view construction and the five-step
//! visibility predicate row versions are checked against.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::common::TransactionId;

use super::types::{IsolationLevel, ReadView};
use super::undo::{UndoEntry, UndoKind};

/// A row as the clustered index stores it: current value plus the
/// `db_trx_id`/`db_roll_ptr` pair MVCC needs to walk its history.
#[derive(Debug, Clone)]
pub struct VersionedRow {
    pub bytes: Vec<u8>,
    pub db_trx_id: TransactionId,
}

/// Owns read-view allocation. Holds no row data itself; `snapshot_read`
/// is handed the current row plus its undo chain and walks both.
pub struct MVCCManager {
    cached_views: RwLock<std::collections::HashMap<TransactionId, ReadView>>,
}

impl MVCCManager {
    pub fn new() -> Self {
        MVCCManager { cached_views: RwLock::new(std::collections::HashMap::new()) }
    }

    /// Builds a fresh view from the currently active transaction set.
    pub fn build_view(creator_trx: TransactionId, active_txn_ids: &HashSet<TransactionId>, next_txn_id: TransactionId) -> ReadView {
        let m_ids: HashSet<TransactionId> = active_txn_ids.iter().copied().collect();
        let min_trx = m_ids.iter().copied().min().unwrap_or(next_txn_id);
        ReadView { m_ids, min_trx, max_trx: next_txn_id, creator_trx }
    }

    /// Returns the view to use for a snapshot read under `isolation`,
    /// allocating or reusing per the per-level strategy. `RU` and
    /// `Serializable` return `None` (no version bypass).
    pub fn view_for_read(
        &self,
        isolation: IsolationLevel,
        txn: TransactionId,
        active_txn_ids: &HashSet<TransactionId>,
        next_txn_id: TransactionId,
    ) -> Option<ReadView> {
        match isolation {
            IsolationLevel::ReadUncommitted => None,
            IsolationLevel::ReadCommitted => Some(Self::build_view(txn, active_txn_ids, next_txn_id)),
            IsolationLevel::RepeatableRead => {
                if let Some(view) = self.cached_views.read().get(&txn) {
                    return Some(view.clone());
                }
                let view = Self::build_view(txn, active_txn_ids, next_txn_id);
                self.cached_views.write().insert(txn, view.clone());
                Some(view)
            }
            IsolationLevel::Serializable => None,
        }
    }

    pub fn forget(&self, txn: TransactionId) {
        self.cached_views.write().remove(&txn);
    }
}

impl Default for MVCCManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `visible(view, db_trx_id)` per the five-step predicate.
pub fn visible(view: &ReadView, db_trx_id: TransactionId) -> bool {
    if db_trx_id == view.creator_trx {
        return true;
    }
    if db_trx_id < view.min_trx {
        return true;
    }
    if db_trx_id >= view.max_trx {
        return false;
    }
    if view.m_ids.contains(&db_trx_id) {
        return false;
    }
    true
}

/// Snapshot read: if the row's current version is visible, return it;
/// otherwise walk `chain` (newest to oldest, as `UndoLog::version_chain`
/// returns it) reconstructing prior versions until a visible one is
/// found or the chain is exhausted.
pub fn snapshot_read(view: &ReadView, current: &VersionedRow, chain: &[UndoEntry]) -> Option<Vec<u8>> {
    if visible(view, current.db_trx_id) {
        return Some(current.bytes.clone());
    }

    for entry in chain {
        if !visible(view, entry.txn_id) {
            continue;
        }
        match &entry.kind {
            UndoKind::Insert => return None,
            UndoKind::Delete { old_bytes } => return Some(old_bytes.clone()),
            UndoKind::Update { old_bytes, .. } => return Some(old_bytes.clone()),
        }
    }
    None
}
