//! Core transaction types: isolation levels, lock modes, transaction
//! state and the read-view used for MVCC snapshot reads.

use std::collections::HashSet;
use std::time::Instant;

use crate::common::{Lsn, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::RepeatableRead
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

/// Lock modes for the multi-granularity scheme. `NextKey` is not a
/// stored mode — it is `RecordExclusive` plus a `Gap`, acquired as a
/// pair by `LockManager::acquire_next_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentShared,
    IntentExclusive,
    Shared,
    Exclusive,
    RecordShared,
    RecordExclusive,
    Gap,
}

impl LockMode {
    /// Compatibility for the table-level matrix (`IS`/`IX`/`S`/`X`
    /// against each other). Record and gap locks use their own rules
    /// in the lock manager, not this matrix.
    pub fn table_compatible(&self, other: &LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, other),
            (IntentShared, IntentShared)
                | (IntentShared, IntentExclusive)
                | (IntentShared, Shared)
                | (IntentExclusive, IntentShared)
                | (IntentExclusive, IntentExclusive)
                | (Shared, IntentShared)
                | (Shared, Shared)
        )
    }
}

/// A live transaction's bookkeeping. `read_view` is populated lazily
/// per the isolation level's allocation strategy (see `mvcc`).
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub isolation_level: IsolationLevel,
    pub state: TransactionState,
    pub start_time: Instant,
    pub undo_ids: Vec<crate::common::UndoId>,
}

impl Transaction {
    pub fn new(id: TransactionId, isolation_level: IsolationLevel) -> Self {
        Transaction {
            id,
            isolation_level,
            state: TransactionState::Active,
            start_time: Instant::now(),
            undo_ids: Vec::new(),
        }
    }

    pub fn seconds_running(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Snapshot used for consistent reads: a row version created by a
/// transaction in `m_ids`, or by `creator_trx` itself, has special
/// visibility rules; see `mvcc::visible`.
#[derive(Debug, Clone)]
pub struct ReadView {
    pub m_ids: HashSet<TransactionId>,
    pub min_trx: TransactionId,
    pub max_trx: TransactionId,
    pub creator_trx: TransactionId,
}

/// Per-transaction metadata the deadlock detector's victim-scoring
/// formula needs; supplied by the caller (the lock manager or
/// transaction manager), not tracked by the detector itself.
#[derive(Debug, Clone, Copy)]
pub struct TxnLockProfile {
    pub held_lock_count: u32,
    pub seconds_running: u64,
    pub priority: u32,
}

pub type LogSequenceNumber = Lsn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_compatibility_matrix() {
        use LockMode::*;
        assert!(IntentShared.table_compatible(&IntentShared));
        assert!(IntentShared.table_compatible(&IntentExclusive));
        assert!(IntentShared.table_compatible(&Shared));
        assert!(!IntentShared.table_compatible(&Exclusive));
        assert!(IntentExclusive.table_compatible(&IntentShared));
        assert!(IntentExclusive.table_compatible(&IntentExclusive));
        assert!(!IntentExclusive.table_compatible(&Shared));
        assert!(!IntentExclusive.table_compatible(&Exclusive));
        assert!(Shared.table_compatible(&IntentShared));
        assert!(Shared.table_compatible(&Shared));
        assert!(!Shared.table_compatible(&IntentExclusive));
        assert!(!Exclusive.table_compatible(&IntentShared));
        assert!(!Exclusive.table_compatible(&Exclusive));
    }

    #[test]
    fn transaction_state_terminal() {
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(!TransactionState::Active.is_terminal());
    }
}
