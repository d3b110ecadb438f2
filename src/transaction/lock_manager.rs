//! Non-blocking multi-granularity lock manager: `IS`/`IX`/`S`/`X` on
//! tables, `Record-S`/`Record-X` on rows, `Gap` on key intervals, and
//! `Next-Key` as the `Record-X` + `Gap` pair. Every acquire call
//! returns immediately with `Acquired` or `Conflict` — the caller
//! decides whether to retry, abort, or feed the wait edge to the
//! deadlock detector.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::{RowId, TransactionId};

use super::types::LockMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Conflict,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Resource {
    Table(String),
    Record(String, RowId),
    Gap(String, GapKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GapKey(i64, i64);

struct Inner {
    table_locks: HashMap<String, Vec<(TransactionId, LockMode)>>,
    record_locks: HashMap<(String, RowId), Vec<(TransactionId, LockMode)>>,
    gap_locks: HashMap<(String, GapKey), Vec<TransactionId>>,
    held_by_txn: HashMap<TransactionId, Vec<Resource>>,
}

pub struct LockManager {
    inner: Mutex<Inner>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            inner: Mutex::new(Inner {
                table_locks: HashMap::new(),
                record_locks: HashMap::new(),
                gap_locks: HashMap::new(),
                held_by_txn: HashMap::new(),
            }),
        }
    }

    /// `IS` or `IX` on `table`. Idempotent: a no-op if already held.
    pub fn acquire_table_intention(&self, txn: TransactionId, table: &str, mode: LockMode) -> LockOutcome {
        debug_assert!(matches!(mode, LockMode::IntentShared | LockMode::IntentExclusive));
        self.acquire_table_lock(txn, table, mode)
    }

    /// `S` or `X` on `table`, checked against every non-self holder.
    pub fn acquire_table(&self, txn: TransactionId, table: &str, mode: LockMode) -> LockOutcome {
        debug_assert!(matches!(mode, LockMode::Shared | LockMode::Exclusive));
        self.acquire_table_lock(txn, table, mode)
    }

    fn acquire_table_lock(&self, txn: TransactionId, table: &str, mode: LockMode) -> LockOutcome {
        let mut inner = self.inner.lock();
        let holders = inner.table_locks.entry(table.to_string()).or_default();

        if holders.iter().any(|(id, held)| *id == txn && *held == mode) {
            return LockOutcome::Acquired;
        }

        let conflict = holders.iter().any(|(id, held)| *id != txn && !mode.table_compatible(held) && !held.table_compatible(&mode));
        if conflict {
            return LockOutcome::Conflict;
        }

        holders.push((txn, mode));
        inner.held_by_txn.entry(txn).or_default().push(Resource::Table(table.to_string()));
        LockOutcome::Acquired
    }

    /// `Record-S`/`Record-X` on `(table, row_id)`. First takes the
    /// matching table intention lock.
    pub fn acquire_record(&self, txn: TransactionId, table: &str, row_id: RowId, mode: LockMode) -> LockOutcome {
        debug_assert!(matches!(mode, LockMode::RecordShared | LockMode::RecordExclusive));
        let intention = if mode == LockMode::RecordShared { LockMode::IntentShared } else { LockMode::IntentExclusive };
        if self.acquire_table_intention(txn, table, intention) == LockOutcome::Conflict {
            return LockOutcome::Conflict;
        }

        let mut inner = self.inner.lock();
        let key = (table.to_string(), row_id);
        let holders = inner.record_locks.entry(key.clone()).or_default();

        if holders.iter().any(|(id, held)| *id == txn && *held == mode) {
            return LockOutcome::Acquired;
        }

        let conflict = holders.iter().any(|(id, held)| {
            *id != txn && !(mode == LockMode::RecordShared && *held == LockMode::RecordShared)
        });
        if conflict {
            return LockOutcome::Conflict;
        }

        holders.push((txn, mode));
        inner.held_by_txn.entry(txn).or_default().push(Resource::Record(table.to_string(), row_id));
        LockOutcome::Acquired
    }

    /// `Gap` on `(lo, hi)`. First takes `IX`; gap locks on the same
    /// interval are always mutually compatible.
    pub fn acquire_gap(&self, txn: TransactionId, table: &str, lo: i64, hi: i64) -> LockOutcome {
        if self.acquire_table_intention(txn, table, LockMode::IntentExclusive) == LockOutcome::Conflict {
            return LockOutcome::Conflict;
        }

        let mut inner = self.inner.lock();
        let key = (table.to_string(), GapKey(lo, hi));
        let holders = inner.gap_locks.entry(key.clone()).or_default();
        if !holders.contains(&txn) {
            holders.push(txn);
            inner.held_by_txn.entry(txn).or_default().push(Resource::Gap(table.to_string(), GapKey(lo, hi)));
        }
        LockOutcome::Acquired
    }

    /// `Record-X` on `row_id` plus `Gap` on `(lo, hi)`.
    pub fn acquire_next_key(&self, txn: TransactionId, table: &str, row_id: RowId, lo: i64, hi: i64) -> LockOutcome {
        if self.acquire_record(txn, table, row_id, LockMode::RecordExclusive) == LockOutcome::Conflict {
            return LockOutcome::Conflict;
        }
        self.acquire_gap(txn, table, lo, hi)
    }

    /// Releases every lock held by `txn` and compacts empty resource
    /// lists.
    pub fn release_all(&self, txn: TransactionId) {
        let mut inner = self.inner.lock();
        let Some(resources) = inner.held_by_txn.remove(&txn) else { return };

        for resource in resources {
            match resource {
                Resource::Table(table) => {
                    if let Some(holders) = inner.table_locks.get_mut(&table) {
                        holders.retain(|(id, _)| *id != txn);
                        if holders.is_empty() {
                            inner.table_locks.remove(&table);
                        }
                    }
                }
                Resource::Record(table, row_id) => {
                    let key = (table, row_id);
                    if let Some(holders) = inner.record_locks.get_mut(&key) {
                        holders.retain(|(id, _)| *id != txn);
                        if holders.is_empty() {
                            inner.record_locks.remove(&key);
                        }
                    }
                }
                Resource::Gap(table, gap) => {
                    let key = (table, gap);
                    if let Some(holders) = inner.gap_locks.get_mut(&key) {
                        holders.retain(|id| *id != txn);
                        if holders.is_empty() {
                            inner.gap_locks.remove(&key);
                        }
                    }
                }
            }
        }
    }

    pub fn held_lock_count(&self, txn: TransactionId) -> usize {
        self.inner.lock().held_by_txn.get(&txn).map(Vec::len).unwrap_or(0)
    }

    pub fn table_holders(&self, table: &str) -> Vec<(TransactionId, LockMode)> {
        self.inner.lock().table_locks.get(table).cloned().unwrap_or_default()
    }

    /// Typed snapshot of current lock-table occupancy.
    pub fn statistics(&self) -> LockStatistics {
        let inner = self.inner.lock();
        LockStatistics {
            table_locks_held: inner.table_locks.values().map(Vec::len).sum(),
            record_locks_held: inner.record_locks.values().map(Vec::len).sum(),
            gap_locks_held: inner.gap_locks.values().map(Vec::len).sum(),
            transactions_holding_locks: inner.held_by_txn.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatistics {
    pub table_locks_held: usize,
    pub record_locks_held: usize,
    pub gap_locks_held: usize,
    pub transactions_holding_locks: usize,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intention_locks_are_compatible() {
        let lm = LockManager::new();
        assert_eq!(lm.acquire_table_intention(1, "orders", LockMode::IntentShared), LockOutcome::Acquired);
        assert_eq!(lm.acquire_table_intention(2, "orders", LockMode::IntentExclusive), LockOutcome::Acquired);
    }

    #[test]
    fn exclusive_table_lock_conflicts_with_everything() {
        let lm = LockManager::new();
        assert_eq!(lm.acquire_table(1, "orders", LockMode::Exclusive), LockOutcome::Acquired);
        assert_eq!(lm.acquire_table_intention(2, "orders", LockMode::IntentShared), LockOutcome::Conflict);
    }

    #[test]
    fn two_record_shared_locks_are_compatible() {
        let lm = LockManager::new();
        assert_eq!(lm.acquire_record(1, "orders", 10, LockMode::RecordShared), LockOutcome::Acquired);
        assert_eq!(lm.acquire_record(2, "orders", 10, LockMode::RecordShared), LockOutcome::Acquired);
    }

    #[test]
    fn record_exclusive_conflicts_with_shared() {
        let lm = LockManager::new();
        assert_eq!(lm.acquire_record(1, "orders", 10, LockMode::RecordShared), LockOutcome::Acquired);
        assert_eq!(lm.acquire_record(2, "orders", 10, LockMode::RecordExclusive), LockOutcome::Conflict);
    }

    #[test]
    fn gap_locks_on_same_interval_always_compatible() {
        let lm = LockManager::new();
        assert_eq!(lm.acquire_gap(1, "orders", 10, 20), LockOutcome::Acquired);
        assert_eq!(lm.acquire_gap(2, "orders", 10, 20), LockOutcome::Acquired);
    }

    #[test]
    fn release_all_frees_every_resource() {
        let lm = LockManager::new();
        lm.acquire_table(1, "orders", LockMode::Shared);
        lm.acquire_record(1, "orders", 1, LockMode::RecordShared);
        lm.acquire_gap(1, "orders", 0, 10);
        assert!(lm.held_lock_count(1) > 0);

        lm.release_all(1);
        assert_eq!(lm.held_lock_count(1), 0);
        assert_eq!(lm.acquire_table(2, "orders", LockMode::Exclusive), LockOutcome::Acquired);
    }

    #[test]
    fn next_key_acquires_record_and_gap() {
        let lm = LockManager::new();
        assert_eq!(lm.acquire_next_key(1, "orders", 5, 0, 10), LockOutcome::Acquired);
        assert_eq!(lm.acquire_record(2, "orders", 5, LockMode::RecordShared), LockOutcome::Conflict);
        assert_eq!(lm.acquire_gap(2, "orders", 0, 10), LockOutcome::Acquired);
    }
}
