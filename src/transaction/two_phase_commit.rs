//! Single-node two-phase commit: binds the redo log's prepare/commit
//! records to the binlog's durability point. The binlog must land on
//! stable storage between the redo `prepare` and the redo `commit` —
//! that ordering is the entire contract.

use crate::common::TransactionId;
use crate::error::Result;

use super::binlog::{BinlogEvent, BinlogManager, COMMIT, ROW_INSERT};
use super::wal::{RedoLog, RedoRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDisposition {
    Committed,
    RolledBack,
    NeverCommitted,
}

/// Runs the protocol against a caller-supplied redo log and binlog.
/// Holds no state of its own; every call is a self-contained
/// prepare/flush/commit sequence.
pub struct TwoPhaseCommit;

impl TwoPhaseCommit {
    /// 1. redo `prepare(T)`, flush redo.
    /// 2. write and flush every event in `events` to the binlog.
    /// 3. redo `commit(T)`, flush redo.
    pub fn commit(redo: &RedoLog, binlog: &BinlogManager, txn: TransactionId, events: Vec<BinlogEvent>) -> Result<()> {
        redo.log_prepare(txn)?;
        redo.flush()?;

        for event in events {
            binlog.append(event)?;
        }
        binlog.flush()?;

        redo.log_commit(txn)?;
        redo.flush()?;
        Ok(())
    }

    /// Determines `txn`'s disposition from recovered redo records plus
    /// the binlog, per the recovery rules: redo `commit` is
    /// authoritative; a redo `prepare` with no `commit` falls back to
    /// checking the binlog for a commit event; neither means the
    /// transaction never committed.
    pub fn recovery_disposition(recovered: &[(crate::common::Lsn, RedoRecord)], binlog: &BinlogManager, txn: TransactionId) -> Result<CommitDisposition> {
        let mut prepared = false;
        let mut committed = false;

        for (_, record) in recovered {
            match record {
                RedoRecord::Prepare(t) if *t == txn => prepared = true,
                RedoRecord::Commit(t) if *t == txn => committed = true,
                _ => {}
            }
        }

        if committed {
            return Ok(CommitDisposition::Committed);
        }
        if prepared {
            let has_binlog_commit = binlog.read_by_transaction(txn)?.iter().any(|e| e.event_type == COMMIT);
            if has_binlog_commit {
                return Ok(CommitDisposition::Committed);
            }
            return Ok(CommitDisposition::RolledBack);
        }
        Ok(CommitDisposition::NeverCommitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(txn_id: TransactionId, event_type: u32) -> BinlogEvent {
        BinlogEvent { txn_id, event_type, timestamp: 0, lsn: 0, name: "orders".to_string(), sql: "INSERT ...".to_string() }
    }

    #[test]
    fn commit_writes_prepare_then_binlog_then_commit() {
        let dir = tempfile::tempdir().unwrap();
        let redo = RedoLog::open(dir.path().join("redo.log")).unwrap();
        let binlog = BinlogManager::open(dir.path().join("bin.log")).unwrap();

        TwoPhaseCommit::commit(&redo, &binlog, 1, vec![event(1, ROW_INSERT)]).unwrap();

        let recovered = redo.recover().unwrap();
        let has_prepare = recovered.iter().any(|(_, r)| matches!(r, RedoRecord::Prepare(1)));
        let has_commit = recovered.iter().any(|(_, r)| matches!(r, RedoRecord::Commit(1)));
        assert!(has_prepare);
        assert!(has_commit);
        assert_eq!(binlog.read_by_transaction(1).unwrap().len(), 1);
    }

    #[test]
    fn recovery_disposition_committed_when_redo_shows_commit() {
        let dir = tempfile::tempdir().unwrap();
        let redo = RedoLog::open(dir.path().join("redo.log")).unwrap();
        let binlog = BinlogManager::open(dir.path().join("bin.log")).unwrap();
        TwoPhaseCommit::commit(&redo, &binlog, 1, vec![]).unwrap();

        let recovered = redo.recover().unwrap();
        let disposition = TwoPhaseCommit::recovery_disposition(&recovered, &binlog, 1).unwrap();
        assert_eq!(disposition, CommitDisposition::Committed);
    }

    #[test]
    fn recovery_disposition_falls_back_to_binlog_commit_event() {
        let dir = tempfile::tempdir().unwrap();
        let redo = RedoLog::open(dir.path().join("redo.log")).unwrap();
        let binlog = BinlogManager::open(dir.path().join("bin.log")).unwrap();

        redo.log_prepare(1).unwrap();
        binlog.append(event(1, COMMIT)).unwrap();
        binlog.flush().unwrap();
        redo.flush().unwrap();

        let recovered = redo.recover().unwrap();
        let disposition = TwoPhaseCommit::recovery_disposition(&recovered, &binlog, 1).unwrap();
        assert_eq!(disposition, CommitDisposition::Committed);
    }

    #[test]
    fn recovery_disposition_rolls_back_when_prepared_but_no_binlog_commit() {
        let dir = tempfile::tempdir().unwrap();
        let redo = RedoLog::open(dir.path().join("redo.log")).unwrap();
        let binlog = BinlogManager::open(dir.path().join("bin.log")).unwrap();

        redo.log_prepare(1).unwrap();
        redo.flush().unwrap();

        let recovered = redo.recover().unwrap();
        let disposition = TwoPhaseCommit::recovery_disposition(&recovered, &binlog, 1).unwrap();
        assert_eq!(disposition, CommitDisposition::RolledBack);
    }

    #[test]
    fn recovery_disposition_never_committed_when_redo_shows_neither() {
        let dir = tempfile::tempdir().unwrap();
        let redo = RedoLog::open(dir.path().join("redo.log")).unwrap();
        let binlog = BinlogManager::open(dir.path().join("bin.log")).unwrap();

        let recovered = redo.recover().unwrap();
        let disposition = TwoPhaseCommit::recovery_disposition(&recovered, &binlog, 1).unwrap();
        assert_eq!(disposition, CommitDisposition::NeverCommitted);
    }
}
