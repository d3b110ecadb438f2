//! Transaction subsystem: lock manager, deadlock detector, undo log,
//! redo log, binlog, MVCC, and the two-phase commit protocol binding
//! redo to binlog. [`manager::TransactionManager`] is the engine-facing
//! handle that composes all of these.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`types`] | `Transaction`, `IsolationLevel`, `LockMode`, `ReadView` |
//! | [`lock_manager`] | Non-blocking multi-granularity lock acquisition |
//! | [`deadlock`] | Wait-for graph cycle detection and victim selection |
//! | [`undo`] | Per-row version chains for rollback and MVCC |
//! | [`wal`] | Synchronous redo log |
//! | [`binlog`] | Append-only logical event log |
//! | [`mvcc`] | Read-view construction and the visibility predicate |
//! | [`two_phase_commit`] | Binds redo prepare/commit to binlog durability |
//! | [`manager`] | Transaction lifecycle: begin/commit/abort |

pub mod binlog;
pub mod deadlock;
pub mod lock_manager;
pub mod manager;
pub mod mvcc;
pub mod two_phase_commit;
pub mod types;
pub mod undo;
pub mod wal;

pub use binlog::{BinlogEvent, BinlogManager};
pub use deadlock::{DeadlockDetector, DeadlockStats};
pub use lock_manager::{LockManager, LockOutcome, LockStatistics};
pub use manager::TransactionManager;
pub use mvcc::{visible, MVCCManager, VersionedRow};
pub use two_phase_commit::{CommitDisposition, TwoPhaseCommit};
pub use types::{IsolationLevel, LockMode, LogSequenceNumber, ReadView, Transaction, TransactionState, TxnLockProfile};
pub use undo::{RowStore, UndoEntry, UndoKind, UndoLog};
pub use wal::{RedoLog, RedoRecord};

pub use crate::common::{TransactionId, UndoId};
