//! A teaching-grade InnoDB-style relational storage engine core:
//! fixed-size pages over table-space files, a buffer pool, B+-tree
//! clustered and secondary indexes, a multi-granularity lock manager,
//! deadlock detection, MVCC via undo-log version chains, a redo log,
//! a binlog, and the two-phase commit protocol binding the two.
//!
//! Library only — no `[[bin]]` targets, no CLI or network surface.
//! A host application is the external collaborator that would wrap
//! [`Engine`] with a parser, query executor, and catalog.

pub mod common;
pub mod error;
pub mod index;
pub mod storage;
pub mod transaction;

pub use error::{EngineError, Result};

use std::path::PathBuf;
use std::sync::Arc;

use transaction::{BinlogManager, LockManager, RedoLog, TransactionManager, UndoLog};

/// Knobs needed to construct an [`Engine`]. The page format itself is
/// not configurable (`common::PAGE_SIZE` is the single source of
/// truth); this only covers what legitimately varies per deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub buffer_pool_frames: usize,
    pub btree_order: usize,
    pub redo_log_path: PathBuf,
    pub binlog_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        EngineConfig {
            redo_log_path: data_dir.join("redo.log"),
            binlog_path: data_dir.join("bin.log"),
            data_dir,
            buffer_pool_frames: 1024,
            btree_order: 128,
        }
    }
}

/// The engine-facing handle: owns the disk manager, buffer pool, and
/// transaction manager (itself composing the lock manager, undo log,
/// redo log and binlog). Index trees are created per table by the
/// caller (the core has no catalog of its own — see §6).
pub struct Engine {
    pub disk: Arc<storage::disk::DiskManager>,
    pub buffer_pool: Arc<storage::buffer::BufferPool>,
    pub transactions: Arc<TransactionManager>,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let disk = Arc::new(storage::disk::DiskManager::new(&config.data_dir));
        let buffer_pool = Arc::new(storage::buffer::BufferPool::new(config.buffer_pool_frames, disk.clone()));

        let lock_manager = Arc::new(LockManager::new());
        let undo_log = Arc::new(UndoLog::new());
        let redo_log = Arc::new(RedoLog::open(&config.redo_log_path)?);
        let binlog = Arc::new(BinlogManager::open(&config.binlog_path)?);
        let transactions = Arc::new(TransactionManager::new(lock_manager, undo_log, redo_log, binlog));

        Ok(Engine { disk, buffer_pool, transactions })
    }
}
