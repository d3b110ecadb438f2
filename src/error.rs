use thiserror::Error;

/// Every error kind the storage engine core can produce. Flat and
/// `match`-able rather than nested per subsystem, so a caller can
/// branch on kind without knowing which module raised it.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("page {page_no} not found in space {space_id}")]
    PageNotFound { space_id: crate::common::SpaceId, page_no: crate::common::PageId },

    #[error("page {page_no} in space {space_id} is corrupted")]
    PageCorrupted { space_id: crate::common::SpaceId, page_no: crate::common::PageId },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table-space file is locked by another process")]
    FileLockedByOtherProcess,

    #[error("buffer pool exhausted: no evictable frame available")]
    BufferPoolExhausted,

    #[error("null key in range bound")]
    NullKey,

    #[error("bad range: lo > hi")]
    BadRange,

    #[error("invalid order: keys must be inserted in strictly increasing order")]
    InvalidOrder,

    #[error("lock conflict on resource {resource}")]
    LockConflict { resource: String },

    #[error("lock not held on resource {resource}")]
    LockNotHeld { resource: String },

    #[error("transaction {0} is not active")]
    NotActive(crate::common::TransactionId),

    #[error("transaction {0} is already finalized")]
    AlreadyFinalized(crate::common::TransactionId),

    #[error("redo log unreadable: {0}")]
    RedoUnreadable(String),

    #[error("binlog unreadable: {0}")]
    BinlogUnreadable(String),

    #[error("out of bounds: offset {offset} len {len} exceeds page size")]
    OutOfBounds { offset: usize, len: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<bincode::error::EncodeError> for EngineError {
    fn from(e: bincode::error::EncodeError) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for EngineError {
    fn from(e: bincode::error::DecodeError) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
