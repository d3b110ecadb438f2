//! Shared identifiers used across the storage engine core.
//!
//! Every subsystem (page/table-space, buffer pool, B+-tree, lock
//! manager, transaction manager) addresses the same handful of
//! concepts by these aliases rather than inventing its own integer
//! wrapper types.

/// Fixed page size in bytes. The page format in `storage::page` is
/// not actually configurable; this constant is the single source of
/// truth for it.
pub const PAGE_SIZE: usize = 16_384;

/// Size of the page header, in bytes.
pub const PAGE_HEADER_SIZE: usize = 38;

/// Size of the page trailer, in bytes.
pub const PAGE_TRAILER_SIZE: usize = 8;

/// Size of the user-data region of a page, in bytes.
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - PAGE_TRAILER_SIZE;

/// Page 0 of every table-space is reserved for metadata.
pub const METADATA_PAGE_NO: PageId = 0;

/// Globally increasing transaction identifier.
pub type TransactionId = u64;

/// Page number within a table-space. `0` is reserved for metadata.
pub type PageId = u32;

/// Identifier for a table-space, assigned by the `DiskManager`.
pub type SpaceId = u32;

/// Physical row identifier within a table.
pub type RowId = u64;

/// Arena index into the undo log. `0` is the sentinel for
/// "no older version".
pub type UndoId = u64;

/// Monotone log sequence number, shared by the redo log and binlog.
pub type Lsn = u64;

/// Table name. The catalog that would resolve a name to a schema is
/// an external collaborator; the core only ever needs the name as a
/// resource key.
pub type TableName = String;
