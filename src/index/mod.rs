//! Ordered indexing: the concurrent B+-tree and the secondary-index
//! manager built on top of it.

pub mod btree;
pub mod secondary;

pub use btree::{BPlusTree, BTreeStats};
pub use secondary::SecondaryIndexManager;
