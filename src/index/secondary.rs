//! Secondary-index manager: `(table, index_name) -> BPlusTree<key, pk>`
//! plus the back-table lookup that turns index hits into rows.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use crate::common::RowId;
use crate::error::Result;
use crate::index::btree::BPlusTree;

pub type PrimaryKey = RowId;

/// Owns every secondary index for every table. A secondary tree never
/// stores row bytes — only the primary key, which the caller resolves
/// against the clustered index.
pub struct SecondaryIndexManager<K: Ord + Clone + Debug> {
    indexes: RwLock<HashMap<(String, String), BPlusTree<K, PrimaryKey>>>,
    order: usize,
}

impl<K: Ord + Clone + Debug> SecondaryIndexManager<K> {
    pub fn new(order: usize) -> Self {
        SecondaryIndexManager { indexes: RwLock::new(HashMap::new()), order }
    }

    /// Creates an empty secondary tree for `(table, index_name)` if one
    /// does not already exist.
    pub fn create_index(&self, table: &str, index_name: &str) {
        let key = (table.to_string(), index_name.to_string());
        let mut indexes = self.indexes.write().unwrap();
        indexes.entry(key).or_insert_with(|| BPlusTree::with_order(self.order));
    }

    pub fn insert_entry(&self, table: &str, index_name: &str, key: K, pk: PrimaryKey) -> Result<()> {
        let indexes = self.indexes.read().unwrap();
        match indexes.get(&(table.to_string(), index_name.to_string())) {
            Some(tree) => tree.insert(key, pk),
            None => Ok(()),
        }
    }

    pub fn delete_entry(&self, table: &str, index_name: &str, key: &K) {
        let indexes = self.indexes.read().unwrap();
        if let Some(tree) = indexes.get(&(table.to_string(), index_name.to_string())) {
            tree.delete(key);
        }
    }

    /// Looks up `key` in the named secondary index, then resolves each
    /// hit's primary key against `clustered` to materialize rows.
    pub fn lookup<V: Clone + Debug>(
        &self,
        table: &str,
        index_name: &str,
        key: &K,
        clustered: &BPlusTree<PrimaryKey, V>,
    ) -> Vec<V> {
        let indexes = self.indexes.read().unwrap();
        let Some(tree) = indexes.get(&(table.to_string(), index_name.to_string())) else {
            return Vec::new();
        };
        match tree.search(key) {
            Some(pk) => clustered.search(&pk).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Range lookup against the secondary index followed by the same
    /// back-table resolution as `lookup`.
    pub fn range_lookup<V: Clone + Debug>(
        &self,
        table: &str,
        index_name: &str,
        lo: &K,
        hi: &K,
        clustered: &BPlusTree<PrimaryKey, V>,
    ) -> Result<Vec<V>> {
        let indexes = self.indexes.read().unwrap();
        let Some(tree) = indexes.get(&(table.to_string(), index_name.to_string())) else {
            return Ok(Vec::new());
        };
        let hits = tree.range_search(Some(lo), Some(hi))?;
        Ok(hits.into_iter().filter_map(|(_, pk)| clustered.search(&pk)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::btree::BPlusTree;

    #[test]
    fn lookup_resolves_through_clustered_index() {
        let clustered: BPlusTree<PrimaryKey, String> = BPlusTree::new();
        clustered.insert(1, "alice".to_string()).unwrap();
        clustered.insert(2, "bob".to_string()).unwrap();

        let secondary: SecondaryIndexManager<String> = SecondaryIndexManager::new(8);
        secondary.create_index("users", "by_name");
        secondary.insert_entry("users", "by_name", "alice".to_string(), 1).unwrap();
        secondary.insert_entry("users", "by_name", "bob".to_string(), 2).unwrap();

        let hits = secondary.lookup("users", "by_name", &"bob".to_string(), &clustered);
        assert_eq!(hits, vec!["bob".to_string()]);
    }

    #[test]
    fn lookup_on_unknown_index_is_empty() {
        let clustered: BPlusTree<PrimaryKey, String> = BPlusTree::new();
        let secondary: SecondaryIndexManager<String> = SecondaryIndexManager::new(8);
        let hits = secondary.lookup("users", "missing", &"x".to_string(), &clustered);
        assert!(hits.is_empty());
    }

    #[test]
    fn delete_entry_removes_from_index() {
        let clustered: BPlusTree<PrimaryKey, String> = BPlusTree::new();
        clustered.insert(1, "alice".to_string()).unwrap();

        let secondary: SecondaryIndexManager<String> = SecondaryIndexManager::new(8);
        secondary.create_index("users", "by_name");
        secondary.insert_entry("users", "by_name", "alice".to_string(), 1).unwrap();
        secondary.delete_entry("users", "by_name", &"alice".to_string());

        let hits = secondary.lookup("users", "by_name", &"alice".to_string(), &clustered);
        assert!(hits.is_empty());
    }
}
