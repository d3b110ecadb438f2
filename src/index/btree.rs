//! Concurrent B+-tree with latch crabbing, doubly-linked leaves and
//! right-biased splits.

use std::cmp::Ordering as CmpOrdering;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};

const DEFAULT_ORDER: usize = 128;

type NodeRef<K, V> = Arc<RwLock<Node<K, V>>>;

#[derive(Debug)]
struct Node<K: Ord + Clone + Debug, V: Clone + Debug> {
    keys: Vec<K>,
    is_leaf: bool,
    entries: Vec<(K, V)>,
    children: Vec<NodeRef<K, V>>,
    prev_leaf: Option<NodeRef<K, V>>,
    next_leaf: Option<NodeRef<K, V>>,
}

impl<K: Ord + Clone + Debug, V: Clone + Debug> Node<K, V> {
    fn new_leaf(order: usize) -> Self {
        Node {
            keys: Vec::with_capacity(order),
            is_leaf: true,
            entries: Vec::with_capacity(order),
            children: Vec::new(),
            prev_leaf: None,
            next_leaf: None,
        }
    }

    fn new_internal(order: usize) -> Self {
        Node {
            keys: Vec::with_capacity(order),
            is_leaf: false,
            entries: Vec::new(),
            children: Vec::with_capacity(order + 1),
            prev_leaf: None,
            next_leaf: None,
        }
    }

    /// Smallest index `i` such that `key < keys[i]`; equivalently,
    /// walk right while `key >= keys[i]`.
    fn find_child_index(&self, key: &K) -> usize {
        for (i, k) in self.keys.iter().enumerate() {
            if key < k {
                return i;
            }
        }
        self.keys.len()
    }

    fn insert_in_leaf(&mut self, key: K, value: V) {
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(pos) => {
                self.entries[pos].1 = value;
            }
            Err(pos) => {
                self.entries.insert(pos, (key.clone(), value));
                self.keys.insert(pos, key);
            }
        }
    }

    fn insert_in_internal(&mut self, key: K, child: NodeRef<K, V>, child_idx: usize) {
        self.keys.insert(child_idx, key);
        self.children.insert(child_idx + 1, child);
    }

    /// Right node gets the upper half; the caller rewires sibling
    /// pointers and promotes `new_leaf.keys[0]` to the parent.
    fn split_leaf(&mut self, order: usize) -> (K, Node<K, V>) {
        let split_point = order / 2;
        let mut new_leaf = Node::new_leaf(order);
        new_leaf.entries = self.entries.split_off(split_point);
        new_leaf.keys = self.keys.split_off(split_point);
        new_leaf.next_leaf = self.next_leaf.take();
        let split_key = new_leaf.keys[0].clone();
        (split_key, new_leaf)
    }

    /// Median key is removed from the left and promoted; right gets
    /// strictly-greater keys and children.
    fn split_internal(&mut self, order: usize) -> (K, Node<K, V>) {
        let split_point = order / 2;
        let mut new_node = Node::new_internal(order);
        new_node.children = self.children.split_off(split_point + 1);
        let median_key = self.keys.remove(split_point);
        new_node.keys = self.keys.split_off(split_point);
        (median_key, new_node)
    }

    fn search_in_leaf(&self, key: &K) -> Option<V> {
        self.entries.binary_search_by(|(k, _)| k.cmp(key)).ok().map(|idx| self.entries[idx].1.clone())
    }

    fn delete_from_leaf(&mut self, key: &K) -> bool {
        if let Ok(idx) = self.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            self.entries.remove(idx);
            self.keys.remove(idx);
            true
        } else {
            false
        }
    }
}

/// Ordered index with split/merge, sibling-linked leaves and range
/// scan. Order `m >= 3`; nodes split on reaching `m` keys.
pub struct BPlusTree<K: Ord + Clone + Debug, V: Clone + Debug> {
    root: RwLock<Option<NodeRef<K, V>>>,
    order: usize,
    height: RwLock<usize>,
}

impl<K: Ord + Clone + Debug, V: Clone + Debug> BPlusTree<K, V> {
    pub fn new() -> Self {
        Self::with_order(DEFAULT_ORDER)
    }

    pub fn with_order(order: usize) -> Self {
        assert!(order >= 3, "B+ tree order must be at least 3");
        BPlusTree { root: RwLock::new(None), order, height: RwLock::new(0) }
    }

    pub fn height(&self) -> usize {
        *self.height.read()
    }

    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut root_lock = self.root.write();

        if root_lock.is_none() {
            let mut leaf = Node::new_leaf(self.order);
            leaf.insert_in_leaf(key, value);
            *root_lock = Some(Arc::new(RwLock::new(leaf)));
            *self.height.write() = 1;
            return Ok(());
        }

        let root = root_lock.as_ref().unwrap().clone();
        drop(root_lock);

        if let Some((split_key, new_node)) = self.insert_recursive(root.clone(), key, value)? {
            let mut root_lock = self.root.write();
            let old_root = root_lock.as_ref().unwrap().clone();
            let mut new_root = Node::new_internal(self.order);
            new_root.children.push(old_root);
            new_root.keys.push(split_key);
            new_root.children.push(new_node);
            *root_lock = Some(Arc::new(RwLock::new(new_root)));
            *self.height.write() += 1;
        }

        Ok(())
    }

    fn insert_recursive(&self, node_ref: NodeRef<K, V>, key: K, value: V) -> Result<Option<(K, NodeRef<K, V>)>> {
        let mut node = node_ref.write();

        if node.is_leaf {
            node.insert_in_leaf(key, value);

            if node.keys.len() >= self.order {
                let (split_key, new_node) = node.split_leaf(self.order);
                let new_ref = Arc::new(RwLock::new(new_node));

                if let Some(further) = new_ref.read().next_leaf.clone() {
                    further.write().prev_leaf = Some(new_ref.clone());
                }
                new_ref.write().prev_leaf = Some(node_ref.clone());
                node.next_leaf = Some(new_ref.clone());

                Ok(Some((split_key, new_ref)))
            } else {
                Ok(None)
            }
        } else {
            let child_idx = node.find_child_index(&key);
            let child = node.children[child_idx].clone();
            drop(node);

            let split_result = self.insert_recursive(child, key, value)?;

            if let Some((split_key, new_child)) = split_result {
                let mut node = node_ref.write();
                node.insert_in_internal(split_key, new_child, child_idx);

                if node.keys.len() >= self.order {
                    let (median_key, new_node) = node.split_internal(self.order);
                    Ok(Some((median_key, Arc::new(RwLock::new(new_node)))))
                } else {
                    Ok(None)
                }
            } else {
                Ok(None)
            }
        }
    }

    pub fn search(&self, key: &K) -> Option<V> {
        let root_lock = self.root.read();
        match root_lock.as_ref() {
            None => None,
            Some(root) => self.search_recursive(root.clone(), key),
        }
    }

    fn search_recursive(&self, node_ref: NodeRef<K, V>, key: &K) -> Option<V> {
        let node = node_ref.read();
        if node.is_leaf {
            node.search_in_leaf(key)
        } else {
            let child_idx = node.find_child_index(key);
            let child = node.children[child_idx].clone();
            drop(node);
            self.search_recursive(child, key)
        }
    }

    /// `lo ..= hi`, following `next` pointers from the leaf holding
    /// `lo`. Fails with `BadRange` if `lo > hi`, `NullKey` if either
    /// bound is absent.
    pub fn range_search(&self, lo: Option<&K>, hi: Option<&K>) -> Result<Vec<(K, V)>> {
        let (lo, hi) = match (lo, hi) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => return Err(EngineError::NullKey),
        };
        if lo.cmp(hi) == CmpOrdering::Greater {
            return Err(EngineError::BadRange);
        }

        let root_lock = self.root.read();
        match root_lock.as_ref() {
            None => Ok(Vec::new()),
            Some(root) => {
                let leaf = self.find_leaf(root.clone(), lo);
                Ok(self.collect_range(leaf, lo, hi))
            }
        }
    }

    fn find_leaf(&self, node_ref: NodeRef<K, V>, key: &K) -> NodeRef<K, V> {
        let node = node_ref.read();
        if node.is_leaf {
            drop(node);
            node_ref
        } else {
            let child_idx = node.find_child_index(key);
            let child = node.children[child_idx].clone();
            drop(node);
            self.find_leaf(child, key)
        }
    }

    fn collect_range(&self, mut current_leaf: NodeRef<K, V>, lo: &K, hi: &K) -> Vec<(K, V)> {
        let mut results = Vec::new();
        loop {
            let leaf = current_leaf.read();
            for (k, v) in &leaf.entries {
                if k >= lo && k <= hi {
                    results.push((k.clone(), v.clone()));
                } else if k > hi {
                    return results;
                }
            }
            match &leaf.next_leaf {
                Some(next) => {
                    let next_clone = next.clone();
                    drop(leaf);
                    current_leaf = next_clone;
                }
                None => break,
            }
        }
        results
    }

    /// Removes `(k, v)` if present. Full rebalance (borrow/merge) is
    /// intentionally not implemented; underflowed leaves are left as
    /// is (a permitted simplification — range and point queries
    /// remain correct because leaves are never unlinked).
    pub fn delete(&self, key: &K) -> bool {
        let root_lock = self.root.read();
        match root_lock.as_ref() {
            None => false,
            Some(root) => {
                let root_clone = root.clone();
                drop(root_lock);
                self.delete_recursive(root_clone, key)
            }
        }
    }

    fn delete_recursive(&self, node_ref: NodeRef<K, V>, key: &K) -> bool {
        let mut node = node_ref.write();
        if node.is_leaf {
            node.delete_from_leaf(key)
        } else {
            let child_idx = node.find_child_index(key);
            let child = node.children[child_idx].clone();
            drop(node);
            self.delete_recursive(child, key)
        }
    }

    /// Bulk-load sorted, deduplicated data into an empty tree.
    /// Fails with `InvalidOrder` if a duplicate key is present.
    pub fn bulk_load(&self, mut data: Vec<(K, V)>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        data.sort_by(|a, b| a.0.cmp(&b.0));
        for w in data.windows(2) {
            if w[0].0 == w[1].0 {
                return Err(EngineError::InvalidOrder);
            }
        }

        let leaves = self.build_leaf_level(data);
        if leaves.len() == 1 {
            let mut root_lock = self.root.write();
            *root_lock = Some(leaves[0].clone());
            *self.height.write() = 1;
            return Ok(());
        }

        let root = self.build_internal_levels(leaves);
        *self.root.write() = Some(root);
        Ok(())
    }

    fn build_leaf_level(&self, data: Vec<(K, V)>) -> Vec<NodeRef<K, V>> {
        let mut leaves = Vec::new();
        let leaf_capacity = self.order - 1;

        let mut current_leaf: Option<Node<K, V>> = None;
        let mut prev_leaf: Option<NodeRef<K, V>> = None;

        for (key, value) in data {
            if current_leaf.is_none() {
                current_leaf = Some(Node::new_leaf(self.order));
            }
            let leaf = current_leaf.as_mut().unwrap();
            leaf.entries.push((key, value));

            if leaf.entries.len() >= leaf_capacity {
                let completed_leaf = current_leaf.take().unwrap();
                let leaf_ref = Arc::new(RwLock::new(completed_leaf));
                if let Some(prev) = &prev_leaf {
                    prev.write().next_leaf = Some(leaf_ref.clone());
                    leaf_ref.write().prev_leaf = Some(prev.clone());
                }
                leaves.push(leaf_ref.clone());
                prev_leaf = Some(leaf_ref);
                current_leaf = None;
            }
        }

        if let Some(leaf) = current_leaf {
            let leaf_ref = Arc::new(RwLock::new(leaf));
            if let Some(prev) = &prev_leaf {
                prev.write().next_leaf = Some(leaf_ref.clone());
                leaf_ref.write().prev_leaf = Some(prev.clone());
            }
            leaves.push(leaf_ref);
        }

        for leaf_ref in &leaves {
            let mut leaf = leaf_ref.write();
            leaf.keys = leaf.entries.iter().map(|(k, _)| k.clone()).collect();
        }

        leaves
    }

    fn build_internal_levels(&self, mut children: Vec<NodeRef<K, V>>) -> NodeRef<K, V> {
        let mut height = 1;

        while children.len() > 1 {
            let mut parents = Vec::new();
            let parent_capacity = self.order;
            let mut current_parent = Node::new_internal(self.order);

            for (i, child) in children.into_iter().enumerate() {
                if i > 0 {
                    let separator = child.read().keys[0].clone();
                    current_parent.keys.push(separator);
                }
                current_parent.children.push(child);

                if current_parent.children.len() >= parent_capacity {
                    parents.push(Arc::new(RwLock::new(current_parent)));
                    current_parent = Node::new_internal(self.order);
                }
            }

            if !current_parent.children.is_empty() {
                parents.push(Arc::new(RwLock::new(current_parent)));
            }

            children = parents;
            height += 1;
        }

        *self.height.write() = height;
        children.into_iter().next().unwrap()
    }

    pub fn stats(&self) -> BTreeStats {
        let root_lock = self.root.read();
        let height = *self.height.read();
        match root_lock.as_ref() {
            None => BTreeStats { height: 0, total_nodes: 0, total_keys: 0, leaf_nodes: 0, internal_nodes: 0 },
            Some(root) => {
                let mut stats = BTreeStats { height, total_nodes: 0, total_keys: 0, leaf_nodes: 0, internal_nodes: 0 };
                self.collect_stats(root.clone(), &mut stats);
                stats
            }
        }
    }

    fn collect_stats(&self, node_ref: NodeRef<K, V>, stats: &mut BTreeStats) {
        let node = node_ref.read();
        stats.total_nodes += 1;
        stats.total_keys += node.keys.len();
        if node.is_leaf {
            stats.leaf_nodes += 1;
        } else {
            stats.internal_nodes += 1;
            for child in &node.children {
                self.collect_stats(child.clone(), stats);
            }
        }
    }

    /// In-order traversal via the leaf chain, for invariant checks.
    pub fn in_order_keys(&self) -> Vec<K> {
        let root_lock = self.root.read();
        let Some(root) = root_lock.as_ref() else { return Vec::new() };
        let mut leaf = self.leftmost_leaf(root.clone());
        let mut out = Vec::new();
        loop {
            let guard = leaf.read();
            out.extend(guard.keys.iter().cloned());
            match &guard.next_leaf {
                Some(next) => {
                    let next = next.clone();
                    drop(guard);
                    leaf = next;
                }
                None => break,
            }
        }
        out
    }

    fn leftmost_leaf(&self, node_ref: NodeRef<K, V>) -> NodeRef<K, V> {
        let node = node_ref.read();
        if node.is_leaf {
            drop(node);
            node_ref
        } else {
            let child = node.children[0].clone();
            drop(node);
            self.leftmost_leaf(child)
        }
    }
}

impl<K: Ord + Clone + Debug, V: Clone + Debug> Default for BPlusTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct BTreeStats {
    pub height: usize,
    pub total_nodes: usize,
    pub total_keys: usize,
    pub leaf_nodes: usize,
    pub internal_nodes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_search() {
        let tree: BPlusTree<i32, String> = BPlusTree::new();
        tree.insert(5, "five".to_string()).unwrap();
        tree.insert(3, "three".to_string()).unwrap();
        tree.insert(7, "seven".to_string()).unwrap();
        tree.insert(1, "one".to_string()).unwrap();

        assert_eq!(tree.search(&5), Some("five".to_string()));
        assert_eq!(tree.search(&9), None);
    }

    #[test]
    fn scenario_a_split_and_range() {
        let tree: BPlusTree<i32, String> = BPlusTree::with_order(5);
        for k in [10, 20, 30, 40, 50, 60] {
            tree.insert(k, format!("v_{k}")).unwrap();
        }
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.search(&40), Some("v_40".to_string()));
        let range = tree.range_search(Some(&20), Some(&50)).unwrap();
        assert_eq!(
            range,
            vec![(20, "v_20".to_string()), (30, "v_30".to_string()), (40, "v_40".to_string()), (50, "v_50".to_string())]
        );
    }

    #[test]
    fn range_search_requires_both_bounds() {
        let tree: BPlusTree<i32, String> = BPlusTree::new();
        tree.insert(1, "a".to_string()).unwrap();
        assert!(matches!(tree.range_search(None, Some(&1)), Err(EngineError::NullKey)));
    }

    #[test]
    fn range_search_rejects_inverted_bounds() {
        let tree: BPlusTree<i32, String> = BPlusTree::new();
        tree.insert(1, "a".to_string()).unwrap();
        assert!(matches!(tree.range_search(Some(&5), Some(&1)), Err(EngineError::BadRange)));
    }

    #[test]
    fn delete_removes_key() {
        let tree: BPlusTree<i32, String> = BPlusTree::new();
        tree.insert(1, "one".to_string()).unwrap();
        tree.insert(2, "two".to_string()).unwrap();
        tree.insert(3, "three".to_string()).unwrap();

        assert!(tree.delete(&2));
        assert_eq!(tree.search(&2), None);
        assert_eq!(tree.search(&1), Some("one".to_string()));
    }

    #[test]
    fn in_order_traversal_is_sorted_after_many_splits() {
        let tree: BPlusTree<i32, i32> = BPlusTree::with_order(4);
        for k in (0..200).rev() {
            tree.insert(k, k).unwrap();
        }
        let keys = tree.in_order_keys();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 200);
    }

    #[test]
    fn bulk_load_then_search() {
        let tree: BPlusTree<i32, String> = BPlusTree::new();
        let data: Vec<_> = (1..=100).map(|i| (i, format!("value_{i}"))).collect();
        tree.bulk_load(data).unwrap();
        for i in 1..=100 {
            assert_eq!(tree.search(&i), Some(format!("value_{i}")));
        }
    }

    #[test]
    fn bulk_load_rejects_duplicates() {
        let tree: BPlusTree<i32, i32> = BPlusTree::new();
        assert!(matches!(tree.bulk_load(vec![(1, 1), (1, 2)]), Err(EngineError::InvalidOrder)));
    }
}
