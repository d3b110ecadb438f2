//! Wait-for graph deadlock detection: depth-first search with an
//! explicit recursion stack, self-loops included as single-node
//! cycles.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::common::TransactionId;

use super::types::TxnLockProfile;

struct Graph {
    waits: HashMap<TransactionId, HashSet<(TransactionId, String)>>,
}

pub struct DeadlockDetector {
    graph: Mutex<Graph>,
}

impl DeadlockDetector {
    pub fn new() -> Self {
        DeadlockDetector { graph: Mutex::new(Graph { waits: HashMap::new() }) }
    }

    /// `waiter` is blocked waiting for `holder` to release `resource`.
    pub fn add_wait(&self, waiter: TransactionId, holder: TransactionId, resource: impl Into<String>) {
        self.graph.lock().waits.entry(waiter).or_default().insert((holder, resource.into()));
    }

    /// Removes every edge incident to `txn`, as both waiter and
    /// holder.
    pub fn remove_waits_for(&self, txn: TransactionId) {
        let mut graph = self.graph.lock();
        graph.waits.remove(&txn);
        for edges in graph.waits.values_mut() {
            edges.retain(|(holder, _)| *holder != txn);
        }
    }

    /// DFS over the wait-for graph with an explicit recursion stack.
    /// Returns the cycle starting at the first repeated ancestor, or
    /// `None`. A self-loop (`t` waits on `t`) is a one-element cycle.
    pub fn detect(&self) -> Option<Vec<TransactionId>> {
        let graph = self.graph.lock();
        let mut visited = HashSet::new();

        for &start in graph.waits.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            if let Some(cycle) = Self::dfs(start, &graph.waits, &mut visited, &mut stack, &mut on_stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        node: TransactionId,
        waits: &HashMap<TransactionId, HashSet<(TransactionId, String)>>,
        visited: &mut HashSet<TransactionId>,
        stack: &mut Vec<TransactionId>,
        on_stack: &mut HashSet<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(edges) = waits.get(&node) {
            for &(holder, _) in edges {
                if on_stack.contains(&holder) {
                    let start = stack.iter().position(|&t| t == holder).unwrap();
                    return Some(stack[start..].to_vec());
                }
                if !visited.contains(&holder) {
                    if let Some(cycle) = Self::dfs(holder, waits, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        on_stack.remove(&node);
        None
    }

    /// `score(t) = 10*held + seconds_running + priority`; the minimum
    /// scorer is the victim, ties broken by the lowest `txn_id`.
    pub fn select_victim(cycle: &[TransactionId], profiles: &HashMap<TransactionId, TxnLockProfile>) -> TransactionId {
        let score = |txn: &TransactionId| -> (u64, TransactionId) {
            let p = profiles.get(txn).copied().unwrap_or(TxnLockProfile { held_lock_count: 0, seconds_running: 0, priority: 0 });
            (10 * p.held_lock_count as u64 + p.seconds_running + p.priority as u64, *txn)
        };
        *cycle.iter().min_by_key(|t| score(t)).expect("cycle must be non-empty")
    }

    /// Typed snapshot of current wait-for graph occupancy.
    pub fn statistics(&self) -> DeadlockStats {
        let graph = self.graph.lock();
        DeadlockStats {
            waiting_transactions: graph.waits.len(),
            wait_edges: graph.waits.values().map(HashSet::len).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlockStats {
    pub waiting_transactions: usize,
    pub wait_edges: usize,
}

impl Default for DeadlockDetector {
    fn default() -> Self {
        Self::new()
    }
}
