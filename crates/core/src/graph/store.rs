use std::collections::HashMap;

use crate::graph::{NodeId, NodeKey};

/// One member of a collision list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CollisionEntry {
    key: NodeKey,
    node: NodeId,
}

/// Content-addressed index from 64-bit block hash to every node carrying it.
///
/// Each hash maps to a collision list in insertion order. A node's instance id
/// is its rank in that list at insertion time, so the first node with a hash
/// gets instance 0, the next colliding node gets 1, and so on. Entries are
/// never removed, which keeps every instance id stable for the node's lifetime.
#[derive(Debug, Clone, Default)]
pub struct NodeHashMap {
    buckets: HashMap<u64, Vec<CollisionEntry>>,
    node_count: usize,
}

impl NodeHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `node` to the collision list for `hash` and return its key.
    pub fn insert(&mut self, hash: u64, node: NodeId) -> NodeKey {
        let list = self.buckets.entry(hash).or_default();
        let key = NodeKey { hash, instance: list.len() as u32 };
        list.push(CollisionEntry { key, node });
        self.node_count += 1;
        key
    }

    /// All nodes sharing `hash`, in insertion order. Empty when the hash is unknown.
    pub fn lookup_by_hash(&self, hash: u64) -> Vec<NodeId> {
        self.buckets
            .get(&hash)
            .map(|list| list.iter().map(|entry| entry.node).collect())
            .unwrap_or_default()
    }

    /// Resolve an exact `(hash, instance)` key.
    ///
    /// A singleton list is answered directly without scanning. Longer lists are
    /// scanned for the exact key; a key whose instance is not present yields `None`.
    pub fn lookup_by_key(&self, key: NodeKey) -> Option<NodeId> {
        let list = self.buckets.get(&key.hash)?;
        if let [only] = list.as_slice() {
            return (only.key == key).then_some(only.node);
        }
        list.iter().find(|entry| entry.key == key).map(|entry| entry.node)
    }

    /// Number of nodes sharing `hash`.
    pub fn collision_count(&self, hash: u64) -> usize {
        self.buckets.get(&hash).map_or(0, Vec::len)
    }

    pub fn contains_hash(&self, hash: u64) -> bool {
        self.buckets.contains_key(&hash)
    }

    /// Hashes whose collision list holds more than one node, sorted.
    pub fn colliding_hashes(&self) -> Vec<u64> {
        let mut hashes: Vec<u64> = self
            .buckets
            .iter()
            .filter(|(_, list)| list.len() > 1)
            .map(|(hash, _)| *hash)
            .collect();
        hashes.sort_unstable();
        hashes
    }

    /// Number of distinct hashes.
    pub fn hash_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of indexed nodes.
    pub fn node_count(&self) -> usize {
        self.node_count
    }
}
