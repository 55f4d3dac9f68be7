// src/cluster/allocator/hash_ring.rs

//! Consistent-hash allocation: members sit on a ring keyed by the hash of
//! their name, and a key routes to the first member clockwise from its own
//! hash. Membership changes only disturb keys in the adjacent arc.

use super::{NodeAllocator, NodeDesc, RouteKey};
use crate::config::WorkingMode;
use crate::errors::RookeryError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

const RING_HASH_SEED: u32 = 0;

fn ring_hash(value: &str) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(value.as_bytes()), RING_HASH_SEED).unwrap_or(0)
}

/// Routes text keys over a consistent-hash ring of member names. Slot
/// indices are accepted but not consulted, so members are routable as soon
/// as they are known.
pub struct HashRingAllocator {
    names: BTreeSet<String>,
    ring: BTreeMap<u32, String>,
}

impl Default for HashRingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRingAllocator {
    pub fn new() -> Self {
        Self {
            names: BTreeSet::new(),
            ring: BTreeMap::new(),
        }
    }
}

impl NodeAllocator for HashRingAllocator {
    fn mode(&self) -> WorkingMode {
        WorkingMode::HashRing
    }

    fn node_names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    fn nodes(&self) -> Vec<NodeDesc> {
        self.names
            .iter()
            .map(|name| NodeDesc {
                name: name.clone(),
                index: None,
            })
            .collect()
    }

    fn is_managed(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn set_nodes(&mut self, nodes: &[(String, Option<usize>)]) -> Result<(), RookeryError> {
        self.names.clear();
        self.ring.clear();
        for (name, index) in nodes {
            self.add_node(name, *index)?;
        }
        Ok(())
    }

    fn add_node(&mut self, name: &str, _index: Option<usize>) -> Result<(), RookeryError> {
        if !self.names.insert(name.to_string()) {
            return Err(RookeryError::DuplicateNode(name.to_string()));
        }
        self.ring.insert(ring_hash(name), name.to_string());
        Ok(())
    }

    fn remove_node(&mut self, name: &str) {
        if self.names.remove(name) {
            let point = ring_hash(name);
            // Only drop the ring point if it still belongs to this name;
            // a hash collision must not evict the surviving member.
            if self.ring.get(&point).is_some_and(|owner| owner == name) {
                self.ring.remove(&point);
            }
        }
    }

    fn update_node(&mut self, _name: &str, _index: Option<usize>) -> Result<(), RookeryError> {
        // The ring does not consult slot indices.
        Ok(())
    }

    fn node_for_key(&self, key: &RouteKey) -> Option<String> {
        if self.ring.is_empty() {
            return None;
        }

        let text = match key {
            RouteKey::Text(text) => text.clone(),
            RouteKey::Index(key) => key.to_string(),
        };
        let point = ring_hash(&text);

        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, name)| name.clone())
    }
}
