// src/cluster/allocator/modulo.rs

//! Slot-indexed allocation: every working member owns one dense slot in
//! `[0, max_working_nodes)` and a key routes to `key % max_working_nodes`.

use super::{NodeAllocator, NodeDesc, RouteKey};
use crate::config::WorkingMode;
use crate::errors::RookeryError;
use tracing::{debug, warn};

/// Routes integer keys by slot index. Members whose slot is still unknown
/// are managed but not routable; a key whose slot is unclaimed routes to
/// nobody (no fallback in this version).
pub struct ModuloAllocator {
    max_working_nodes: usize,
    nodes: Vec<NodeDesc>,
    /// Slot index -> member name; empty string marks an unclaimed slot.
    slot_table: Vec<String>,
}

impl ModuloAllocator {
    pub fn new(max_working_nodes: usize) -> Self {
        Self {
            max_working_nodes,
            nodes: Vec::new(),
            slot_table: vec![String::new(); max_working_nodes],
        }
    }

    fn check_slot(&self, name: &str, slot: usize) -> Result<(), RookeryError> {
        if slot >= self.max_working_nodes {
            return Err(RookeryError::SlotOutOfRange {
                slot,
                max: self.max_working_nodes,
            });
        }
        let owner = &self.slot_table[slot];
        if !owner.is_empty() && owner != name {
            return Err(RookeryError::SlotTaken {
                slot,
                owner: owner.clone(),
            });
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }
}

impl NodeAllocator for ModuloAllocator {
    fn mode(&self) -> WorkingMode {
        WorkingMode::Modulo
    }

    fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.name.clone()).collect()
    }

    fn nodes(&self) -> Vec<NodeDesc> {
        self.nodes.clone()
    }

    fn is_managed(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn set_nodes(&mut self, nodes: &[(String, Option<usize>)]) -> Result<(), RookeryError> {
        self.nodes.clear();
        self.slot_table = vec![String::new(); self.max_working_nodes];
        for (name, index) in nodes {
            self.add_node(name, *index)?;
        }
        Ok(())
    }

    fn add_node(&mut self, name: &str, index: Option<usize>) -> Result<(), RookeryError> {
        if self.is_managed(name) {
            return Err(RookeryError::DuplicateNode(name.to_string()));
        }
        if let Some(slot) = index {
            self.check_slot(name, slot)?;
            self.slot_table[slot] = name.to_string();
        }
        self.nodes.push(NodeDesc {
            name: name.to_string(),
            index,
        });
        Ok(())
    }

    fn remove_node(&mut self, name: &str) {
        let Some(position) = self.position(name) else {
            return;
        };
        let node = self.nodes.remove(position);
        if let Some(slot) = node.index
            && self.slot_table[slot] == node.name
        {
            self.slot_table[slot].clear();
        }
    }

    fn update_node(&mut self, name: &str, index: Option<usize>) -> Result<(), RookeryError> {
        let Some(position) = self.position(name) else {
            warn!("cannot update unmanaged node '{}'", name);
            return Ok(());
        };

        if let Some(slot) = index {
            self.check_slot(name, slot)?;
        }

        let old_index = self.nodes[position].index;
        if let Some(slot) = old_index
            && self.slot_table[slot] == name
        {
            self.slot_table[slot].clear();
        }

        self.nodes[position].index = index;
        if let Some(slot) = index {
            self.slot_table[slot] = name.to_string();
        }
        Ok(())
    }

    fn node_for_key(&self, key: &RouteKey) -> Option<String> {
        let key = match key {
            RouteKey::Index(key) => *key,
            RouteKey::Text(text) => match text.trim().parse::<u64>() {
                Ok(key) => key,
                Err(_) => {
                    debug!("modulo allocator needs an integer key, got '{}'", text);
                    return None;
                }
            },
        };

        let slot = (key % self.max_working_nodes as u64) as usize;
        let owner = &self.slot_table[slot];
        if owner.is_empty() {
            None
        } else {
            Some(owner.clone())
        }
    }
}
