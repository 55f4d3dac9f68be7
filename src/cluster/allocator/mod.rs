// src/cluster/allocator/mod.rs

//! Node allocators map a request key to the working member that should
//! serve it. Two strategies exist: modulo over the claimed slot index, and
//! a consistent hash ring over member names.

pub mod hash_ring;
pub mod modulo;

pub use hash_ring::HashRingAllocator;
pub use modulo::ModuloAllocator;

use crate::config::WorkingMode;
use crate::errors::RookeryError;
use tracing::{error, info, warn};

/// A routing key. The modulo allocator needs an integer (decimal text is
/// accepted); the hash ring hashes any text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKey {
    Index(u64),
    Text(String),
}

impl From<u64> for RouteKey {
    fn from(key: u64) -> Self {
        RouteKey::Index(key)
    }
}

impl From<u32> for RouteKey {
    fn from(key: u32) -> Self {
        RouteKey::Index(u64::from(key))
    }
}

impl From<&str> for RouteKey {
    fn from(key: &str) -> Self {
        RouteKey::Text(key.to_string())
    }
}

impl From<String> for RouteKey {
    fn from(key: String) -> Self {
        RouteKey::Text(key)
    }
}

/// A member as known to an allocator. `index` is `None` until the member
/// has published its working slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDesc {
    pub name: String,
    pub index: Option<usize>,
}

/// The common allocator contract.
pub trait NodeAllocator: Send + Sync {
    /// Which strategy this allocator implements.
    fn mode(&self) -> WorkingMode;

    /// Names of every managed member.
    fn node_names(&self) -> Vec<String>;

    /// Every managed member with its known slot.
    fn nodes(&self) -> Vec<NodeDesc>;

    fn is_managed(&self, name: &str) -> bool;

    /// Replaces the whole member set.
    fn set_nodes(&mut self, nodes: &[(String, Option<usize>)]) -> Result<(), RookeryError>;

    /// Adds a member. Duplicate names and invalid slots are programmer
    /// errors.
    fn add_node(&mut self, name: &str, index: Option<usize>) -> Result<(), RookeryError>;

    /// Removes a member; unknown names are ignored.
    fn remove_node(&mut self, name: &str);

    /// Updates the slot of an already-managed member; unknown names are
    /// ignored.
    fn update_node(&mut self, name: &str, index: Option<usize>) -> Result<(), RookeryError>;

    /// The member that should serve `key`, or `None` when no member is
    /// routable for it.
    fn node_for_key(&self, key: &RouteKey) -> Option<String>;
}

/// Builds the allocator configured by `working_mode`.
pub fn allocator_for(mode: WorkingMode, max_working_nodes: usize) -> Box<dyn NodeAllocator> {
    match mode {
        WorkingMode::Modulo => Box::new(ModuloAllocator::new(max_working_nodes)),
        WorkingMode::HashRing => Box::new(HashRingAllocator::new()),
    }
}

/// Wraps an allocator with the bookkeeping and logging of one watched
/// service.
pub struct NodeManager {
    service_name: String,
    allocator: Box<dyn NodeAllocator>,
}

impl NodeManager {
    pub fn new(service_name: &str, allocator: Box<dyn NodeAllocator>) -> Self {
        Self {
            service_name: service_name.to_string(),
            allocator,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn allocator(&self) -> &dyn NodeAllocator {
        self.allocator.as_ref()
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.allocator.is_managed(name)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.allocator.node_names()
    }

    pub fn nodes(&self) -> Vec<NodeDesc> {
        self.allocator.nodes()
    }

    /// Replaces the member set wholesale.
    pub fn set_nodes(&mut self, nodes: &[(String, Option<usize>)]) -> Result<(), RookeryError> {
        info!(
            "service node changed - {} - nodes: {:?}",
            self.service_name, nodes
        );
        if nodes.is_empty() {
            error!("All service nodes DOWN - {}", self.service_name);
        }
        self.allocator.set_nodes(nodes)
    }

    pub fn add_node(&mut self, name: &str, index: Option<usize>) -> Result<(), RookeryError> {
        self.allocator.add_node(name, index)
    }

    pub fn remove_node(&mut self, name: &str) {
        self.allocator.remove_node(name);
    }

    pub fn update_node(&mut self, name: &str, index: Option<usize>) -> Result<(), RookeryError> {
        if let Err(e) = self.allocator.update_node(name, index) {
            warn!(
                "service {} - cannot update node {}: {}",
                self.service_name, name, e
            );
            return Err(e);
        }
        Ok(())
    }

    /// The member that should serve `key`.
    pub fn node_for_key(&self, key: &RouteKey) -> Option<String> {
        self.allocator.node_for_key(key)
    }
}
