// src/cluster/mod.rs

//! Cluster membership and routing: the status state machine, the external
//! service supervisor, both sides of the slot-assignment protocol, and the
//! node allocators.

pub mod allocator;
pub mod client;
pub mod controller;
pub mod server;
pub mod supervisor;

pub use allocator::{NodeAllocator, NodeDesc, NodeManager, RouteKey};
pub use client::ClusterClient;
pub use controller::{ServerEvent, ServerLifecycle, ServerStatus, StatusController};
pub use server::{CLUSTER_SERVICE, ClusterServer};
pub use supervisor::{ExternalService, ServiceLevel, ServiceStatus, ServiceSupervisor};

use std::fmt;
use uuid::Uuid;

/// A process-unique identity used as the name part of this process's
/// ephemeral-sequential nodes. Dots in the host/service portion are
/// replaced with dashes so a candidate name contains exactly one `.` (the
/// one introduced by the sequence suffix).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterId(String);

impl ClusterId {
    /// Generates a fresh identity: `<host>.<service>[.<instance>]` with
    /// dots dashed, plus a random uuid.
    pub fn generate(service_name: &str, instance: Option<u32>) -> Self {
        let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
        let full_name = match instance {
            Some(instance) => format!("{host}.{service_name}.{instance}"),
            None => format!("{host}.{service_name}"),
        };
        let sanitized = full_name.replace('.', "-");
        Self(format!("{}-{}", sanitized, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClusterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id.replace('.', "-"))
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self::from(id.to_string())
    }
}
