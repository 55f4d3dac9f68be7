// src/coord/mod.rs

//! Client-side plumbing for a ZooKeeper-style coordination service:
//! session management on a dedicated worker thread, watch delivery as
//! messages, reconnection, the distributed lock primitive, and an
//! in-memory backend used by the test suite and embedded deployments.

pub mod client;
pub mod lock;
pub mod memory;
pub mod paths;
pub mod service;
pub mod session;

pub use client::CoordClient;
pub use lock::CoordLock;
pub use memory::MemoryCoordination;
pub use service::{COORDINATION_SERVICE, CoordService};
pub use session::{
    CoordinationBackend, CoordinationSession, CreateMode, SessionEvent, SessionState, WatchEvent,
    WatchKind,
};
