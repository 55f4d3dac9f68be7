// src/coord/session.rs

//! Types and traits describing a session with the coordination service.
//!
//! The underlying client libraries are synchronous, so sessions expose a
//! blocking API and are driven from a dedicated worker thread; async code
//! goes through the `spawn_blocking` wrappers on [`crate::coord::CoordClient`].

use crate::errors::CoordError;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The connection state of the coordination-service session, as observed
/// by the rest of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Connecting,
    Connected,
    /// The connection dropped but the session may still recover on its own.
    Suspended,
    Closed,
    Reconnecting,
    ConnectionFailed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, SessionState::Suspended)
    }

    /// Whether a connection attempt is currently in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Reconnecting)
    }
}

/// How a node should be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    /// Ephemeral, with a 10-digit sequence suffix appended by the service.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::EphemeralSequential)
    }
}

/// What a watch observed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Children,
    Data,
}

/// A watch notification. Watches are persistent: they keep firing for every
/// change until the session ends. The consumer re-reads the node to observe
/// the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub path: String,
}

/// An event emitted by the coordination session towards the process.
/// Connection transitions and watch fires alike are delivered as messages
/// over a channel, never as callbacks on foreign threads.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session is established (first connect or recovery).
    Opened,
    /// The session is gone; all ephemeral state owned by it has vanished.
    Lost,
    /// The connection dropped; the session may recover without losing state.
    Suspended,
    /// A session could not be established at all.
    Failed(String),
    Watch(WatchEvent),
}

/// A factory for coordination sessions.
pub trait CoordinationBackend: Send + Sync + 'static {
    /// Opens a new session, blocking until it is established or the attempt
    /// fails. Events for the session's lifetime are delivered on `events`.
    fn connect(
        &self,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn CoordinationSession>, CoordError>;
}

/// A live session with the coordination service.
///
/// All operations are synchronous and must not be called on the async
/// runtime directly.
pub trait CoordinationSession: Send + Sync {
    /// The service-assigned session id.
    fn id(&self) -> u64;

    /// Creates `path` and any missing ancestors as persistent nodes.
    fn ensure_path(&self, path: &str) -> Result<(), CoordError>;

    /// Creates a node and returns the full path actually created (which
    /// differs from `path` for sequential nodes).
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String, CoordError>;

    fn get_data(&self, path: &str) -> Result<Bytes, CoordError>;

    fn set_data(&self, path: &str, data: &[u8]) -> Result<(), CoordError>;

    fn delete(&self, path: &str) -> Result<(), CoordError>;

    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordError>;

    /// Installs a persistent children watch on `path` and returns the
    /// current children.
    fn watch_children(&self, path: &str) -> Result<Vec<String>, CoordError>;

    /// Installs a persistent data watch on `path` and returns the current
    /// data, or `None` if the node does not exist yet.
    fn watch_data(&self, path: &str) -> Result<Option<Bytes>, CoordError>;

    /// Closes the session, releasing every ephemeral node it owns.
    fn close(&self);
}
