// src/errors.rs

//! Defines the primary error types for the toolkit.

use thiserror::Error;

/// Errors surfaced by the coordination-service layer.
///
/// The variants mirror the failure modes of a ZooKeeper-style service:
/// missing or pre-existing nodes, session-level failures, and backend
/// faults that do not fit a more specific category.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    #[error("no node at '{0}'")]
    NoNode(String),

    #[error("node already exists at '{0}'")]
    NodeExists(String),

    #[error("node '{0}' has children and cannot be deleted")]
    NotEmpty(String),

    #[error("malformed node path '{0}'")]
    BadPath(String),

    #[error("not connected to the coordination service")]
    NotConnected,

    #[error("coordination session closed")]
    SessionClosed,

    #[error("could not establish a coordination session: {0}")]
    ConnectFailed(String),

    #[error("coordination backend error: {0}")]
    Backend(String),
}

/// The main error enum, representing all failures within the toolkit.
/// Using `thiserror` allows for clean error definitions and automatic
/// `From` trait implementations.
#[derive(Error, Debug)]
pub enum RookeryError {
    #[error("coordination error: {0}")]
    Coordination(#[from] CoordError),

    #[error("'{0}' is already running")]
    AlreadyRunning(String),

    #[error("timer has already been started")]
    TimerAlreadyStarted,

    #[error("external service '{0}' is already registered")]
    DuplicateService(String),

    #[error("external service '{0}' is not registered")]
    UnknownService(String),

    #[error("cluster node '{0}' is already managed")]
    DuplicateNode(String),

    #[error("slot {slot} is out of range (max_working_nodes = {max})")]
    SlotOutOfRange { slot: usize, max: usize },

    #[error("slot {slot} is already claimed by '{owner}'")]
    SlotTaken { slot: usize, owner: String },

    #[error("failed to release lock node '{0}'")]
    LockRelease(String),

    #[error("lock node was never created")]
    LockNotHeld,

    #[error("event channel closed")]
    ChannelClosed,

    #[error("server start failed: {0}")]
    StartFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}
