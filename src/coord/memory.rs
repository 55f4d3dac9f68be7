// src/coord/memory.rs

//! An in-memory coordination backend with ZooKeeper-style semantics:
//! hierarchical paths, ephemeral and sequential nodes, persistent
//! children/data watches, and session expiry. It backs the test suite and
//! can serve as an embedded single-process backend; fault-injection
//! helpers simulate connect failures, suspension, and session loss.

use crate::coord::paths::SEQUENCE_WIDTH;
use crate::coord::session::{
    CoordinationBackend, CoordinationSession, CreateMode, SessionEvent, WatchEvent, WatchKind,
};
use crate::errors::CoordError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryNode {
    data: Bytes,
    /// Session that owns this node, for ephemeral nodes.
    owner: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchRegistration {
    session: u64,
    kind: WatchKind,
    path: String,
}

struct MemoryShared {
    /// All nodes, keyed by absolute path. A BTreeMap keeps children of a
    /// common parent adjacent, which makes child scans cheap.
    nodes: Mutex<BTreeMap<String, MemoryNode>>,
    /// Per-parent sequence counters for sequential creates.
    counters: Mutex<HashMap<String, u64>>,
    watches: Mutex<Vec<WatchRegistration>>,
    sessions: DashMap<u64, UnboundedSender<SessionEvent>>,
    next_session_id: AtomicU64,
    /// Number of upcoming connect attempts that should fail.
    failing_connects: AtomicUsize,
}

impl MemoryShared {
    fn fire_watch(&self, kind: WatchKind, path: &str) {
        let targets: Vec<u64> = {
            let watches = self.watches.lock();
            watches
                .iter()
                .filter(|w| w.kind == kind && w.path == path)
                .map(|w| w.session)
                .collect()
        };

        for session in targets {
            if let Some(events) = self.sessions.get(&session) {
                let _ = events.send(SessionEvent::Watch(WatchEvent {
                    kind,
                    path: path.to_string(),
                }));
            }
        }
    }

    fn parent_of(path: &str) -> Option<&str> {
        let (parent, _) = path.rsplit_once('/')?;
        if parent.is_empty() { Some("/") } else { Some(parent) }
    }

    fn validate_path(path: &str) -> Result<(), CoordError> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err(CoordError::BadPath(path.to_string()));
        }
        Ok(())
    }

    fn children_of(nodes: &BTreeMap<String, MemoryNode>, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    /// Removes one session: deletes its ephemeral nodes (firing watches for
    /// the other sessions), then drops its watch registrations.
    fn remove_session(&self, session: u64) {
        self.sessions.remove(&session);

        let removed: Vec<String> = {
            let mut nodes = self.nodes.lock();
            let owned: Vec<String> = nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &owned {
                nodes.remove(path);
            }
            owned
        };

        for path in &removed {
            self.fire_watch(WatchKind::Data, path);
            if let Some(parent) = Self::parent_of(path) {
                self.fire_watch(WatchKind::Children, parent);
            }
        }

        self.watches.lock().retain(|w| w.session != session);
    }
}

/// The in-memory coordination service. Cloning shares the same node tree,
/// so several clients (and several simulated processes) can coordinate
/// through one instance.
#[derive(Clone)]
pub struct MemoryCoordination {
    shared: Arc<MemoryShared>,
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordination {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            MemoryNode {
                data: Bytes::new(),
                owner: None,
            },
        );
        Self {
            shared: Arc::new(MemoryShared {
                nodes: Mutex::new(nodes),
                counters: Mutex::new(HashMap::new()),
                watches: Mutex::new(Vec::new()),
                sessions: DashMap::new(),
                next_session_id: AtomicU64::new(1),
                failing_connects: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes the next `count` connect attempts fail, to exercise the
    /// first-connect failure path.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Ids of the currently live sessions, in creation order.
    pub fn session_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.shared.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Expires one session: its ephemeral nodes vanish, peers see the
    /// change through their watches, and the owner observes `Lost`.
    pub fn expire_session(&self, session: u64) {
        let events = self.shared.sessions.get(&session).map(|e| e.value().clone());
        self.shared.remove_session(session);
        if let Some(events) = events {
            let _ = events.send(SessionEvent::Lost);
        }
    }

    /// Expires every live session.
    pub fn expire_all_sessions(&self) {
        for session in self.session_ids() {
            self.expire_session(session);
        }
    }

    /// Simulates a dropped connection: the session stays alive (ephemeral
    /// nodes remain) but the owner observes `Suspended`.
    pub fn suspend_session(&self, session: u64) {
        if let Some(events) = self.shared.sessions.get(&session) {
            let _ = events.send(SessionEvent::Suspended);
        }
    }

    /// Recovers a suspended session: the owner observes `Opened` again.
    pub fn resume_session(&self, session: u64) {
        if let Some(events) = self.shared.sessions.get(&session) {
            let _ = events.send(SessionEvent::Opened);
        }
    }
}

impl CoordinationBackend for MemoryCoordination {
    fn connect(
        &self,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn CoordinationSession>, CoordError> {
        let failing = &self.shared.failing_connects;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoordError::ConnectFailed(
                "injected connect failure".to_string(),
            ));
        }

        let id = self.shared.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.shared.sessions.insert(id, events);
        debug!(session = id, "memory coordination session opened");

        Ok(Arc::new(MemorySession {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// One session against the in-memory service.
struct MemorySession {
    id: u64,
    shared: Arc<MemoryShared>,
}

impl MemorySession {
    fn check_alive(&self) -> Result<(), CoordError> {
        if self.shared.sessions.contains_key(&self.id) {
            Ok(())
        } else {
            Err(CoordError::SessionClosed)
        }
    }

    fn register_watch(&self, kind: WatchKind, path: &str) {
        let registration = WatchRegistration {
            session: self.id,
            kind,
            path: path.to_string(),
        };
        let mut watches = self.shared.watches.lock();
        if !watches.contains(&registration) {
            watches.push(registration);
        }
    }
}

impl CoordinationSession for MemorySession {
    fn id(&self) -> u64 {
        self.id
    }

    fn ensure_path(&self, path: &str) -> Result<(), CoordError> {
        self.check_alive()?;
        MemoryShared::validate_path(path)?;

        let mut created = Vec::new();
        {
            let mut nodes = self.shared.nodes.lock();
            let mut current = String::new();
            for component in path.split('/').filter(|c| !c.is_empty()) {
                current.push('/');
                current.push_str(component);
                if !nodes.contains_key(&current) {
                    nodes.insert(
                        current.clone(),
                        MemoryNode {
                            data: Bytes::new(),
                            owner: None,
                        },
                    );
                    created.push(current.clone());
                }
            }
        }

        for path in created {
            if let Some(parent) = MemoryShared::parent_of(&path) {
                self.shared.fire_watch(WatchKind::Children, parent);
            }
        }
        Ok(())
    }

    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String, CoordError> {
        self.check_alive()?;
        if !path.starts_with('/') {
            return Err(CoordError::BadPath(path.to_string()));
        }

        // Sequential creates treat `path` as a prefix the counter is
        // appended to; the parent is derived from the prefix.
        let parent = MemoryShared::parent_of(path)
            .ok_or_else(|| CoordError::BadPath(path.to_string()))?
            .to_string();

        let full_path = {
            let mut nodes = self.shared.nodes.lock();
            if !nodes.contains_key(&parent) {
                return Err(CoordError::NoNode(parent.clone()));
            }

            let full_path = if mode.is_sequential() {
                let mut counters = self.shared.counters.lock();
                let counter = counters.entry(parent.clone()).or_insert(0);
                let sequence = *counter;
                *counter += 1;
                let width = SEQUENCE_WIDTH;
                format!("{path}{sequence:0width$}")
            } else {
                path.to_string()
            };

            if nodes.contains_key(&full_path) {
                return Err(CoordError::NodeExists(full_path));
            }

            nodes.insert(
                full_path.clone(),
                MemoryNode {
                    data: Bytes::copy_from_slice(data),
                    owner: mode.is_ephemeral().then_some(self.id),
                },
            );
            full_path
        };

        self.shared.fire_watch(WatchKind::Children, &parent);
        self.shared.fire_watch(WatchKind::Data, &full_path);
        Ok(full_path)
    }

    fn get_data(&self, path: &str) -> Result<Bytes, CoordError> {
        self.check_alive()?;
        let nodes = self.shared.nodes.lock();
        nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    fn set_data(&self, path: &str, data: &[u8]) -> Result<(), CoordError> {
        self.check_alive()?;
        {
            let mut nodes = self.shared.nodes.lock();
            let node = nodes
                .get_mut(path)
                .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
            node.data = Bytes::copy_from_slice(data);
        }
        self.shared.fire_watch(WatchKind::Data, path);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), CoordError> {
        self.check_alive()?;
        {
            let mut nodes = self.shared.nodes.lock();
            if !nodes.contains_key(path) {
                return Err(CoordError::NoNode(path.to_string()));
            }
            if !MemoryShared::children_of(&nodes, path).is_empty() {
                return Err(CoordError::NotEmpty(path.to_string()));
            }
            nodes.remove(path);
        }

        self.shared.fire_watch(WatchKind::Data, path);
        if let Some(parent) = MemoryShared::parent_of(path) {
            self.shared.fire_watch(WatchKind::Children, parent);
        }
        Ok(())
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        self.check_alive()?;
        let nodes = self.shared.nodes.lock();
        if !nodes.contains_key(path) {
            return Err(CoordError::NoNode(path.to_string()));
        }
        Ok(MemoryShared::children_of(&nodes, path))
    }

    fn watch_children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        let children = self.get_children(path)?;
        self.register_watch(WatchKind::Children, path);
        Ok(children)
    }

    fn watch_data(&self, path: &str) -> Result<Option<Bytes>, CoordError> {
        self.check_alive()?;
        self.register_watch(WatchKind::Data, path);
        let nodes = self.shared.nodes.lock();
        Ok(nodes.get(path).map(|node| node.data.clone()))
    }

    fn close(&self) {
        if self.shared.sessions.contains_key(&self.id) {
            debug!(session = self.id, "memory coordination session closed");
            self.shared.remove_session(self.id);
        }
    }
}
