// src/cluster/client.rs

//! The calling side of the membership protocol: watch a service's working
//! set, track each member's published slot, and keep an allocator in sync
//! so requests can be routed by key.

use crate::cluster::allocator::{NodeDesc, NodeManager, RouteKey, allocator_for};
use crate::cluster::supervisor::ServiceSupervisor;
use crate::config::ClusterConfig;
use crate::coord::paths::{join, sort_by_sequence, split_node_name};
use crate::coord::service::{COORDINATION_SERVICE, CoordService};
use crate::coord::session::WatchKind;
use crate::errors::{CoordError, RookeryError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the advisory membership bus.
const MEMBER_BUS_CAPACITY: usize = 64;

/// Maintains the routing table for one remote service cluster.
pub struct ClusterClient {
    config: Arc<ClusterConfig>,
    coord: Arc<CoordService>,
    supervisor: Arc<ServiceSupervisor>,
    manager: Mutex<NodeManager>,
    /// Candidate path -> member name, for data-watch dispatch. Entries are
    /// dropped when a member leaves; later fires on the path are ignored.
    watched_paths: DashMap<String, String>,
    members_tx: broadcast::Sender<Vec<String>>,
}

impl ClusterClient {
    pub fn new(
        config: Arc<ClusterConfig>,
        coord: Arc<CoordService>,
        supervisor: Arc<ServiceSupervisor>,
    ) -> Arc<Self> {
        let allocator = allocator_for(config.working_mode, config.max_working_nodes);
        let manager = NodeManager::new(&config.service_name, allocator);
        let (members_tx, _) = broadcast::channel(MEMBER_BUS_CAPACITY);

        Arc::new(Self {
            config,
            coord,
            supervisor,
            manager: Mutex::new(manager),
            watched_paths: DashMap::new(),
            members_tx,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// The member that should serve `key`, or `None` when the target slot
    /// is unclaimed or the cluster has no routable member.
    pub fn node_for_key(&self, key: impl Into<RouteKey>) -> Option<String> {
        self.manager.lock().node_for_key(&key.into())
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.manager.lock().is_managed(name)
    }

    /// A snapshot of the managed members and their known slots.
    pub fn nodes(&self) -> Vec<NodeDesc> {
        self.manager.lock().nodes()
    }

    /// Advisory notifications with the member names after each membership
    /// change.
    pub fn subscribe_members(&self) -> broadcast::Receiver<Vec<String>> {
        self.members_tx.subscribe()
    }

    /// Spawns the watch task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!(
                service = %self.config.service_name,
                "cluster disabled, client role not watching"
            );
            return;
        }

        let mut changes = self.supervisor.subscribe();
        let mut watches = self.coord.subscribe_watches();
        let working_root = self.config.working_root();

        if self.coord.is_connected()
            && let Err(e) = self.watch_service().await
        {
            warn!("failed to watch service nodes: {}", e);
        }

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) if change.name == COORDINATION_SERVICE && change.status.is_good() => {
                        if let Err(e) = self.watch_service().await {
                            warn!("failed to watch service nodes: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        if self.coord.is_connected()
                            && let Err(e) = self.watch_service().await
                        {
                            warn!("failed to watch service nodes: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                event = watches.recv() => match event {
                    Ok(event) => {
                        let result = if event.kind == WatchKind::Children && event.path == working_root {
                            self.sync_members().await
                        } else if event.kind == WatchKind::Data {
                            self.refresh_node_data(&event.path).await
                        } else {
                            Ok(())
                        };
                        if let Err(e) = result {
                            warn!("failed to process watch event: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "watch bus lagged, re-reading the working set");
                        if let Err(e) = self.sync_members().await {
                            warn!("failed to re-read the working set: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("cluster client task exiting");
    }

    /// Ensures the service paths exist and installs the children watch on
    /// the working root, then runs an initial sync.
    async fn watch_service(&self) -> Result<(), RookeryError> {
        let working_root = self.config.working_root();
        let alive_root = self.config.alive_root();
        self.coord
            .with_session(move |session| {
                session.ensure_path(&working_root)?;
                session.ensure_path(&alive_root)?;
                session.watch_children(&working_root)?;
                Ok(())
            })
            .await?;
        self.sync_members().await
    }

    /// Diffs the current working set against the managed members, removing
    /// departed nodes and adding new ones with a data watch each.
    async fn sync_members(&self) -> Result<(), RookeryError> {
        let working_root = self.config.working_root();
        let root = working_root.clone();
        let mut children = self
            .coord
            .with_session(move |session| session.get_children(&root))
            .await?;

        sort_by_sequence(&mut children);
        children.truncate(self.config.max_working_nodes);

        let mut new_names = Vec::with_capacity(children.len());
        let mut paths = Vec::with_capacity(children.len());
        for child in &children {
            if let Some((name, _)) = split_node_name(child) {
                new_names.push(name.to_string());
                paths.push((name.to_string(), join(&working_root, child)));
            }
        }

        let old_names = self.manager.lock().node_names();

        for old_name in &old_names {
            if !new_names.contains(old_name) {
                info!(
                    "service {} - remove old node {}",
                    self.config.service_name, old_name
                );
                self.manager.lock().remove_node(old_name);
                self.watched_paths
                    .retain(|_, name| name.as_str() != old_name.as_str());
            }
        }

        let mut added_paths = Vec::new();
        for (name, path) in &paths {
            if old_names.contains(name) {
                continue;
            }
            info!(
                "service {} - add cluster node {}",
                self.config.service_name, name
            );
            if let Err(e) = self.manager.lock().add_node(name, None) {
                warn!(
                    "service {} - cannot add node {}: {}",
                    self.config.service_name, name, e
                );
                continue;
            }
            self.watched_paths.insert(path.clone(), name.clone());
            added_paths.push(path.clone());
        }

        // Install a data watch per new member and pick up any slot it has
        // already published.
        for path in added_paths {
            let target = path.clone();
            let initial = self
                .coord
                .with_session(move |session| session.watch_data(&target))
                .await?;
            if let Some(data) = initial
                && !data.is_empty()
            {
                self.apply_node_data(&path, &data);
            }
        }

        let _ = self.members_tx.send(new_names);
        Ok(())
    }

    /// Handles a data-watch fire for one member's candidate node.
    async fn refresh_node_data(&self, path: &str) -> Result<(), RookeryError> {
        let Some(name) = self.watched_paths.get(path).map(|e| e.value().clone()) else {
            return Ok(());
        };

        let target = path.to_string();
        let data = match self
            .coord
            .with_session(move |session| session.get_data(&target))
            .await
        {
            Ok(data) => data,
            // The member left; the children watch handles the removal.
            Err(CoordError::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if data.is_empty() {
            debug!(
                "service {} - {} has no data, waiting for it...",
                self.config.service_name, name
            );
            return Ok(());
        }

        self.apply_node_data(path, &data);
        Ok(())
    }

    /// Parses a member's published slot and updates the allocator.
    fn apply_node_data(&self, path: &str, data: &[u8]) {
        let Some(name) = self.watched_paths.get(path).map(|e| e.value().clone()) else {
            return;
        };

        let mut manager = self.manager.lock();
        if !manager.is_managed(&name) {
            warn!(
                "service {} - {} is not managed any more.",
                self.config.service_name, name
            );
            return;
        }

        let text = String::from_utf8_lossy(data);
        let index = match text.trim().parse::<usize>() {
            Ok(index) if index < self.config.max_working_nodes => index,
            Ok(index) => {
                error!(
                    "service {} - {} published an out-of-range slot: {}!!",
                    self.config.service_name, name, index
                );
                return;
            }
            Err(_) => {
                error!(
                    "service {} - {} updated invalid data: {}!!",
                    self.config.service_name, name, text
                );
                return;
            }
        };

        debug!(
            "service {} - {} enters working mode on index: {}.",
            self.config.service_name, name, index
        );
        let _ = manager.update_node(&name, Some(index));
    }
}
