// src/cluster/server.rs

//! The serving side of the membership protocol: register an
//! ephemeral-sequential candidate, wait for a place in the active set,
//! claim a working slot under the cluster lock, and publish it.

use crate::cluster::ClusterId;
use crate::cluster::supervisor::{ExternalService, ServiceLevel, ServiceSupervisor};
use crate::config::ClusterConfig;
use crate::coord::paths::{join, name_part, sort_by_sequence, split_node_name};
use crate::coord::service::{COORDINATION_SERVICE, CoordService};
use crate::coord::session::{CreateMode, WatchKind};
use crate::errors::{CoordError, RookeryError};
use crate::runtime::event::AsyncEvent;
use crate::runtime::guard::RunningContext;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The name the cluster-membership dependency is registered under. It
/// turns `Good` once this member holds a working slot, so the status
/// controller keeps a queued member in WAITING.
pub const CLUSTER_SERVICE: &str = "cluster";

/// Name of the lock that serialises slot assignment across the cluster.
const WORKING_MODE_LOCK: &str = "working-mode";

/// How long to wait for the slot-assignment lock before backing off to the
/// next membership change.
const SLOT_LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Default)]
struct MembershipState {
    /// Whether our candidate and alive nodes exist under the current
    /// session.
    registered: bool,
    /// Full path of our working candidate.
    candidate: Option<String>,
    /// The slot we claimed, once in working mode.
    slot: Option<usize>,
}

/// Drives one process's participation in a service cluster.
///
/// The server reacts to two event streams, both consumed on a single task:
/// coordination-dependency transitions (register on up, reset on down) and
/// children watches on the working root (re-evaluate membership).
pub struct ClusterServer {
    config: Arc<ClusterConfig>,
    coord: Arc<CoordService>,
    supervisor: Arc<ServiceSupervisor>,
    cluster_id: ClusterId,
    /// The membership dependency: `Good` only while we hold a slot.
    service: ExternalService,
    /// Completion for the current activation; carries the claimed slot.
    ready: AsyncEvent<usize>,
    join_guard: RunningContext,
    state: Mutex<MembershipState>,
}

impl ClusterServer {
    pub fn new(
        config: Arc<ClusterConfig>,
        coord: Arc<CoordService>,
        supervisor: Arc<ServiceSupervisor>,
        cluster_id: ClusterId,
    ) -> Result<Arc<Self>, RookeryError> {
        let service = supervisor.register(CLUSTER_SERVICE, ServiceLevel::Crucial)?;
        Ok(Arc::new(Self {
            config,
            coord,
            supervisor,
            cluster_id,
            service,
            ready: AsyncEvent::new(),
            join_guard: RunningContext::new("cluster-join"),
            state: Mutex::new(MembershipState::default()),
        }))
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    /// The claimed working slot, if this member is in working mode.
    pub fn slot(&self) -> Option<usize> {
        self.state.lock().slot
    }

    /// Full path of this process's working candidate, once registered.
    pub fn candidate_path(&self) -> Option<String> {
        self.state.lock().candidate.clone()
    }

    /// Waits until this member has entered working mode and returns its
    /// slot index. Multiple observers may wait; all see the same slot. The
    /// completion resets when the coordination dependency is lost.
    pub async fn wait_ready(&self) -> Result<usize, RookeryError> {
        self.ready.wait().await
    }

    /// Spawns the membership task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            // Singleton mode: no coordination, the sole member owns slot 0.
            info!(
                service = %self.config.service_name,
                "cluster disabled, serving as a singleton"
            );
            self.state.lock().slot = Some(0);
            self.ready.notify(0);
            self.service.enable();
            return;
        }

        let mut changes = self.supervisor.subscribe();
        let mut watches = self.coord.subscribe_watches();
        let working_root = self.config.working_root();

        // The dependency may have come up before this task subscribed.
        if self.coord.is_connected() {
            self.on_coordination_up().await;
        }

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) if change.name == COORDINATION_SERVICE => {
                        if change.status.is_good() {
                            self.on_coordination_up().await;
                        } else {
                            self.on_coordination_down();
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        if self.coord.is_connected() {
                            self.on_coordination_up().await;
                        } else {
                            self.on_coordination_down();
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                event = watches.recv() => match event {
                    Ok(event) if event.kind == WatchKind::Children && event.path == working_root => {
                        if let Err(e) = self.evaluate_membership().await {
                            warn!("membership evaluation failed: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "watch bus lagged, re-evaluating membership");
                        if let Err(e) = self.evaluate_membership().await {
                            warn!("membership evaluation failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("cluster server task exiting");
    }

    async fn on_coordination_up(&self) {
        if self.state.lock().registered {
            return;
        }

        match self.register().await {
            Ok(()) => {
                if let Err(e) = self.evaluate_membership().await {
                    warn!("membership evaluation failed: {}", e);
                }
            }
            Err(e) => {
                // The next dependency transition or watch fire retries.
                error!("failed to register cluster candidate: {}", e);
            }
        }
    }

    /// Ensures the service paths exist, installs the children watch, and
    /// creates this process's candidate and alive nodes.
    async fn register(&self) -> Result<(), RookeryError> {
        let working_root = self.config.working_root();
        let alive_root = self.config.alive_root();
        let candidate_prefix = join(&working_root, &format!("{}.", self.cluster_id));
        let alive_path = join(&alive_root, self.cluster_id.as_str());

        let candidate = self
            .coord
            .with_session(move |session| {
                session.ensure_path(&working_root)?;
                session.ensure_path(&alive_root)?;
                session.watch_children(&working_root)?;
                let candidate =
                    session.create(&candidate_prefix, b"", CreateMode::EphemeralSequential)?;
                match session.create(&alive_path, b"", CreateMode::Ephemeral) {
                    Ok(_) | Err(CoordError::NodeExists(_)) => {}
                    Err(e) => return Err(e),
                }
                Ok(candidate)
            })
            .await?;

        info!(candidate = %candidate, "registered cluster candidate");
        let mut state = self.state.lock();
        state.registered = true;
        state.candidate = Some(candidate);
        Ok(())
    }

    /// The session and everything ephemeral it owned are gone; the join
    /// protocol restarts from scratch on the next recovery.
    fn on_coordination_down(&self) {
        let mut state = self.state.lock();
        if !state.registered && state.slot.is_none() {
            return;
        }

        info!(
            cluster_id = %self.cluster_id,
            "coordination lost, leaving the working set"
        );
        state.registered = false;
        state.candidate = None;
        state.slot = None;
        drop(state);
        self.ready.reset();
        self.service.disable(Some("coordination lost".to_string()));
    }

    /// Checks whether this member has reached the active set, and if so
    /// claims a slot under the cluster-wide lock.
    async fn evaluate_membership(&self) -> Result<(), RookeryError> {
        {
            let state = self.state.lock();
            // Already in working mode; membership changes are for the
            // still-waiting members to react to.
            if state.slot.is_some() {
                debug!(
                    service = %self.config.service_name,
                    "cluster nodes changed, ignore..."
                );
                return Ok(());
            }
            if !state.registered {
                return Ok(());
            }
        }

        // Overlapping watch fires must not run the join twice; the loser
        // simply waits for the next fire.
        let Ok(_guard) = self.join_guard.enter() else {
            debug!("join already in progress, skip");
            return Ok(());
        };

        let working_root = self.config.working_root();
        let root = working_root.clone();
        let mut children = self
            .coord
            .with_session(move |session| session.get_children(&root))
            .await?;

        sort_by_sequence(&mut children);
        children.truncate(self.config.max_working_nodes);

        let in_active_set = children
            .iter()
            .filter_map(|child| name_part(child))
            .any(|name| name == self.cluster_id.as_str());
        if !in_active_set {
            debug!(
                service = %self.config.service_name,
                "cluster nodes changed, but this instance still needs to wait"
            );
            return Ok(());
        }

        let lock_root = self.config.lock_root(WORKING_MODE_LOCK);
        let mut lock = self.coord.create_lock(&lock_root, self.cluster_id.as_str());
        match tokio::time::timeout(SLOT_LOCK_TIMEOUT, lock.acquire()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                lock.abort().await;
                return Err(e);
            }
            Err(_) => {
                warn!("timed out waiting for the slot-assignment lock, staying in the queue");
                lock.abort().await;
                return Ok(());
            }
        }

        let claimed = self.claim_slot().await;
        let released = lock.release().await;
        let slot = claimed?;
        released?;

        let Some(slot) = slot else {
            debug!(
                service = %self.config.service_name,
                "active set shifted while queueing for the lock, keep waiting"
            );
            return Ok(());
        };

        self.state.lock().slot = Some(slot);
        info!(
            cluster_id = %self.cluster_id,
            slot,
            "entered working mode"
        );
        self.ready.notify(slot);
        self.service.enable();
        Ok(())
    }

    /// Picks the first free slot among the active members and publishes it
    /// to our candidate node. Must be called while holding the
    /// slot-assignment lock: the active set is re-derived here so that
    /// every claim that happened before ours is visible. Returns `None`
    /// when this member fell out of the active set while it queued.
    async fn claim_slot(&self) -> Result<Option<usize>, RookeryError> {
        let working_root = self.config.working_root();
        let cluster_id = self.cluster_id.to_string();
        let max = self.config.max_working_nodes;

        let claimed = self
            .coord
            .with_session(move |session| {
                let mut children = session.get_children(&working_root)?;
                sort_by_sequence(&mut children);
                children.truncate(max);

                // The slot vector is sized by the cluster cap, not by the
                // current active count, so indices claimed by members with
                // later sequence positions stay visible.
                let mut slots: Vec<Option<String>> = vec![None; max];
                let mut own_child: Option<String> = None;

                for child in &children {
                    let Some((name, _)) = split_node_name(child) else {
                        continue;
                    };
                    let path = join(&working_root, child);
                    if name == cluster_id {
                        own_child = Some(path);
                        continue;
                    }

                    let data: Bytes = match session.get_data(&path) {
                        Ok(data) => data,
                        // The peer vanished between the listing and this
                        // read; its slot is simply unclaimed.
                        Err(CoordError::NoNode(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    if data.is_empty() {
                        continue;
                    }

                    let text = String::from_utf8_lossy(&data);
                    match text.trim().parse::<usize>() {
                        Ok(index) if index < max => {
                            slots[index] = Some(name.to_string());
                        }
                        Ok(index) => {
                            warn!(peer = name, index, "peer claimed an out-of-range slot, skipping");
                        }
                        Err(_) => {
                            warn!(peer = name, data = %text, "peer published malformed slot data, skipping");
                        }
                    }
                }

                let Some(own_child) = own_child else {
                    return Ok(None);
                };
                let Some(slot) = slots.iter().position(|owner| owner.is_none()) else {
                    warn!("every working slot is claimed, staying in the queue");
                    return Ok(None);
                };

                session.set_data(&own_child, slot.to_string().as_bytes())?;
                Ok(Some(slot))
            })
            .await?;

        Ok(claimed)
    }
}
