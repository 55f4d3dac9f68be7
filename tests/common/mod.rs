// tests/common/mod.rs

//! Shared fixtures for the cluster test suite: a simulated member process
//! wired against the in-memory coordination backend, and small polling
//! helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use rookery::cluster::{
    ClusterId, ClusterServer, ServerLifecycle, ServerStatus, ServiceSupervisor, StatusController,
};
use rookery::config::{ClusterConfig, WorkingMode};
use rookery::coord::{CoordService, MemoryCoordination};
use rookery::errors::RookeryError;
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config(
    service_name: &str,
    working_mode: WorkingMode,
    max_working_nodes: usize,
) -> Arc<ClusterConfig> {
    Arc::new(ClusterConfig {
        enabled: true,
        service_name: service_name.to_string(),
        reconnect_interval: Duration::from_millis(50),
        working_mode,
        max_working_nodes,
        ..ClusterConfig::default()
    })
}

/// Application hooks for a member whose only job is to serve once its slot
/// is claimed.
pub struct JoinLifecycle {
    server: OnceLock<Arc<ClusterServer>>,
}

impl JoinLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            server: OnceLock::new(),
        })
    }

    pub fn bind(&self, server: Arc<ClusterServer>) {
        let _ = self.server.set(server);
    }
}

#[async_trait]
impl ServerLifecycle for JoinLifecycle {
    async fn start_server(&self) -> Result<(), RookeryError> {
        // The membership dependency gates STARTING, so the slot is already
        // latched by the time this hook runs.
        let server = self
            .server
            .get()
            .ok_or_else(|| RookeryError::Internal("cluster server not bound".to_string()))?;
        server.wait_ready().await.map(|_| ())
    }
}

/// One simulated member process: supervisor, coordination client, status
/// controller, and the serving side of the membership protocol.
pub struct Member {
    pub supervisor: Arc<ServiceSupervisor>,
    pub coord: Arc<CoordService>,
    pub controller: StatusController,
    pub server: Arc<ClusterServer>,
}

impl Member {
    pub fn launch(backend: &MemoryCoordination, config: Arc<ClusterConfig>, id: &str) -> Member {
        let supervisor = ServiceSupervisor::new();
        let coord = CoordService::new(
            Arc::new(backend.clone()),
            &supervisor,
            config.reconnect_interval,
        )
        .expect("register coordination service");

        let lifecycle = JoinLifecycle::new();
        let controller = StatusController::spawn(Arc::clone(&supervisor), lifecycle.clone());
        let server = ClusterServer::new(
            config,
            Arc::clone(&coord),
            Arc::clone(&supervisor),
            ClusterId::from(id),
        )
        .expect("register cluster service");

        lifecycle.bind(Arc::clone(&server));
        server.spawn();
        controller.activate();

        Member {
            supervisor,
            coord,
            controller,
            server,
        }
    }

    /// Waits until the member reaches RUNNING and returns its slot.
    pub async fn wait_running(&self) -> usize {
        tokio::time::timeout(
            Duration::from_secs(5),
            self.controller.wait_for(ServerStatus::Running),
        )
        .await
        .expect("timed out waiting for RUNNING")
        .expect("status controller went away");
        self.server.slot().expect("a running member holds a slot")
    }

    pub async fn wait_status(&self, status: ServerStatus) {
        tokio::time::timeout(Duration::from_secs(5), self.controller.wait_for(status))
            .await
            .expect("timed out waiting for status")
            .expect("status controller went away");
    }

    pub fn session_id(&self) -> u64 {
        self.coord
            .session_id()
            .expect("a connected member has a session")
    }
}

/// Polls `predicate` until it holds or `deadline` passes.
pub async fn wait_until(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
