// src/cluster/controller.rs

//! The event-driven server status state machine. A single task consumes
//! server events and dependency changes strictly one at a time, drives the
//! application lifecycle hooks, and publishes every transition.

use crate::cluster::supervisor::ServiceSupervisor;
use crate::errors::RookeryError;
use crate::runtime::timer::{DelayedCall, schedule_after};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Delay before re-checking dependencies after a failed start attempt.
const START_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// The runtime status of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Unknown,
    /// Waiting for external dependencies.
    Waiting,
    /// Dependencies are ready; the application is starting.
    Starting,
    Running,
    /// Graceful shutdown in progress.
    Stopping,
    Stopped,
}

impl ServerStatus {
    pub fn is_waiting(&self) -> bool {
        matches!(self, ServerStatus::Waiting)
    }

    pub fn is_starting(&self) -> bool {
        matches!(self, ServerStatus::Starting)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running)
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, ServerStatus::Stopping)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ServerStatus::Stopped)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServerStatus::Waiting | ServerStatus::Starting | ServerStatus::Running
        )
    }

    pub fn is_standby(&self) -> bool {
        matches!(self, ServerStatus::Stopping | ServerStatus::Stopped)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::Unknown => "unknown",
            ServerStatus::Waiting => "waiting",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Events accepted by the status controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Bring the server to the active side.
    Active,
    /// Bring the server to the standby side.
    Stop,
    /// Some external service changed health.
    ExternalServiceChanged,
    /// Every crucial external service is ready.
    ExternalServiceReady,
    Started,
    StartFailed,
    Stopped,
}

/// Application lifecycle hooks invoked by the controller. Hook errors are
/// converted into state-machine events and never escape the controller.
#[async_trait]
pub trait ServerLifecycle: Send + Sync + 'static {
    /// Runs when dependencies become ready, before `start_server`.
    async fn init_server(&self) -> Result<(), RookeryError> {
        Ok(())
    }

    /// Brings the application up. Returning `Ok` moves the server to
    /// RUNNING.
    async fn start_server(&self) -> Result<(), RookeryError>;

    /// Runs during graceful shutdown.
    async fn stop_server(&self) -> Result<(), RookeryError> {
        Ok(())
    }

    /// Observes every status transition.
    async fn on_status_changed(&self, _status: ServerStatus) {}
}

/// A cheap handle to the controller task.
#[derive(Clone)]
pub struct StatusController {
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    status_rx: watch::Receiver<ServerStatus>,
}

impl StatusController {
    /// Spawns the controller task. Must be called within a Tokio runtime.
    pub fn spawn(supervisor: Arc<ServiceSupervisor>, lifecycle: Arc<dyn ServerLifecycle>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ServerStatus::Unknown);

        let driver = ControllerDriver {
            supervisor,
            lifecycle,
            events_tx: events_tx.clone(),
            status_tx,
            status: ServerStatus::Unknown,
            start_retry: None,
        };
        tokio::spawn(driver.run(events_rx));

        Self {
            events_tx,
            status_rx,
        }
    }

    /// Enqueues an event for the controller.
    pub fn post(&self, event: ServerEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn activate(&self) {
        self.post(ServerEvent::Active);
    }

    pub fn stop(&self) {
        self.post(ServerEvent::Stop);
    }

    pub fn status(&self) -> ServerStatus {
        *self.status_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// A watch channel following every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ServerStatus> {
        self.status_rx.clone()
    }

    /// Waits until the server reaches `status`.
    pub async fn wait_for(&self, status: ServerStatus) -> Result<(), RookeryError> {
        let mut rx = self.status_rx.clone();
        while *rx.borrow_and_update() != status {
            rx.changed()
                .await
                .map_err(|_| RookeryError::ChannelClosed)?;
        }
        Ok(())
    }
}

/// The single-consumer state machine behind [`StatusController`].
struct ControllerDriver {
    supervisor: Arc<ServiceSupervisor>,
    lifecycle: Arc<dyn ServerLifecycle>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    status_tx: watch::Sender<ServerStatus>,
    status: ServerStatus,
    start_retry: Option<DelayedCall>,
}

impl ControllerDriver {
    async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<ServerEvent>) {
        let mut changes = self.supervisor.subscribe();

        loop {
            let event = tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                change = changes.recv() => match change {
                    Ok(_) | Err(RecvError::Lagged(_)) => ServerEvent::ExternalServiceChanged,
                    // Unreachable while this task holds the supervisor.
                    Err(RecvError::Closed) => continue,
                },
            };

            self.handle(event).await;
        }
        debug!("status controller task exiting");
    }

    /// Processes one event. Runs to completion before the next event is
    /// looked at; long-running work is pushed to spawned tasks that report
    /// back through the event queue.
    async fn handle(&mut self, event: ServerEvent) {
        debug!(status = %self.status, ?event, "processing server event");
        match (self.status, event) {
            (ServerStatus::Unknown | ServerStatus::Stopped, ServerEvent::Active) => {
                self.activate().await;
            }
            (ServerStatus::Unknown, ServerEvent::Stop) => {
                self.transition(ServerStatus::Stopped).await;
            }
            (
                ServerStatus::Waiting | ServerStatus::Starting | ServerStatus::Running,
                ServerEvent::Stop,
            ) => {
                self.begin_stop().await;
            }
            (ServerStatus::Waiting, ServerEvent::ExternalServiceChanged) => {
                self.reassess_dependencies();
            }
            (ServerStatus::Waiting, ServerEvent::ExternalServiceReady) => {
                self.begin_start().await;
            }
            (ServerStatus::Starting, ServerEvent::Started) => {
                self.transition(ServerStatus::Running).await;
            }
            (ServerStatus::Starting, ServerEvent::StartFailed) => {
                self.retry_after_failed_start().await;
            }
            (ServerStatus::Running, ServerEvent::ExternalServiceChanged) => {
                if !self.supervisor.crucial_ready() {
                    warn!("a crucial external service degraded, leaving RUNNING");
                    self.transition(ServerStatus::Waiting).await;
                }
            }
            (ServerStatus::Stopping, ServerEvent::Stopped) => {
                self.transition(ServerStatus::Stopped).await;
            }
            (status, event) => {
                debug!(%status, ?event, "event ignored in the current status");
            }
        }
    }

    async fn transition(&mut self, status: ServerStatus) {
        if self.status == status {
            return;
        }
        info!("server status: {} -> {}", self.status, status);
        self.status = status;
        let _ = self.status_tx.send(status);
        self.lifecycle.on_status_changed(status).await;
    }

    /// Enters WAITING, kicks every registered dependency off, and checks
    /// whether they already happen to be ready.
    async fn activate(&mut self) {
        self.transition(ServerStatus::Waiting).await;
        self.supervisor.start_all();
        self.reassess_dependencies();
    }

    fn reassess_dependencies(&mut self) {
        if self.supervisor.crucial_ready() {
            let _ = self.events_tx.send(ServerEvent::ExternalServiceReady);
        }
    }

    /// WAITING -> STARTING. The lifecycle hooks run on their own task so
    /// the controller keeps serialising events; the outcome comes back as
    /// `Started` or `StartFailed`.
    async fn begin_start(&mut self) {
        if !self.supervisor.crucial_ready() {
            debug!("readiness report is stale, staying in WAITING");
            return;
        }

        self.transition(ServerStatus::Starting).await;

        let lifecycle = Arc::clone(&self.lifecycle);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = async {
                lifecycle.init_server().await?;
                lifecycle.start_server().await
            }
            .await;

            match result {
                Ok(()) => {
                    let _ = events_tx.send(ServerEvent::Started);
                }
                Err(e) => {
                    error!("server start failed: {}", e);
                    let _ = events_tx.send(ServerEvent::StartFailed);
                }
            }
        });
    }

    /// STARTING -> WAITING after a failed start, with a delayed dependency
    /// re-check so a persistent failure does not spin.
    async fn retry_after_failed_start(&mut self) {
        self.transition(ServerStatus::Waiting).await;

        let events_tx = self.events_tx.clone();
        self.start_retry = Some(schedule_after(START_RETRY_INTERVAL, move || async move {
            let _ = events_tx.send(ServerEvent::ExternalServiceChanged);
        }));
    }

    /// Any active status -> STOPPING; `Stopped` arrives once the stop hook
    /// has run.
    async fn begin_stop(&mut self) {
        self.transition(ServerStatus::Stopping).await;
        if let Some(retry) = self.start_retry.take() {
            retry.cancel();
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.stop_server().await {
                error!("stop hook failed: {}", e);
            }
            let _ = events_tx.send(ServerEvent::Stopped);
        });
    }
}
