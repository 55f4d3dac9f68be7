// src/coord/service.rs

//! Manages the coordination service as an external dependency: connection
//! status tracking, reconnection with back-off, and fan-out of watch
//! events to the cluster layer.

use crate::cluster::supervisor::{ExternalService, ServiceLevel, ServiceSupervisor};
use crate::coord::client::CoordClient;
use crate::coord::lock::CoordLock;
use crate::coord::session::{
    CoordinationBackend, CoordinationSession, SessionEvent, SessionState, WatchEvent,
};
use crate::errors::{CoordError, RookeryError};
use crate::runtime::timer::{DelayedCall, schedule_after};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// The name the coordination dependency is registered under.
pub const COORDINATION_SERVICE: &str = "coordination";

/// Fallback interval between reconnection attempts.
pub const RECONNECTION_INTERVAL: Duration = Duration::from_secs(3);

/// Capacity of the watch-event fan-out bus. Watch consumers re-read node
/// state on every fire, so a lagged receiver only costs a redundant read.
const WATCH_BUS_CAPACITY: usize = 1024;

/// The coordination service as seen by the rest of the process: a crucial
/// external dependency whose session events are consumed on a single pump
/// task and converted into status transitions and watch messages.
pub struct CoordService {
    client: CoordClient,
    service: ExternalService,
    reconnect_interval: Duration,
    state: RwLock<SessionState>,
    watch_tx: broadcast::Sender<WatchEvent>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    reconnect: Mutex<Option<DelayedCall>>,
    stopping: AtomicBool,
}

impl CoordService {
    /// Creates the service and registers it with the supervisor as a
    /// crucial dependency named [`COORDINATION_SERVICE`]. Must be called
    /// within a Tokio runtime; the event pump task starts immediately.
    pub fn new(
        backend: Arc<dyn CoordinationBackend>,
        supervisor: &ServiceSupervisor,
        reconnect_interval: Duration,
    ) -> Result<Arc<Self>, RookeryError> {
        let service = supervisor.register(COORDINATION_SERVICE, ServiceLevel::Crucial)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (watch_tx, _) = broadcast::channel(WATCH_BUS_CAPACITY);

        let interval = if reconnect_interval.is_zero() {
            RECONNECTION_INTERVAL
        } else {
            reconnect_interval
        };

        let this = Arc::new(Self {
            client: CoordClient::new(backend),
            service,
            reconnect_interval: interval,
            state: RwLock::new(SessionState::Initialized),
            watch_tx,
            events_tx,
            reconnect: Mutex::new(None),
            stopping: AtomicBool::new(false),
        });

        let starter = {
            let this = Arc::clone(&this);
            move || this.start()
        };
        supervisor.attach_starter(COORDINATION_SERVICE, starter)?;

        tokio::spawn(Arc::clone(&this).pump(events_rx));
        Ok(this)
    }

    /// Initiates the first connection attempt. Idempotent while an attempt
    /// is in flight or a session is alive.
    pub fn start(self: &Arc<Self>) {
        self.do_reconnect();
    }

    /// Stops the client and disables reconnection.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(timer) = self.reconnect.lock().take() {
            timer.cancel();
        }
        self.client.stop();
        *self.state.write() = SessionState::Closed;
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.session_state().is_connected()
    }

    /// The dependency handle tracking this service's health.
    pub fn external_service(&self) -> &ExternalService {
        &self.service
    }

    pub fn session(&self) -> Result<Arc<dyn CoordinationSession>, CoordError> {
        self.client.session()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.client.session_id()
    }

    /// Runs a blocking session operation off the async runtime.
    pub async fn with_session<T, F>(&self, op: F) -> Result<T, CoordError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CoordinationSession) -> Result<T, CoordError> + Send + 'static,
    {
        self.client.with_session(op).await
    }

    /// Subscribes to watch fires from the current (and any future) session.
    pub fn subscribe_watches(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch_tx.subscribe()
    }

    /// Creates a distributed lock rooted at `root` with this process's
    /// candidate name `name`.
    pub fn create_lock(self: &Arc<Self>, root: &str, name: &str) -> CoordLock {
        CoordLock::new(Arc::clone(self), root, name)
    }

    /// Consumes session events, one at a time, on the async runtime.
    async fn pump(self: Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::Opened => {
                    *self.state.write() = SessionState::Connected;
                    if self.service.is_good() {
                        // Recovery from suspension; the session and all its
                        // ephemeral state survived, nothing to re-announce.
                        debug!("coordination session resumed");
                    } else {
                        info!("coordination session established");
                        self.service.enable();
                    }
                }
                SessionEvent::Suspended => {
                    // The client library recovers suspended sessions on its
                    // own; initiating a new connect here would fork state.
                    warn!("coordination session suspended, waiting for recovery");
                    *self.state.write() = SessionState::Suspended;
                }
                SessionEvent::Lost => {
                    *self.state.write() = SessionState::Closed;
                    if self.stopping.load(Ordering::SeqCst) {
                        continue;
                    }
                    warn!("coordination session lost");
                    self.service.disable(Some("session lost".to_string()));
                    self.schedule_reconnect();
                }
                SessionEvent::Failed(reason) => {
                    *self.state.write() = SessionState::ConnectionFailed;
                    error!("cannot connect to the coordination service: {}", reason);
                    self.service.disable(Some(reason));
                    if !self.stopping.load(Ordering::SeqCst) {
                        self.schedule_reconnect();
                    }
                }
                SessionEvent::Watch(watch) => {
                    debug!(path = %watch.path, kind = ?watch.kind, "watch fired");
                    let _ = self.watch_tx.send(watch);
                }
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        debug!(
            "reconnecting in {:?} - current session state: {:?}",
            self.reconnect_interval,
            self.session_state()
        );
        let this = Arc::clone(self);
        let timer = schedule_after(self.reconnect_interval, move || async move {
            this.do_reconnect();
        });
        *self.reconnect.lock() = Some(timer);
    }

    /// Starts a connection attempt unless one is in flight or the current
    /// session is still usable.
    fn do_reconnect(self: &Arc<Self>) {
        {
            let mut state = self.state.write();
            if state.is_connecting() {
                debug!("a connection attempt is already in flight, skip");
                return;
            }
            if state.is_connected() || state.is_suspended() {
                debug!("coordination session is alive, skip reconnect");
                return;
            }
            *state = if *state == SessionState::Initialized {
                SessionState::Connecting
            } else {
                SessionState::Reconnecting
            };
        }

        debug!("connecting to the coordination service");
        self.client.start(self.events_tx.clone());
    }
}
