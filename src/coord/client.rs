// src/coord/client.rs

//! Owns the coordination-service session and the dedicated worker thread
//! that drives it. The client manages the connection and cross-thread
//! messaging only; policy (dependency status, reconnection) lives in
//! [`crate::coord::CoordService`].

use crate::coord::session::{CoordinationBackend, CoordinationSession, SessionEvent};
use crate::errors::CoordError;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

enum ControlMessage {
    Stop,
}

struct ClientShared {
    session: RwLock<Option<Arc<dyn CoordinationSession>>>,
}

/// The coordination-service client. `start` launches a worker thread that
/// opens a session and then parks on a control queue; `stop` enqueues a
/// stop control message and the thread returns. Starting again while an
/// old worker is alive retires the old worker and its session.
pub struct CoordClient {
    backend: Arc<dyn CoordinationBackend>,
    shared: Arc<ClientShared>,
    control: Mutex<Option<std_mpsc::Sender<ControlMessage>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CoordClient {
    pub fn new(backend: Arc<dyn CoordinationBackend>) -> Self {
        Self {
            backend,
            shared: Arc::new(ClientShared {
                session: RwLock::new(None),
            }),
            control: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Launches the worker thread. Session lifecycle events, including the
    /// initial `Opened` or `Failed`, are delivered on `events`.
    pub fn start(&self, events: UnboundedSender<SessionEvent>) {
        let (control_tx, control_rx) = std_mpsc::channel();
        // Dropping a previous sender wakes any old worker, which then
        // closes its (usually already dead) session and exits.
        *self.control.lock() = Some(control_tx);

        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);

        let handle = thread::spawn(move || {
            debug!("enter coordination worker thread");
            match backend.connect(events.clone()) {
                Ok(session) => {
                    *shared.session.write() = Some(Arc::clone(&session));
                    // Announce only after the session handle is installed,
                    // so consumers of Opened always find a usable session.
                    if events.send(SessionEvent::Opened).is_err() {
                        session.close();
                        return;
                    }

                    loop {
                        match control_rx.recv() {
                            Ok(ControlMessage::Stop) | Err(_) => {
                                session.close();
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::Failed(e.to_string()));
                }
            }
            debug!("leave coordination worker thread");
        });
        *self.worker.lock() = Some(handle);
    }

    /// Enqueues a stop control message for the worker thread.
    pub fn stop(&self) {
        info!("stopping coordination client");
        if let Some(control) = self.control.lock().take() {
            let _ = control.send(ControlMessage::Stop);
        }
    }

    /// Blocks until the worker thread has exited. Must not be called on
    /// the async runtime.
    pub fn wait(&self) {
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// The current session, if one has been established.
    pub fn session(&self) -> Result<Arc<dyn CoordinationSession>, CoordError> {
        self.shared
            .session
            .read()
            .clone()
            .ok_or(CoordError::NotConnected)
    }

    /// The id of the current session, if any.
    pub fn session_id(&self) -> Option<u64> {
        self.shared.session.read().as_ref().map(|s| s.id())
    }

    /// Runs a blocking session operation off the async runtime.
    pub async fn with_session<T, F>(&self, op: F) -> Result<T, CoordError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CoordinationSession) -> Result<T, CoordError> + Send + 'static,
    {
        let session = self.session()?;
        tokio::task::spawn_blocking(move || op(session.as_ref()))
            .await
            .map_err(|e| CoordError::Backend(format!("blocking session task failed: {e}")))?
    }
}
