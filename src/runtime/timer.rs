// src/runtime/timer.rs

//! One-shot and restartable timers with cooperative cancellation.

use crate::errors::RookeryError;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxedHandler = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A handle to a scheduled one-shot call. Dropping the handle does not
/// cancel the call; use [`DelayedCall::cancel`].
#[derive(Debug)]
pub struct DelayedCall {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DelayedCall {
    /// Cancels the call. A cancelled call never runs its handler.
    /// Cancellation is idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the call has either fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Schedules `handler` to run once after `delay`.
pub fn schedule_after<F, Fut>(delay: Duration, handler: F) -> DelayedCall
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = cancelled.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                handler().await;
            }
        }
    });

    DelayedCall { token, handle }
}

/// A restartable one-shot timer around a fixed handler.
///
/// `start` refuses to double-start a live timer; `restart` cancels any
/// pending run first.
pub struct Timer {
    delay: Duration,
    handler: BoxedHandler,
    call: Mutex<Option<DelayedCall>>,
}

impl Timer {
    pub fn new<F, Fut>(delay: Duration, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            handler: Arc::new(move || Box::pin(handler())),
            call: Mutex::new(None),
        }
    }

    /// Whether a run is currently pending or executing.
    pub fn is_running(&self) -> bool {
        self.call
            .lock()
            .as_ref()
            .is_some_and(|call| !call.is_finished())
    }

    /// Arms the timer. Fails if it is already armed.
    pub fn start(&self) -> Result<(), RookeryError> {
        let mut call = self.call.lock();
        if call.as_ref().is_some_and(|call| !call.is_finished()) {
            return Err(RookeryError::TimerAlreadyStarted);
        }

        let handler = Arc::clone(&self.handler);
        *call = Some(schedule_after(self.delay, move || handler()));
        Ok(())
    }

    /// Cancels a pending run, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(call) = self.call.lock().take() {
            call.cancel();
        }
    }

    /// Cancels any pending run and arms the timer again.
    pub fn restart(&self) {
        self.cancel();
        // cancel() cleared the slot, so this cannot fail
        let _ = self.start();
    }
}
