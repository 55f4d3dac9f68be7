// src/runtime/event.rs

//! An awaitable event that carries a value to its waiters.

use crate::errors::RookeryError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

struct EventState<T> {
    /// The latched value. `Some` means the event is triggered and late
    /// waiters return immediately.
    latched: Option<T>,
    waiters: Vec<oneshot::Sender<T>>,
}

/// An awaitable, multi-observer event.
///
/// By default the event is a completion: `notify` latches a value, every
/// current waiter is woken with it, and later waiters return immediately
/// until `reset` is called. The `auto_reset` variant clears the latch as
/// soon as it has been consumed, which turns the event into a one-shot
/// gate. `pulse` wakes current waiters without latching anything.
///
/// Cancellation is cooperative: wrap `wait()` in `tokio::select!` with a
/// `CancellationToken` or `tokio::time::timeout` as needed.
pub struct AsyncEvent<T> {
    state: Arc<Mutex<EventState<T>>>,
    auto_reset: bool,
}

impl<T> Clone for AsyncEvent<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            auto_reset: self.auto_reset,
        }
    }
}

impl<T> Default for AsyncEvent<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncEvent<T> {
    /// Creates a latched completion event.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState {
                latched: None,
                waiters: Vec::new(),
            })),
            auto_reset: false,
        }
    }

    /// Creates an event whose latch clears as soon as it is consumed by a
    /// waiter or by a notification that woke someone.
    pub fn auto_reset() -> Self {
        Self {
            auto_reset: true,
            ..Self::new()
        }
    }

    /// Whether the event is currently triggered.
    pub fn is_triggered(&self) -> bool {
        self.state.lock().latched.is_some()
    }

    /// Clears the latched state, if any.
    pub fn reset(&self) {
        self.state.lock().latched = None;
    }
}

impl<T: Clone> AsyncEvent<T> {
    /// Waits until the event is triggered and returns the posted value.
    /// Returns immediately if the event is already latched.
    pub async fn wait(&self) -> Result<T, RookeryError> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(value) = state.latched.clone() {
                if self.auto_reset {
                    state.latched = None;
                }
                return Ok(value);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        };

        rx.await.map_err(|_| RookeryError::ChannelClosed)
    }

    /// Triggers the event, waking every current waiter with `value`.
    pub fn notify(&self, value: T) {
        let waiters = {
            let mut state = self.state.lock();
            state.latched = Some(value.clone());
            if self.auto_reset && !state.waiters.is_empty() {
                state.latched = None;
            }
            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
    }

    /// Wakes every current waiter with `value` without changing the latched
    /// state.
    pub fn pulse(&self, value: T) {
        let waiters = std::mem::take(&mut self.state.lock().waiters);
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
    }
}
