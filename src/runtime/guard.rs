// src/runtime/guard.rs

//! Scoped mutual exclusion for routines that must not run re-entrantly.

use crate::errors::RookeryError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Guards a routine that may be scheduled from several places but must
/// only have one live execution at a time. `enter` fails while another
/// entry is live; the returned guard clears the flag on every exit path.
#[derive(Debug, Clone)]
pub struct RunningContext {
    name: String,
    running: Arc<AtomicBool>,
}

impl RunningContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Attempts to enter the context.
    pub fn enter(&self) -> Result<RunningGuard, RookeryError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RookeryError::AlreadyRunning(self.name.clone()));
        }

        debug!("entering context '{}'", self.name);
        Ok(RunningGuard {
            name: self.name.clone(),
            running: Arc::clone(&self.running),
        })
    }
}

/// RAII guard returned by [`RunningContext::enter`].
pub struct RunningGuard {
    name: String,
    running: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        debug!("left context '{}'", self.name);
    }
}
