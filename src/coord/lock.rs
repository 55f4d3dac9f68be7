// src/coord/lock.rs

//! A distributed lock built on an ephemeral-sequential queue: each
//! contender enqueues a child under the lock root, and the child with the
//! smallest sequence suffix owns the lock.

use crate::coord::paths::{join, split_node_name};
use crate::coord::service::CoordService;
use crate::coord::session::{CreateMode, WatchKind};
use crate::errors::{CoordError, RookeryError};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

/// A distributed lock handle. Acquisition has no built-in timeout; callers
/// that need one wrap [`CoordLock::acquire`] in `tokio::time::timeout` and
/// call [`CoordLock::abort`] when they give up, which removes the queued
/// candidate.
pub struct CoordLock {
    coord: Arc<CoordService>,
    root: String,
    name: String,
    /// Full path of our queue child while we hold a position in the queue.
    owned: Option<String>,
}

impl CoordLock {
    pub(crate) fn new(coord: Arc<CoordService>, root: &str, name: &str) -> Self {
        Self {
            coord,
            root: root.to_string(),
            name: name.to_string(),
            owned: None,
        }
    }

    /// Enqueues a candidate and waits until it reaches the front of the
    /// queue. If the session dies while waiting, the candidate vanishes and
    /// the wait fails on the next session operation.
    pub async fn acquire(&mut self) -> Result<(), RookeryError> {
        // Subscribe before creating the candidate so no queue change
        // between creation and the first read can be missed.
        let mut watches = self.coord.subscribe_watches();

        let root = self.root.clone();
        let prefix = format!("{}/{}.", self.root, self.name);
        let owned = self
            .coord
            .with_session(move |session| {
                session.ensure_path(&root)?;
                session.create(&prefix, b"", CreateMode::EphemeralSequential)
            })
            .await?;
        debug!(candidate = %owned, "queued for lock");
        self.owned = Some(owned);

        loop {
            let root = self.root.clone();
            let children = self
                .coord
                .with_session(move |session| session.watch_children(&root))
                .await?;

            if self.holds_front(&children) {
                debug!(root = %self.root, "lock acquired");
                return Ok(());
            }

            // Wait for the queue to change.
            loop {
                match watches.recv().await {
                    Ok(event) if event.kind == WatchKind::Children && event.path == self.root => {
                        break;
                    }
                    Ok(_) => continue,
                    // Missed events are harmless: the queue is re-read.
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Err(RookeryError::ChannelClosed),
                }
            }
        }
    }

    /// Whether our candidate holds the smallest sequence in the queue.
    fn holds_front(&self, children: &[String]) -> bool {
        let mut front: Option<(&str, u64)> = None;
        for child in children {
            if let Some((name, sequence)) = split_node_name(child)
                && front.is_none_or(|(_, smallest)| sequence < smallest)
            {
                front = Some((name, sequence));
            }
        }
        front.is_some_and(|(name, _)| name == self.name)
    }

    /// Releases the lock by deleting the owned child. A failed release is
    /// fatal for the caller: the queue may now be stuck behind a zombie
    /// candidate until this session ends.
    pub async fn release(&mut self) -> Result<(), RookeryError> {
        let Some(path) = self.owned.take() else {
            return Err(RookeryError::LockNotHeld);
        };

        let target = path.clone();
        match self
            .coord
            .with_session(move |session| session.delete(&target))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(candidate = %path, "lock release error: {}", e);
                Err(RookeryError::LockRelease(path))
            }
        }
    }

    /// Abandons an acquisition: removes our queue child, if any, including
    /// one whose creation raced a cancelled `acquire`. Best effort.
    pub async fn abort(&mut self) {
        let owned = self.owned.take();
        let root = self.root.clone();
        let name = self.name.clone();

        let result = self
            .coord
            .with_session(move |session| {
                if let Some(path) = owned {
                    return match session.delete(&path) {
                        Ok(()) | Err(CoordError::NoNode(_)) => Ok(()),
                        Err(e) => Err(e),
                    };
                }

                // The create may have completed without the caller ever
                // observing the resulting path.
                let children = session.get_children(&root)?;
                for child in children {
                    if split_node_name(&child).is_some_and(|(n, _)| n == name) {
                        let _ = session.delete(&join(&root, &child));
                    }
                }
                Ok(())
            })
            .await;

        if let Err(e) = result {
            warn!(root = %self.root, "failed to abort lock acquisition: {}", e);
        }
    }

    /// Whether this handle currently holds a queue position.
    pub fn is_queued(&self) -> bool {
        self.owned.is_some()
    }
}

impl Drop for CoordLock {
    fn drop(&mut self) {
        if let Some(path) = &self.owned {
            // The ephemeral child still vanishes with the session, but a
            // leaked handle blocks the queue until then.
            warn!(candidate = %path, "lock handle dropped while queued");
        }
    }
}
