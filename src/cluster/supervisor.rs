// src/cluster/supervisor.rs

//! Tracks the health of the external services a server depends on and
//! notifies the status controller when any of them changes.

use crate::errors::RookeryError;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the status-change bus. Dependency transitions are rare;
/// consumers that lag simply re-read the current health.
const CHANGE_BUS_CAPACITY: usize = 256;

/// How much a dependency matters: crucial dependencies gate readiness,
/// trivial ones do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLevel {
    Trivial,
    Crucial,
}

impl ServiceLevel {
    pub fn is_crucial(&self) -> bool {
        matches!(self, ServiceLevel::Crucial)
    }
}

/// The observed health of an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Good,
    Bad,
}

impl ServiceStatus {
    pub fn is_good(&self) -> bool {
        matches!(self, ServiceStatus::Good)
    }

    pub fn is_bad(&self) -> bool {
        !self.is_good()
    }
}

/// A status transition published on the supervisor's change bus.
#[derive(Debug, Clone)]
pub struct ServiceStatusChange {
    pub name: String,
    pub level: ServiceLevel,
    pub status: ServiceStatus,
    pub issue: Option<String>,
}

struct ServiceHealth {
    status: ServiceStatus,
    issue: Option<String>,
}

struct ServiceInner {
    name: String,
    level: ServiceLevel,
    health: Mutex<ServiceHealth>,
    changes: broadcast::Sender<ServiceStatusChange>,
}

/// A handle to one external dependency. Services start `Bad` and are
/// enabled once their owner observes them healthy; the level is fixed at
/// registration.
#[derive(Clone)]
pub struct ExternalService {
    inner: Arc<ServiceInner>,
}

impl ExternalService {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn level(&self) -> ServiceLevel {
        self.inner.level
    }

    pub fn is_crucial(&self) -> bool {
        self.inner.level.is_crucial()
    }

    pub fn status(&self) -> ServiceStatus {
        self.inner.health.lock().status
    }

    pub fn is_good(&self) -> bool {
        self.status().is_good()
    }

    pub fn is_bad(&self) -> bool {
        self.status().is_bad()
    }

    pub fn issue(&self) -> Option<String> {
        self.inner.health.lock().issue.clone()
    }

    /// Marks the service usable and notifies observers.
    pub fn enable(&self) {
        info!("external service {} enabled...", self.inner.name);
        {
            let mut health = self.inner.health.lock();
            health.status = ServiceStatus::Good;
            health.issue = None;
        }
        self.publish(None);
    }

    /// Marks the service unusable and notifies observers.
    pub fn disable(&self, issue: Option<String>) {
        info!("external service {} disabled!!!", self.inner.name);
        {
            let mut health = self.inner.health.lock();
            health.status = ServiceStatus::Bad;
            health.issue = issue.clone();
        }
        self.publish(issue);
    }

    fn publish(&self, issue: Option<String>) {
        let change = ServiceStatusChange {
            name: self.inner.name.clone(),
            level: self.inner.level,
            status: self.status(),
            issue,
        };
        if self.inner.changes.send(change).is_err() {
            debug!(
                "no observers for status change of external service {}",
                self.inner.name
            );
        }
    }
}

impl fmt::Display for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let health = self.inner.health.lock();
        write!(
            f,
            "{}-{:?}-{:?}",
            self.inner.name, health.status, self.inner.level
        )?;
        if let Some(issue) = &health.issue {
            write!(f, "({issue})")?;
        }
        Ok(())
    }
}

type Starter = Box<dyn Fn() + Send + Sync>;

struct Registered {
    service: ExternalService,
    starter: Option<Starter>,
}

/// The registry of external dependencies for one server process.
/// Registration order is preserved; duplicate registration is a programmer
/// error and surfaces as such.
pub struct ServiceSupervisor {
    services: Mutex<IndexMap<String, Registered>>,
    changes: broadcast::Sender<ServiceStatusChange>,
}

impl ServiceSupervisor {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Arc::new(Self {
            services: Mutex::new(IndexMap::new()),
            changes,
        })
    }

    /// Registers a new external service, initially `Bad`.
    pub fn register(
        &self,
        name: &str,
        level: ServiceLevel,
    ) -> Result<ExternalService, RookeryError> {
        let mut services = self.services.lock();
        if services.contains_key(name) {
            return Err(RookeryError::DuplicateService(name.to_string()));
        }

        let service = ExternalService {
            inner: Arc::new(ServiceInner {
                name: name.to_string(),
                level,
                health: Mutex::new(ServiceHealth {
                    status: ServiceStatus::Bad,
                    issue: None,
                }),
                changes: self.changes.clone(),
            }),
        };
        services.insert(
            name.to_string(),
            Registered {
                service: service.clone(),
                starter: None,
            },
        );
        Ok(service)
    }

    /// Attaches the closure that kicks the service off when the server
    /// activates.
    pub fn attach_starter<F>(&self, name: &str, starter: F) -> Result<(), RookeryError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut services = self.services.lock();
        let registered = services
            .get_mut(name)
            .ok_or_else(|| RookeryError::UnknownService(name.to_string()))?;
        registered.starter = Some(Box::new(starter));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ExternalService> {
        self.services.lock().get(name).map(|r| r.service.clone())
    }

    /// All registered services, in registration order.
    pub fn services(&self) -> Vec<ExternalService> {
        self.services
            .lock()
            .values()
            .map(|r| r.service.clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceStatusChange> {
        self.changes.subscribe()
    }

    /// Whether every crucial dependency is currently `Good`.
    pub fn crucial_ready(&self) -> bool {
        self.services
            .lock()
            .values()
            .filter(|r| r.service.is_crucial())
            .all(|r| r.service.is_good())
    }

    /// Invokes every registered starter.
    pub fn start_all(&self) {
        let services = self.services.lock();
        for registered in services.values() {
            if let Some(starter) = &registered.starter {
                debug!("starting external service {}", registered.service.name());
                starter();
            }
        }
    }
}
