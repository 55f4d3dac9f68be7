mod common;

use async_trait::async_trait;
use common::wait_until;
use parking_lot::Mutex;
use rookery::cluster::controller::{ServerEvent, ServerLifecycle, ServerStatus, StatusController};
use rookery::cluster::supervisor::{ServiceLevel, ServiceSupervisor};
use rookery::errors::RookeryError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct RecordingLifecycle {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_next_start: AtomicBool,
    statuses: Mutex<Vec<ServerStatus>>,
}

#[async_trait]
impl ServerLifecycle for RecordingLifecycle {
    async fn start_server(&self) -> Result<(), RookeryError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(RookeryError::StartFailed("injected".to_string()));
        }
        Ok(())
    }

    async fn stop_server(&self) -> Result<(), RookeryError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_status_changed(&self, status: ServerStatus) {
        self.statuses.lock().push(status);
    }
}

async fn wait_status(controller: &StatusController, status: ServerStatus) {
    tokio::time::timeout(Duration::from_secs(5), controller.wait_for(status))
        .await
        .expect("timed out waiting for status")
        .expect("controller went away");
}

#[tokio::test]
async fn test_activation_without_dependencies_runs() {
    let supervisor = ServiceSupervisor::new();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    assert_eq!(controller.status(), ServerStatus::Unknown);
    controller.activate();
    wait_status(&controller, ServerStatus::Running).await;

    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);
    let statuses = lifecycle.statuses.lock().clone();
    assert_eq!(
        statuses,
        vec![
            ServerStatus::Waiting,
            ServerStatus::Starting,
            ServerStatus::Running
        ]
    );
}

#[tokio::test]
async fn test_waits_for_crucial_dependency() {
    let supervisor = ServiceSupervisor::new();
    let dependency = supervisor.register("db", ServiceLevel::Crucial).unwrap();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.activate();
    wait_status(&controller, ServerStatus::Waiting).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.status(), ServerStatus::Waiting);
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 0);

    dependency.enable();
    wait_status(&controller, ServerStatus::Running).await;
}

#[tokio::test]
async fn test_degraded_dependency_sends_running_back_to_waiting() {
    let supervisor = ServiceSupervisor::new();
    let dependency = supervisor.register("db", ServiceLevel::Crucial).unwrap();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.activate();
    dependency.enable();
    wait_status(&controller, ServerStatus::Running).await;

    dependency.disable(Some("gone".to_string()));
    wait_status(&controller, ServerStatus::Waiting).await;

    // Recovery starts the application again.
    dependency.enable();
    wait_status(&controller, ServerStatus::Running).await;
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_trivial_dependency_does_not_gate() {
    let supervisor = ServiceSupervisor::new();
    let trivial = supervisor.register("metrics", ServiceLevel::Trivial).unwrap();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.activate();
    wait_status(&controller, ServerStatus::Running).await;

    trivial.disable(None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.status(), ServerStatus::Running);
}

#[tokio::test]
async fn test_stop_runs_the_stop_hook() {
    let supervisor = ServiceSupervisor::new();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.activate();
    wait_status(&controller, ServerStatus::Running).await;

    controller.stop();
    wait_status(&controller, ServerStatus::Stopped).await;
    assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 1);

    // A stopped server can be activated again.
    controller.activate();
    wait_status(&controller, ServerStatus::Running).await;
}

#[tokio::test]
async fn test_stop_before_activation_goes_straight_to_stopped() {
    let supervisor = ServiceSupervisor::new();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.stop();
    wait_status(&controller, ServerStatus::Stopped).await;
    assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_start_returns_to_waiting() {
    let supervisor = ServiceSupervisor::new();
    let dependency = supervisor.register("db", ServiceLevel::Crucial).unwrap();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    lifecycle.fail_next_start.store(true, Ordering::SeqCst);
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.activate();
    dependency.enable();

    let lifecycle_probe = lifecycle.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            lifecycle_probe.starts.load(Ordering::SeqCst) == 1
        })
        .await
    );
    wait_status(&controller, ServerStatus::Waiting).await;

    // A dependency wiggle re-checks readiness and retries the start.
    dependency.disable(None);
    dependency.enable();
    wait_status(&controller, ServerStatus::Running).await;
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stray_events_are_ignored() {
    let supervisor = ServiceSupervisor::new();
    let dependency = supervisor.register("db", ServiceLevel::Crucial).unwrap();
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let controller = StatusController::spawn(supervisor, lifecycle.clone());

    controller.activate();
    wait_status(&controller, ServerStatus::Waiting).await;

    // Started is meaningless in WAITING; the machine must not move.
    controller.post(ServerEvent::Started);
    controller.post(ServerEvent::Stopped);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.status(), ServerStatus::Waiting);

    dependency.enable();
    wait_status(&controller, ServerStatus::Running).await;
}

#[tokio::test]
async fn test_status_partitions() {
    assert!(ServerStatus::Waiting.is_active());
    assert!(ServerStatus::Starting.is_active());
    assert!(ServerStatus::Running.is_active());
    assert!(ServerStatus::Stopping.is_standby());
    assert!(ServerStatus::Stopped.is_standby());
    assert!(!ServerStatus::Unknown.is_active());
    assert!(!ServerStatus::Unknown.is_standby());
}
