use rookery::cluster::supervisor::{ServiceLevel, ServiceStatus, ServiceSupervisor};
use rookery::errors::RookeryError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn test_services_start_bad() {
    let supervisor = ServiceSupervisor::new();
    let service = supervisor.register("db", ServiceLevel::Crucial).unwrap();
    assert!(service.is_bad());
    assert!(service.is_crucial());
    assert_eq!(service.status(), ServiceStatus::Bad);
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let supervisor = ServiceSupervisor::new();
    supervisor.register("db", ServiceLevel::Crucial).unwrap();
    assert!(matches!(
        supervisor.register("db", ServiceLevel::Trivial),
        Err(RookeryError::DuplicateService(_))
    ));
}

#[tokio::test]
async fn test_enable_disable_notify_observers() {
    let supervisor = ServiceSupervisor::new();
    let service = supervisor.register("db", ServiceLevel::Crucial).unwrap();
    let mut changes = supervisor.subscribe();

    service.enable();
    let change = changes.recv().await.unwrap();
    assert_eq!(change.name, "db");
    assert!(change.status.is_good());

    service.disable(Some("unreachable".to_string()));
    let change = changes.recv().await.unwrap();
    assert!(change.status.is_bad());
    assert_eq!(change.issue.as_deref(), Some("unreachable"));
    assert_eq!(service.issue().as_deref(), Some("unreachable"));
}

#[tokio::test]
async fn test_crucial_ready_ignores_trivial_services() {
    let supervisor = ServiceSupervisor::new();
    let coordination = supervisor
        .register("coordination", ServiceLevel::Crucial)
        .unwrap();
    let metrics = supervisor.register("metrics", ServiceLevel::Trivial).unwrap();

    assert!(!supervisor.crucial_ready());
    coordination.enable();
    // The trivial dependency may stay bad without gating readiness.
    assert!(supervisor.crucial_ready());

    metrics.enable();
    coordination.disable(None);
    assert!(!supervisor.crucial_ready());
}

#[tokio::test]
async fn test_registration_order_is_preserved() {
    let supervisor = ServiceSupervisor::new();
    for name in ["zeta", "alpha", "mid"] {
        supervisor.register(name, ServiceLevel::Trivial).unwrap();
    }

    let names: Vec<String> = supervisor
        .services()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn test_start_all_invokes_starters() {
    let supervisor = ServiceSupervisor::new();
    supervisor.register("db", ServiceLevel::Crucial).unwrap();

    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);
    supervisor
        .attach_starter("db", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(matches!(
        supervisor.attach_starter("ghost", || {}),
        Err(RookeryError::UnknownService(_))
    ));

    supervisor.start_all();
    supervisor.start_all();
    assert_eq!(started.load(Ordering::SeqCst), 2);
}
