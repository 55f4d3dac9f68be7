use rookery::config::{ClusterConfig, WorkingMode};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_defaults_are_disabled_singleton() {
    let config = ClusterConfig::default();
    assert!(!config.enabled);
    assert_eq!(config.working_mode, WorkingMode::Modulo);
    assert_eq!(config.max_working_nodes, 1);
    assert_eq!(config.reconnect_interval, Duration::from_secs(3));
    assert_eq!(config.path_working_apps, "/rookery/working-apps");
}

#[test]
fn test_parse_full_cluster_table() {
    let toml = r#"
        [cluster]
        enabled = true
        hosts = "zk1:2181,zk2:2181"
        service_name = "svca"
        reconnect_interval = "5s"
        working_mode = "hash_ring"
        max_working_nodes = 4
        path_working_apps = "/apps/working"
        path_alive_apps = "/apps/alive"
        path_app_locks = "/apps/locks"
    "#;

    let config = ClusterConfig::from_toml_str(toml).unwrap();
    assert!(config.enabled);
    assert_eq!(config.hosts, "zk1:2181,zk2:2181");
    assert_eq!(config.service_name, "svca");
    assert_eq!(config.reconnect_interval, Duration::from_secs(5));
    assert_eq!(config.working_mode, WorkingMode::HashRing);
    assert_eq!(config.max_working_nodes, 4);
}

#[test]
fn test_derived_paths() {
    let toml = r#"
        [cluster]
        enabled = true
        service_name = "svca"
    "#;

    let config = ClusterConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.working_root(), "/rookery/working-apps/svca");
    assert_eq!(config.alive_root(), "/rookery/alive-apps/svca");
    assert_eq!(
        config.lock_root("working-mode"),
        "/rookery/app-locks/svca/working-mode"
    );
}

#[test]
fn test_missing_table_parses_as_disabled() {
    let config = ClusterConfig::from_toml_str("").unwrap();
    assert!(!config.enabled);
}

#[test]
fn test_enabled_requires_service_name() {
    let toml = r#"
        [cluster]
        enabled = true
    "#;
    assert!(ClusterConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_max_working_nodes_must_be_positive() {
    let toml = r#"
        [cluster]
        enabled = true
        service_name = "svca"
        max_working_nodes = 0
    "#;
    assert!(ClusterConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_invalid_working_mode_is_rejected() {
    let toml = r#"
        [cluster]
        enabled = true
        service_name = "svca"
        working_mode = "round_robin"
    "#;
    assert!(ClusterConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_paths_must_be_absolute() {
    let toml = r#"
        [cluster]
        enabled = true
        service_name = "svca"
        path_working_apps = "relative/working"
    "#;
    assert!(ClusterConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_zero_reconnect_interval_is_rejected() {
    let toml = r#"
        [cluster]
        enabled = true
        service_name = "svca"
        reconnect_interval = "0s"
    "#;
    assert!(ClusterConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_disabled_section_skips_validation() {
    let toml = r#"
        [cluster]
        enabled = false
        max_working_nodes = 7
    "#;
    let config = ClusterConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.max_working_nodes, 7);
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[cluster]\nenabled = true\nservice_name = \"svca\"\nmax_working_nodes = 2"
    )
    .unwrap();

    let config = ClusterConfig::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(config.enabled);
    assert_eq!(config.max_working_nodes, 2);
}

#[test]
fn test_from_file_missing() {
    assert!(ClusterConfig::from_file("/definitely/not/here.toml").is_err());
}
