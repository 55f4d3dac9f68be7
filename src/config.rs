// src/config.rs

//! Manages cluster configuration: loading, validation, and derivation of
//! the coordination-service paths used by the membership protocol.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// The node-allocation strategy used to map a request key to a working
/// member of the cluster.
///
/// `Modulo` requires integer keys and yields a stable, index-addressed
/// routing (useful for sharded data). `HashRing` accepts arbitrary text
/// keys and minimises reshuffling when membership changes, but provides
/// no dense integer index.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkingMode {
    #[default]
    Modulo,
    HashRing,
}

/// Holds all configuration settings related to cluster coordination.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    /// If `false`, the cluster layer is disabled entirely and the host
    /// service behaves as a singleton.
    #[serde(default)]
    pub enabled: bool,
    /// Comma-separated `host:port` list of the coordination service.
    #[serde(default = "default_hosts")]
    pub hosts: String,
    /// The short, lower-case name of the service cluster to join.
    #[serde(default)]
    pub service_name: String,
    /// Back-off between reconnection attempts after a lost session.
    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,
    /// How request keys are mapped to working members.
    #[serde(default)]
    pub working_mode: WorkingMode,
    /// The number of working slots the cluster offers. Members beyond this
    /// cap queue up until a slot frees.
    #[serde(default = "default_max_working_nodes")]
    pub max_working_nodes: usize,
    /// Root under which each service keeps its working candidates.
    #[serde(default = "default_path_working_apps")]
    pub path_working_apps: String,
    /// Root under which each service keeps its alive markers.
    #[serde(default = "default_path_alive_apps")]
    pub path_alive_apps: String,
    /// Root under which each service keeps its lock queues.
    #[serde(default = "default_path_app_locks")]
    pub path_app_locks: String,
}

fn default_hosts() -> String {
    "127.0.0.1:2181".to_string()
}
fn default_reconnect_interval() -> Duration {
    Duration::from_secs(3)
}
fn default_max_working_nodes() -> usize {
    1
}
fn default_path_working_apps() -> String {
    "/rookery/working-apps".to_string()
}
fn default_path_alive_apps() -> String {
    "/rookery/alive-apps".to_string()
}
fn default_path_app_locks() -> String {
    "/rookery/app-locks".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: default_hosts(),
            service_name: String::new(),
            reconnect_interval: default_reconnect_interval(),
            working_mode: WorkingMode::default(),
            max_working_nodes: default_max_working_nodes(),
            path_working_apps: default_path_working_apps(),
            path_alive_apps: default_path_alive_apps(),
            path_app_locks: default_path_app_locks(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    cluster: ClusterConfig,
}

impl ClusterConfig {
    /// Creates a new `ClusterConfig` by reading and parsing the `[cluster]`
    /// table of a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load cluster config from '{path}'"))
    }

    /// Parses a `ClusterConfig` out of a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        let config = raw.cluster;
        config.validate()?;
        Ok(config)
    }

    /// Validates the parsed configuration. A disabled cluster section only
    /// has to be parseable; everything else is checked when enabled.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.service_name.trim().is_empty() {
            return Err(anyhow!("cluster.service_name cannot be empty"));
        }
        if self.hosts.trim().is_empty() {
            return Err(anyhow!("cluster.hosts cannot be empty"));
        }
        if self.max_working_nodes < 1 {
            return Err(anyhow!("cluster.max_working_nodes must be at least 1"));
        }
        if self.reconnect_interval.is_zero() {
            return Err(anyhow!("cluster.reconnect_interval cannot be zero"));
        }

        for (key, path) in [
            ("path_working_apps", &self.path_working_apps),
            ("path_alive_apps", &self.path_alive_apps),
            ("path_app_locks", &self.path_app_locks),
        ] {
            if path.trim().is_empty() {
                return Err(anyhow!("cluster.{key} cannot be empty"));
            }
            if !path.starts_with('/') {
                return Err(anyhow!(
                    "cluster.{key} must be an absolute path, got '{path}'"
                ));
            }
        }

        Ok(())
    }

    /// The root under which this service's working candidates live.
    pub fn working_root(&self) -> String {
        join_path(&self.path_working_apps, &self.service_name)
    }

    /// The root under which this service's alive markers live.
    pub fn alive_root(&self) -> String {
        join_path(&self.path_alive_apps, &self.service_name)
    }

    /// The root of a named lock queue for this service.
    pub fn lock_root(&self, lock_name: &str) -> String {
        let service_locks = join_path(&self.path_app_locks, &self.service_name);
        join_path(&service_locks, lock_name)
    }
}

/// Joins a root path and a child name, tolerating a trailing slash on the root.
fn join_path(root: &str, child: &str) -> String {
    let root = root.strip_suffix('/').unwrap_or(root);
    format!("{root}/{child}")
}
