//! Configuration for minisearch nodes
//!
//! Layered: serde defaults, then an optional TOML file, then
//! `MINISEARCH__SECTION__FIELD` environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub discovery: DiscoveryConfig,
    pub allocation: AllocationConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            discovery: DiscoveryConfig::default(),
            allocation: AllocationConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then the environment.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("MINISEARCH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("discovery.seed_hosts")
                    .try_parsing(true),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.node.cluster_name.is_empty() {
            return Err(crate::Error::InvalidConfig("cluster_name cannot be empty".into()));
        }
        if !self.node.master && !self.node.data {
            return Err(crate::Error::InvalidConfig(
                "node must have at least one of the master or data roles".into(),
            ));
        }
        // the bound address is advertised to peers as-is
        if self.node.bind_addr.ip().is_unspecified() {
            return Err(crate::Error::InvalidConfig(format!(
                "bind_addr {} is not routable; bind to a concrete interface address",
                self.node.bind_addr
            )));
        }
        if self.discovery.leader_check_retry_count == 0 {
            return Err(crate::Error::InvalidConfig(
                "leader_check_retry_count must be at least 1".into(),
            ));
        }
        let a = &self.allocation;
        if a.shard_balance_factor < 0.0 || a.index_balance_factor < 0.0 {
            return Err(crate::Error::InvalidConfig(
                "allocation balance factors must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Node identity and roles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub cluster_name: String,

    /// Human readable name; defaults to the bind address
    pub name: Option<String>,

    /// Address for node-to-node transport
    pub bind_addr: SocketAddr,

    /// Directory holding the persisted coordination state
    pub data_path: PathBuf,

    /// Master-eligible
    pub master: bool,

    /// Holds shards
    pub data: bool,

    /// Free-form attributes published with the node identity
    pub attributes: std::collections::BTreeMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster_name: "minisearch".to_string(),
            name: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9300)),
            data_path: PathBuf::from("./node-data"),
            master: true,
            data: true,
            attributes: Default::default(),
        }
    }
}

/// Discovery, election and publication timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Static seed addresses contacted on every discovery round
    pub seed_hosts: Vec<String>,

    /// Interval between discovery rounds while a candidate
    pub find_peers_interval_ms: u64,

    /// Timeout for connect handshakes and peer exchange
    pub request_peers_timeout_ms: u64,

    /// Timeout for pre-vote, start-join and join requests
    pub join_timeout_ms: u64,

    /// Timeout for a whole publication round
    pub publish_timeout_ms: u64,

    pub leader_check_interval_ms: u64,
    pub leader_check_timeout_ms: u64,
    pub leader_check_retry_count: u32,

    /// Retries of a state-update task against the latest committed state
    pub max_task_retries: u32,

    /// Largest accepted wire frame
    pub max_frame_bytes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            seed_hosts: Vec::new(),
            find_peers_interval_ms: 1_000,
            request_peers_timeout_ms: 3_000,
            join_timeout_ms: 5_000,
            publish_timeout_ms: 30_000,
            leader_check_interval_ms: 1_000,
            leader_check_timeout_ms: 10_000,
            leader_check_retry_count: 3,
            max_task_retries: 3,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

impl DiscoveryConfig {
    pub fn find_peers_interval(&self) -> Duration {
        Duration::from_millis(self.find_peers_interval_ms)
    }
    pub fn request_peers_timeout(&self) -> Duration {
        Duration::from_millis(self.request_peers_timeout_ms)
    }
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
    pub fn leader_check_interval(&self) -> Duration {
        Duration::from_millis(self.leader_check_interval_ms)
    }
    pub fn leader_check_timeout(&self) -> Duration {
        Duration::from_millis(self.leader_check_timeout_ms)
    }
}

/// Weights of the shard balancing heuristic
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Weight of the total number of shards on a node
    pub shard_balance_factor: f64,

    /// Weight of the number of shards of the same index on a node
    pub index_balance_factor: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            shard_balance_factor: 0.55,
            index_balance_factor: 0.45,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.allocation.shard_balance_factor, 0.55);
        assert_eq!(config.allocation.index_balance_factor, 0.45);
        assert_eq!(config.discovery.leader_check_retry_count, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[node]
cluster_name = "logs-prod"
bind_addr = "127.0.0.1:9400"
data = false

[discovery]
seed_hosts = ["10.0.0.1:9300", "10.0.0.2:9300"]
find_peers_interval_ms = 250
"#
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.node.cluster_name, "logs-prod");
        assert_eq!(config.node.bind_addr.port(), 9400);
        assert!(config.node.master);
        assert!(!config.node.data);
        assert_eq!(config.discovery.seed_hosts.len(), 2);
        assert_eq!(config.discovery.find_peers_interval(), Duration::from_millis(250));
        // untouched sections keep their defaults
        assert_eq!(config.discovery.join_timeout_ms, 5_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.node.cluster_name, "minisearch");
    }

    #[test]
    fn test_validate_rejects_roleless_node() {
        let mut config = Config::default();
        config.node.master = false;
        config.node.data = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unspecified_bind_addr() {
        let mut config = Config::default();
        config.node.bind_addr = "0.0.0.0:9300".parse().unwrap();
        assert!(matches!(config.validate(), Err(crate::Error::InvalidConfig(_))));
        config.node.bind_addr = "[::]:9300".parse().unwrap();
        assert!(config.validate().is_err());
        config.node.bind_addr = "127.0.0.1:0".parse().unwrap();
        assert!(config.validate().is_ok());
    }
}
