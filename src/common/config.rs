//! Configuration for ballast components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection URL of the cluster store; the scheme selects the backend
    /// (`consul` or `etcd`)
    #[serde(default = "default_store_address")]
    pub store_address: String,

    /// Key namespace all entries are stored under
    #[serde(default = "default_store_prefix")]
    pub store_prefix: String,

    /// VIP allocation config
    #[serde(default)]
    pub ipam: IpamConfig,

    /// Watch-loop tuning
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_store_address() -> String {
    "consul://127.0.0.1:8500".to_string()
}

fn default_store_prefix() -> String {
    "ballast".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// VIP allocation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Address ranges VIPs are drawn from, as IPv4 CIDR (`10.0.0.0/24`) or
    /// inclusive dash ranges (`10.0.0.1-10.0.0.9`)
    #[serde(default)]
    pub ranges: Vec<String>,
}

/// Watch-loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Initial delay before re-establishing a failed watch
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Cap on the re-establishment delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// How long one subscriber may stall a broadcast before it is
    /// disconnected
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Suggested snapshot-channel depth for subscribers
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

fn default_backoff_initial_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_subscriber_queue() -> usize {
    16
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

impl WatchConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus `BALLAST_*`
    /// environment overrides. With no explicit path, `ballast.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = match path {
            Some(p) => config::Config::builder().add_source(config::File::from(p.to_path_buf())),
            None => config::Config::builder()
                .add_source(config::File::with_name("ballast").required(false)),
        };

        let settings = builder
            .add_source(config::Environment::with_prefix("BALLAST").separator("__"))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ballast.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
store_address = "etcd://127.0.0.1:2379"

[ipam]
ranges = ["10.0.0.0/28"]

[watch]
send_timeout_ms = 250
"#
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.store_address, "etcd://127.0.0.1:2379");
        assert_eq!(config.store_prefix, "ballast");
        assert_eq!(config.ipam.ranges, vec!["10.0.0.0/28".to_string()]);
        assert_eq!(config.watch.send_timeout_ms, 250);
        assert_eq!(config.watch.backoff_initial_ms, 500);
    }

    #[test]
    fn test_defaults() {
        let watch = WatchConfig::default();
        assert_eq!(watch.backoff_initial(), Duration::from_millis(500));
        assert_eq!(watch.backoff_max(), Duration::from_secs(30));
        assert_eq!(watch.send_timeout(), Duration::from_secs(5));
        assert_eq!(watch.subscriber_queue, 16);
    }
}
