use std::time::Duration;

use clap::{ArgGroup, Parser};
use inventory_kv::{DEFAULT_INVENTORY_KEY, DEFAULT_REDIS_PORT};

/// Configuration for the KV-backed dynamic inventory.
///
/// The store is either a Redis server (`--redis-host`) or a REST endpoint
/// taking Redis commands as JSON (`--url`).
#[derive(Parser, Debug, Clone)]
#[command(name = "inventory-kv")]
#[command(about = "Ansible dynamic inventory backed by Redis or a Redis-compatible REST store")]
#[command(group(ArgGroup::new("endpoint").required(true).args(["url", "redis_host"])))]
pub struct Config {
    /// Print the whole inventory
    #[arg(long, conflicts_with = "host")]
    pub list: bool,

    /// Print the variables of one host
    #[arg(long)]
    pub host: Option<String>,

    /// Redis server host name
    #[arg(long, env = "INVENTORY_REDIS_HOST")]
    pub redis_host: Option<String>,

    /// Redis server port
    #[arg(long, default_value_t = DEFAULT_REDIS_PORT, env = "INVENTORY_REDIS_PORT")]
    pub redis_port: u16,

    /// Redis password
    #[arg(long, env = "INVENTORY_REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Base URL of the REST endpoint
    #[arg(long, env = "INVENTORY_KV_URL")]
    pub url: Option<String>,

    /// Bearer token for the REST endpoint
    #[arg(long, env = "INVENTORY_KV_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Key holding the inventory document
    #[arg(long, default_value = DEFAULT_INVENTORY_KEY, env = "INVENTORY_KV_KEY")]
    pub inventory_key: String,

    /// Seconds to wait for a busy inventory before giving up
    #[arg(long, default_value = "3", env = "INVENTORY_LOCK_TIMEOUT")]
    pub lock_timeout_secs: u64,
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_endpoint() {
        let config =
            Config::try_parse_from(["inventory-kv", "--list", "--redis-host", "cache"]).unwrap();
        assert_eq!(config.redis_host.as_deref(), Some("cache"));
        assert_eq!(config.redis_port, 6379);
        assert_eq!(config.url, None);
    }

    #[test]
    fn test_rest_endpoint_with_host_query() {
        let config = Config::try_parse_from([
            "inventory-kv",
            "--host",
            "web1",
            "--url",
            "https://kv.example.com",
        ])
        .unwrap();
        assert_eq!(config.host.as_deref(), Some("web1"));
        assert_eq!(config.url.as_deref(), Some("https://kv.example.com"));
        assert_eq!(config.lock_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_exactly_one_endpoint() {
        assert!(Config::try_parse_from(["inventory-kv", "--list"]).is_err());
        assert!(Config::try_parse_from([
            "inventory-kv",
            "--list",
            "--url",
            "https://kv.example.com",
            "--redis-host",
            "cache",
        ])
        .is_err());
    }
}
