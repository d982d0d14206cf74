mod config;

use clap::Parser;
use inventory_core::Inventory;
use inventory_kv::{KvBackend, KvStore, RedisClient, RedisRestClient};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the inventory; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    match (&config.redis_host, &config.url) {
        (Some(host), _) => {
            let client =
                RedisClient::new(host.clone(), config.redis_port, config.redis_password.clone())?;
            debug!("Redis server: {}", client.address());
            run(client, &config).await
        }
        (None, Some(url)) => {
            let client = RedisRestClient::new(url.clone(), config.token.clone())?;
            debug!("KV endpoint: {}", client.base_url());
            run(client, &config).await
        }
        (None, None) => anyhow::bail!("either --redis-host or --url is required"),
    }
}

async fn run<S: KvStore>(store: S, config: &Config) -> anyhow::Result<()> {
    let backend = KvBackend::new(store, config.inventory_key.clone())
        .with_lock_timeout(config.lock_timeout());
    let mut inventory = Inventory::open(backend).await?;
    // Just loaded by open().
    inventory.next_from_cache();

    let output = match &config.host {
        Some(host) => inventory.ansible_host_json(host).await?,
        None => inventory.ansible_json().await?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
