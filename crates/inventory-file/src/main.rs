mod config;

use clap::Parser;
use inventory_core::Inventory;
use inventory_file::FileBackend;
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

    let backend = FileBackend::new(&config.path).with_lock_timeout(config.lock_timeout());
    debug!("Inventory file: {}", backend.path().display());
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
