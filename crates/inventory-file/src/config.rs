use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use inventory_file::DEFAULT_INVENTORY_PATH;

/// Configuration for the file-backed dynamic inventory.
#[derive(Parser, Debug, Clone)]
#[command(name = "inventory-file")]
#[command(about = "Ansible dynamic inventory backed by a JSON file")]
pub struct Config {
    /// Print the whole inventory
    #[arg(long, conflicts_with = "host")]
    pub list: bool,

    /// Print the variables of one host
    #[arg(long)]
    pub host: Option<String>,

    /// Inventory file
    #[arg(long, default_value = DEFAULT_INVENTORY_PATH, env = "INVENTORY_FILE")]
    pub path: PathBuf,

    /// Seconds to wait for a busy inventory before giving up
    #[arg(long, default_value = "3", env = "INVENTORY_LOCK_TIMEOUT")]
    pub lock_timeout_secs: u64,
}

impl Config {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}
