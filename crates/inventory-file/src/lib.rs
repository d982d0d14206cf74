//! JSON file backend for ansible-inventory.
//!
//! The inventory is one JSON file guarded by advisory lock files, so any
//! number of processes on the same host can edit it safely.

pub mod backend;
pub mod lock;

pub use backend::{expand_home, FileBackend, DEFAULT_INVENTORY_PATH};
