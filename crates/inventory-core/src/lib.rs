//! Core of ansible-inventory: the inventory document, the mutations and
//! queries over it, and the backend contract every storage medium
//! implements.
//!
//! [`Inventory`] wraps a backend and runs every mutation as a
//! lock, reload, change, save, unlock transaction, so several processes can
//! edit the same inventory without losing each other's writes.

pub mod backend;
pub mod document;
pub mod engine;
pub mod error;
pub mod literal;
pub mod memory;
mod mutate;
pub mod pattern;

pub use backend::{poll_lock, Backoff, InventoryBackend, DEFAULT_LOCK_TIMEOUT};
pub use document::{
    value_text, Document, Group, GroupRecord, Meta, VarMap, ALL_GROUP, HOST_ADDRESS_VAR,
    HOST_PORT_VAR, META_KEY,
};
pub use engine::Inventory;
pub use error::{ErrorKind, IntoTargets, InventoryError, StorageError};
pub use literal::parse_value;
pub use memory::MemoryBackend;
pub use pattern::Pattern;
