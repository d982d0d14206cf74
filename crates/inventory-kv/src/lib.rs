//! Key-value backend for ansible-inventory.
//!
//! The document lives under one key of a Redis-compatible store and the
//! transaction lock is an expiring key next to it. The store is reached
//! either over the Redis protocol ([`RedisClient`]) or through a REST
//! endpoint that accepts Redis commands as JSON ([`RedisRestClient`]).

pub mod backend;
pub mod client;
pub mod redis_client;
pub mod store;

pub use backend::{KvBackend, DEFAULT_INVENTORY_KEY};
pub use client::{RedisRestClient, DEFAULT_REQUEST_TIMEOUT};
pub use redis_client::{RedisClient, DEFAULT_REDIS_PORT};
pub use store::{KvStore, MemoryKvStore};
