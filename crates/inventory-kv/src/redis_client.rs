use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use inventory_core::StorageError;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::client::{DEFAULT_REQUEST_TIMEOUT, DELETE_IF_EQUALS_SCRIPT};
use crate::store::KvStore;

/// Port Redis listens on unless told otherwise.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// [`KvStore`] speaking the Redis protocol directly.
///
/// One multiplexed connection is opened on first use and shared by every
/// command after that.
pub struct RedisClient {
    client: redis::Client,
    address: String,
    request_timeout: Duration,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisClient {
    /// Client for the server at `host:port`, authenticating with `password`
    /// when set. No connection is made until the first command.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: Option<String>,
    ) -> Result<Self, StorageError> {
        let host = host.into();
        let address = format!("{}:{}", host, port);
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                password,
                ..Default::default()
            },
        };
        let client = redis::Client::open(info).map_err(|e| {
            StorageError::Internal(format!("Invalid Redis address {}: {}", address, e))
        })?;
        Ok(Self {
            client,
            address,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connection: OnceCell::new(),
        })
    }

    /// Fail any connect or command that takes longer than `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result
                .map_err(|e| StorageError::Io(format!("Redis {} failed: {}", what, e))),
            Err(_) => Err(StorageError::Io(format!(
                "Redis {} timed out after {:?}",
                what, self.request_timeout
            ))),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StorageError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                debug!("Connecting to Redis at {}", self.address);
                self.bounded(
                    "connect",
                    self.client.get_multiplexed_async_connection(),
                )
                .await
            })
            .await?;
        Ok(connection.clone())
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        name: &str,
        cmd: &redis::Cmd,
    ) -> Result<T, StorageError> {
        let mut connection = self.connection().await?;
        self.bounded(name, cmd.query_async(&mut connection)).await
    }
}

#[async_trait]
impl KvStore for RedisClient {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value: Option<String> = self.query("GET", redis::cmd("GET").arg(key)).await?;
        match &value {
            Some(value) => debug!("Redis GET {} ({} bytes)", key, value.len()),
            None => debug!("Redis key not found: {}", key),
        }
        Ok(value)
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _: () = self
            .query("SET", redis::cmd("SET").arg(key).arg(value))
            .await?;
        debug!("Redis SET {} ({} bytes)", key, value.len());
        Ok(())
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = self
            .query(
                "SET",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms),
            )
            .await?;
        Ok(reply.as_deref() == Some("OK"))
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let deleted: i64 = self
            .query(
                "EVAL",
                redis::cmd("EVAL")
                    .arg(DELETE_IF_EQUALS_SCRIPT)
                    .arg(1)
                    .arg(key)
                    .arg(value),
            )
            .await?;
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_address_and_default_timeout() {
        let client = RedisClient::new("cache.internal", DEFAULT_REDIS_PORT, None).unwrap();
        assert_eq!(client.address(), "cache.internal:6379");
        assert_eq!(client.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_refused_connection_is_io_error() {
        // Grab a free port, then close it again.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RedisClient::new("127.0.0.1", port, Some("secret".into())).unwrap();
        let err = client.get("ansible_inventory").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(msg) if msg.contains("connect")));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept connections and never answer.
        let server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let client = RedisClient::new("127.0.0.1", port, None)
            .unwrap()
            .with_request_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = client
            .set_if_absent("lk", "v", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(msg) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }
}
