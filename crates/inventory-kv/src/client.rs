use std::time::Duration;

use async_trait::async_trait;
use inventory_core::StorageError;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::store::KvStore;

/// Upper bound on one REST round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Deletes KEYS[1] only while it still holds ARGV[1].
pub(crate) const DELETE_IF_EQUALS_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then \
     return redis.call('del', KEYS[1]) \
     else return 0 end";

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

/// Client for a Redis-compatible REST endpoint.
///
/// Each command is POSTed to the base URL as a JSON array
/// (`["SET", "key", "value"]`), and the answer comes back as
/// `{"result": ...}` or `{"error": "..."}`.
pub struct RedisRestClient {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl RedisRestClient {
    /// Create a new client. `token` is sent as a bearer token when set.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, StorageError> {
        Self::with_request_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`RedisRestClient::new`], failing any request that takes longer
    /// than `timeout`.
    pub fn with_request_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one command and return its `result`.
    async fn command(&self, args: &[&str]) -> Result<Value, StorageError> {
        let name = args.first().copied().unwrap_or_default();

        let mut request = self.http_client.post(&self.base_url).json(args);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("KV {} request failed: {}", name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::Io(format!(
                "KV {} failed with status {}: {}",
                name, status, text
            )));
        }

        let reply: Reply = response.json().await.map_err(|e| {
            StorageError::Serialization(format!("Failed to decode KV {} reply: {}", name, e))
        })?;
        match reply.error {
            Some(error) => Err(StorageError::Io(format!("KV {} failed: {}", name, error))),
            None => Ok(reply.result),
        }
    }
}

#[async_trait]
impl KvStore for RedisRestClient {
    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.command(&["GET", key]).await? {
            Value::Null => {
                debug!("KV key not found: {}", key);
                Ok(None)
            }
            Value::String(value) => {
                debug!("KV GET {} ({} bytes)", key, value.len());
                Ok(Some(value))
            }
            other => Err(StorageError::Serialization(format!(
                "Unexpected KV GET reply for {}: {}",
                key, other
            ))),
        }
    }

    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.command(&["SET", key, value]).await?;
        debug!("KV SET {} ({} bytes)", key, value.len());
        Ok(())
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let ttl_ms = ttl.as_millis().max(1).to_string();
        let reply = self
            .command(&["SET", key, value, "NX", "PX", &ttl_ms])
            .await?;
        Ok(reply.as_str() == Some("OK"))
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let reply = self
            .command(&["EVAL", DELETE_IF_EQUALS_SCRIPT, "1", key, value])
            .await?;
        Ok(reply.as_i64() == Some(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn reply_to(server: &MockServer, command: Value, reply: Value) {
        Mock::given(method("POST"))
            .and(body_json(command))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_json(json!(["GET", "ansible_inventory"])))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "{}"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = RedisRestClient::new(format!("{}/", server.uri()), Some("secret".into())).unwrap();
        assert_eq!(
            client.get("ansible_inventory").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let server = MockServer::start().await;
        reply_to(&server, json!(["GET", "nope"]), json!({"result": null})).await;

        let client = RedisRestClient::new(server.uri(), None).unwrap();
        assert_eq!(client.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_uses_nx_px() {
        let server = MockServer::start().await;
        reply_to(
            &server,
            json!(["SET", "lk", "v1", "NX", "PX", "3000"]),
            json!({"result": "OK"}),
        )
        .await;
        reply_to(
            &server,
            json!(["SET", "lk", "v2", "NX", "PX", "3000"]),
            json!({"result": null}),
        )
        .await;

        let client = RedisRestClient::new(server.uri(), None).unwrap();
        let ttl = Duration::from_secs(3);
        assert!(client.set_if_absent("lk", "v1", ttl).await.unwrap());
        assert!(!client.set_if_absent("lk", "v2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_equals_runs_script() {
        let server = MockServer::start().await;
        reply_to(
            &server,
            json!(["EVAL", DELETE_IF_EQUALS_SCRIPT, "1", "lk", "mine"]),
            json!({"result": 1}),
        )
        .await;
        reply_to(
            &server,
            json!(["EVAL", DELETE_IF_EQUALS_SCRIPT, "1", "lk", "theirs"]),
            json!({"result": 0}),
        )
        .await;

        let client = RedisRestClient::new(server.uri(), None).unwrap();
        assert!(client.delete_if_equals("lk", "mine").await.unwrap());
        assert!(!client.delete_if_equals("lk", "theirs").await.unwrap());
    }

    #[tokio::test]
    async fn test_error_reply_and_http_failure() {
        let server = MockServer::start().await;
        reply_to(
            &server,
            json!(["SET", "k", "v"]),
            json!({"error": "WRONGPASS invalid password"}),
        )
        .await;
        Mock::given(method("POST"))
            .and(body_json(json!(["GET", "k"])))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = RedisRestClient::new(server.uri(), None).unwrap();
        let err = client.set("k", "v").await.unwrap_err();
        assert!(err.to_string().contains("WRONGPASS"));
        let err = client.get("k").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"result": "{}"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = RedisRestClient::with_request_timeout(
            server.uri(),
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let started = std::time::Instant::now();
        let err = client.get("k").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
