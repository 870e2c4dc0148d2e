//! Network executor boundary
//!
//! One operation: perform a request envelope's HTTP exchange within a hard
//! timeout and return the success payload or a typed error. The dispatcher
//! assumes nothing else about the transport.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tracelink_core::errors::{NetworkError, TracelinkError};
use tracelink_core::{keys, NetworkConfig, RequestEnvelope};

// ----------------------------------------------------------------------------
// Executor Contract
// ----------------------------------------------------------------------------

/// External collaborator performing one HTTP exchange per envelope.
///
/// `timeout` is a hard upper bound on wall-clock time before the call must
/// return; implementations must not leak connections or tasks past their
/// return. The dispatcher enforces the same bound on its side and discards
/// any resolution that arrives after it.
#[async_trait]
pub trait NetworkExecutor: Send + Sync {
    async fn execute(
        &self,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<Value, NetworkError>;
}

// ----------------------------------------------------------------------------
// HTTP Executor
// ----------------------------------------------------------------------------

/// Default executor posting JSON to the attribution service
pub struct HttpNetworkExecutor {
    client: reqwest::Client,
    base_url: String,
    app_key: String,
}

impl HttpNetworkExecutor {
    pub fn new(config: &NetworkConfig) -> Result<Self, TracelinkError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TracelinkError::config_error(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_key: config.app_key.clone(),
        })
    }

    fn endpoint(&self, envelope: &RequestEnvelope) -> String {
        format!("{}/{}", self.base_url, envelope.kind.path())
    }
}

#[async_trait]
impl NetworkExecutor for HttpNetworkExecutor {
    async fn execute(
        &self,
        envelope: &RequestEnvelope,
        timeout: Duration,
    ) -> Result<Value, NetworkError> {
        let mut payload = envelope.payload.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(keys::APP_KEY.to_string(), Value::from(self.app_key.clone()));
            if envelope.retry_count > 0 {
                obj.insert(
                    keys::RETRY_NUMBER.to_string(),
                    Value::from(envelope.retry_count),
                );
            }
        }

        let response = self
            .client
            .post(self.endpoint(envelope))
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NetworkError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    }
                } else {
                    NetworkError::Transient {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(NetworkError::from_status(status.as_u16(), reason));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| NetworkError::Permanent {
                status: status.as_u16(),
                reason: format!("malformed response body: {e}"),
            })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracelink_core::RequestKind;

    #[test]
    fn test_endpoint_building() {
        let executor = HttpNetworkExecutor::new(&NetworkConfig {
            base_url: "https://api.example.com/".to_string(),
            app_key: "key_test".to_string(),
        })
        .unwrap();

        let envelope = RequestEnvelope::new(RequestKind::GetUrl, json!({})).unwrap();
        assert_eq!(
            executor.endpoint(&envelope),
            "https://api.example.com/v1/url"
        );
    }
}
