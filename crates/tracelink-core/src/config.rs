//! Centralized configuration
//!
//! Consolidates the configuration structures used throughout the SDK into a
//! single master config with validation and presets.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Dispatch Configuration
// ----------------------------------------------------------------------------

/// Configuration for request dispatch, timeouts and retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Wall-clock bound applied to every network call unless a request
    /// carries its own override
    pub default_timeout: Duration,
    /// Maximum number of retry attempts after the initial dispatch
    pub max_retries: u32,
    /// Initial retry delay
    pub initial_retry_delay: Duration,
    /// Maximum retry delay (for exponential backoff)
    pub max_retry_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(5500),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl DispatchConfig {
    /// Retry delay for the given attempt number (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_retry_delay.as_millis() as f32;
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = (base * self.backoff_multiplier.powi(exponent)) as u64;
        let delay = Duration::from_millis(delay_ms);
        delay.min(self.max_retry_delay)
    }

    /// Fast retries and short timeouts for tests
    pub fn testing() -> Self {
        Self {
            default_timeout: Duration::from_millis(200),
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }

    /// Retry hard and quickly
    pub fn aggressive() -> Self {
        Self {
            default_timeout: Duration::from_millis(3000),
            max_retries: 5,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
        }
    }

    /// Retry gently, for constrained hosts
    pub fn conservative() -> Self {
        Self {
            default_timeout: Duration::from_millis(8000),
            max_retries: 2,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(60),
            backoff_multiplier: 3.0,
        }
    }
}

// ----------------------------------------------------------------------------
// Queue Configuration
// ----------------------------------------------------------------------------

/// Configuration for the pending request queue and its durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Durable store location. `None` keeps the queue in memory only.
    pub store_path: Option<PathBuf>,
    /// Maximum number of pending envelopes before submissions are rejected
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            max_pending: 25,
        }
    }
}

impl QueueConfig {
    pub fn testing() -> Self {
        Self {
            store_path: None,
            max_pending: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for session lifecycle management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Start a session automatically on the first foreground activity.
    /// Hosts that manage sessions themselves switch this off.
    pub auto_session: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { auto_session: true }
    }
}

// ----------------------------------------------------------------------------
// Network Configuration
// ----------------------------------------------------------------------------

/// Configuration for the network executor boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base URL of the attribution service
    pub base_url: String,
    /// Application key sent with every request
    pub app_key: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tracelink.io".to_string(),
            app_key: String::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Master Configuration
// ----------------------------------------------------------------------------

/// Master configuration for the Tracelink SDK
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracelinkConfig {
    pub dispatch: DispatchConfig,
    pub queue: QueueConfig,
    pub session: SessionConfig,
    pub network: NetworkConfig,
}

impl TracelinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> TracelinkConfigBuilder {
        TracelinkConfigBuilder::default()
    }

    /// Configuration optimized for tests: fast retries, volatile queue
    pub fn testing() -> Self {
        Self {
            dispatch: DispatchConfig::testing(),
            queue: QueueConfig::testing(),
            session: SessionConfig { auto_session: true },
            network: NetworkConfig::default(),
        }
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.dispatch.default_timeout.is_zero() {
            return Err("default timeout cannot be zero".into());
        }
        if self.dispatch.backoff_multiplier <= 1.0 {
            return Err("backoff multiplier must be greater than 1.0".into());
        }
        if self.dispatch.initial_retry_delay > self.dispatch.max_retry_delay {
            return Err("initial retry delay cannot exceed max retry delay".into());
        }
        if self.queue.max_pending == 0 {
            return Err("queue capacity cannot be zero".into());
        }
        if self.network.base_url.is_empty() {
            return Err("base URL cannot be empty".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder
// ----------------------------------------------------------------------------

/// Builder for [`TracelinkConfig`] with validation at build time
#[derive(Debug, Clone, Default)]
pub struct TracelinkConfigBuilder {
    dispatch: Option<DispatchConfig>,
    queue: Option<QueueConfig>,
    session: Option<SessionConfig>,
    network: Option<NetworkConfig>,
}

impl TracelinkConfigBuilder {
    pub fn dispatch(mut self, config: DispatchConfig) -> Self {
        self.dispatch = Some(config);
        self
    }

    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = Some(config);
        self
    }

    pub fn session(mut self, config: SessionConfig) -> Self {
        self.session = Some(config);
        self
    }

    pub fn network(mut self, config: NetworkConfig) -> Self {
        self.network = Some(config);
        self
    }

    pub fn app_key(mut self, key: impl Into<String>) -> Self {
        let mut network = self.network.take().unwrap_or_default();
        network.app_key = key.into();
        self.network = Some(network);
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        let mut queue = self.queue.take().unwrap_or_default();
        queue.store_path = Some(path.into());
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> Result<TracelinkConfig, String> {
        let config = TracelinkConfig {
            dispatch: self.dispatch.unwrap_or_default(),
            queue: self.queue.unwrap_or_default(),
            session: self.session.unwrap_or_default(),
            network: self.network.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TracelinkConfig::default().validate().is_ok());
        assert!(TracelinkConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = DispatchConfig {
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            ..DispatchConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        // 400ms capped at the max.
        assert_eq!(config.retry_delay(3), Duration::from_millis(350));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = TracelinkConfig::default();
        config.dispatch.backoff_multiplier = 1.0;
        assert!(config.validate().is_err());

        let mut config = TracelinkConfig::default();
        config.queue.max_pending = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = TracelinkConfig::builder()
            .app_key("key_live_abc")
            .dispatch(DispatchConfig::aggressive())
            .store_path("/tmp/tracelink/queue.sqlite")
            .build()
            .expect("builder should produce a valid config");

        assert_eq!(config.network.app_key, "key_live_abc");
        assert_eq!(config.dispatch.max_retries, 5);
        assert!(config.queue.store_path.is_some());
    }

    #[test]
    fn test_builder_rejects_invalid() {
        let result = TracelinkConfig::builder()
            .network(NetworkConfig {
                base_url: String::new(),
                app_key: String::new(),
            })
            .build();
        assert!(result.is_err());
    }
}
