//! Configuration types and loading logic.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::bail;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use gateway_tracing::TracingConfig;
use serde::Deserialize;

use crate::proxy::executor::{IdempotencyPolicy, RetryPolicy};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logical service name -> backend base address.
    #[serde(default)]
    pub services: BTreeMap<String, String>,

    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Inbound listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Deadline for one inbound request, covering every attempt and wait.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_request_bytes: usize,
}

/// Outbound HTTP client configuration, shared by all backends.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Timeout for a single attempt.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// Responses are buffered before relaying; larger bodies are refused.
    #[serde(default = "default_max_body_bytes")]
    pub max_response_bytes: usize,
}

/// Retry budget for one inbound request.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed wait between attempts.
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,

    #[serde(default)]
    pub idempotency: IdempotencyPolicy,
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_upstream_timeout() -> u64 {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle() -> usize {
    32
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            request_timeout_secs: default_request_timeout(),
            max_request_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_upstream_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            max_response_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
            idempotency: IdempotencyPolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            idempotency: self.idempotency,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GATEWAY_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GATEWAY_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the gateway unusable.
    ///
    /// Service addresses are validated separately when the route registry is
    /// built.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.server.request_timeout_secs == 0 {
            bail!("server.request_timeout_secs must be greater than 0");
        }
        if self.upstream.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_retry_expectations() {
        let config = GatewayConfig::default();
        let policy = config.retry.policy();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.idempotency, IdempotencyPolicy::All);
        assert_eq!(config.server.listen_address, "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections_parse() {
        let toml = r#"
            [server]
            listen_address = "127.0.0.1:9000"

            [retry]
            max_attempts = 5
            delay_ms = 250
            idempotency = "idempotent-only"

            [services]
            user = "http://user-service:8001"
            patient = "http://patient-service:8002"
        "#;

        let config: GatewayConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .unwrap();

        assert_eq!(config.server.listen_address, "127.0.0.1:9000");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.policy().delay, Duration::from_millis(250));
        assert_eq!(config.retry.idempotency, IdempotencyPolicy::IdempotentOnly);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services["user"], "http://user-service:8001");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
