use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Where a consumer group without a committed offset starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// CDC consumer configuration, read from `CDC_*` environment variables.
///
/// Auto-commit is not configurable: offsets are only ever committed by the
/// consumer loop once a message's outcome is resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct CdcConsumerConfig {
    /// Kafka brokers (comma-separated)
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Consumer group ID
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Debezium topic for the products table
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: OffsetReset,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Processing attempts per message before it is skipped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts (0 = retry immediately)
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Listen address for the Prometheus scrape endpoint (empty = disabled)
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_brokers() -> String {
    "kafka:9092".to_string()
}

fn default_group_id() -> String {
    "debezium-consumer-group".to_string()
}

fn default_topic() -> String {
    "pgdemo.public.products".to_string()
}

fn default_auto_offset_reset() -> OffsetReset {
    OffsetReset::Earliest
}

fn default_session_timeout_ms() -> u64 {
    10000
}

fn default_max_poll_interval_ms() -> u64 {
    300000 // 5 minutes
}

fn default_max_retries() -> u32 {
    3
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for CdcConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group_id: default_group_id(),
            topic: default_topic(),
            auto_offset_reset: default_auto_offset_reset(),
            session_timeout_ms: default_session_timeout_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: 0,
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl CdcConsumerConfig {
    /// Load from the process environment. `.env` files are read by the caller.
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("CDC_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(AppError::Config("CDC_BROKERS must not be empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(AppError::Config("CDC_GROUP_ID must not be empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(AppError::Config("CDC_TOPIC must not be empty".to_string()));
        }
        if self.max_retries == 0 {
            return Err(AppError::Config(
                "CDC_MAX_RETRIES must be at least 1".to_string(),
            ));
        }
        if self.session_timeout_ms > self.max_poll_interval_ms {
            return Err(AppError::Config(format!(
                "session timeout ({}ms) exceeds max poll interval ({}ms)",
                self.session_timeout_ms, self.max_poll_interval_ms
            )));
        }
        Ok(())
    }

    /// `None` when the scrape endpoint is disabled.
    pub fn metrics_addr(&self) -> Option<&str> {
        let addr = self.metrics_addr.trim();
        (!addr.is_empty()).then_some(addr)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_config(&self) -> resilience::RetryConfig {
        resilience::RetryConfig::new(self.max_retries).with_backoff(self.retry_backoff(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<CdcConsumerConfig> {
        let config: CdcConsumerConfig = envy::prefixed("CDC_").from_iter(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>(),
        )?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.brokers, "kafka:9092");
        assert_eq!(config.group_id, "debezium-consumer-group");
        assert_eq!(config.topic, "pgdemo.public.products");
        assert_eq!(config.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(config.session_timeout_ms, 10000);
        assert_eq!(config.max_poll_interval_ms, 300000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff(), Duration::ZERO);
        assert_eq!(config.metrics_addr(), Some("0.0.0.0:9090"));
    }

    #[test]
    fn test_empty_metrics_addr_disables_endpoint() {
        let config = load(&[("CDC_METRICS_ADDR", "")]).unwrap();
        assert_eq!(config.metrics_addr(), None);

        let config = load(&[("CDC_METRICS_ADDR", "127.0.0.1:9464")]).unwrap();
        assert_eq!(config.metrics_addr(), Some("127.0.0.1:9464"));
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        // Only this test touches CDC_GROUP_ID in the process environment
        std::env::set_var("CDC_GROUP_ID", "group-from-process-env");
        let config = CdcConsumerConfig::from_env();
        std::env::remove_var("CDC_GROUP_ID");

        assert_eq!(config.unwrap().group_id, "group-from-process-env");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CDC_BROKERS", "localhost:29092"),
            ("CDC_TOPIC", "inventory.public.products"),
            ("CDC_AUTO_OFFSET_RESET", "latest"),
            ("CDC_MAX_RETRIES", "5"),
            ("CDC_RETRY_BACKOFF_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.brokers, "localhost:29092");
        assert_eq!(config.topic, "inventory.public.products");
        assert_eq!(config.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.max_retries, 5);

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_zero_retries() {
        let err = load(&[("CDC_MAX_RETRIES", "0")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_offset_reset() {
        assert!(load(&[("CDC_AUTO_OFFSET_RESET", "middle")]).is_err());
    }

    #[test]
    fn test_rejects_session_timeout_above_poll_interval() {
        let err = load(&[
            ("CDC_SESSION_TIMEOUT_MS", "60000"),
            ("CDC_MAX_POLL_INTERVAL_MS", "30000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("session timeout"));
    }
}
