use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Start request body. Fields are signed so that negative values reach
/// validation instead of failing to parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    pub num_keys: i64,
    /// Milliseconds between generated keys.
    pub key_delay: i64,
    /// Milliseconds each key lives.
    pub key_ttl: i64,
    /// Milliseconds a dedup record suppresses repeats.
    pub dedup_window: i64,
}

/// A [`TestConfig`] that passed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub num_keys: u64,
    pub key_delay_ms: u64,
    pub key_ttl_ms: u64,
    pub dedup_window_ms: u64,
}

impl RunConfig {
    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }
}

impl TestConfig {
    pub fn validate(&self) -> Result<RunConfig, HarnessError> {
        if self.num_keys <= 0 {
            return Err(HarnessError::Configuration(format!(
                "num_keys must be positive, got {}",
                self.num_keys
            )));
        }
        if self.key_delay < 0 {
            return Err(HarnessError::Configuration(format!(
                "key_delay must not be negative, got {}",
                self.key_delay
            )));
        }
        if self.key_ttl <= 0 {
            return Err(HarnessError::Configuration(format!(
                "key_ttl must be positive, got {}",
                self.key_ttl
            )));
        }
        if self.dedup_window < 0 {
            return Err(HarnessError::Configuration(format!(
                "dedup_window must not be negative, got {}",
                self.dedup_window
            )));
        }
        Ok(RunConfig {
            num_keys: self.num_keys as u64,
            key_delay_ms: self.key_delay as u64,
            key_ttl_ms: self.key_ttl as u64,
            dedup_window_ms: self.dedup_window as u64,
        })
    }
}

/// Process-level knobs that outlive individual runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessSettings {
    pub consumers: usize,
    pub consumer_prefix: String,
    /// Times the bus hands each event to each consumer.
    pub delivery_copies: u32,
    pub sweep_interval: Duration,
}

impl HarnessSettings {
    pub fn consumer_id(&self, index: usize) -> String {
        format!("{}-{}", self.consumer_prefix, index)
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            consumers: 3,
            consumer_prefix: default_consumer_prefix(),
            delivery_copies: 1,
            sweep_interval: Duration::from_millis(1_000),
        }
    }
}

/// Pod name when running under an orchestrator, like the consumer ids of the
/// deployed pipeline.
pub fn default_consumer_prefix() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TestConfig {
        TestConfig { num_keys: 100, key_delay: 10, key_ttl: 50, dedup_window: 200 }
    }

    #[test]
    fn test_valid_config_converts() {
        let run = valid().validate().unwrap();
        assert_eq!(run.num_keys, 100);
        assert_eq!(run.key_delay(), Duration::from_millis(10));
        assert_eq!(run.dedup_window_ms, 200);
    }

    #[test]
    fn test_zero_delay_and_window_allowed() {
        let config = TestConfig { key_delay: 0, dedup_window: 0, ..valid() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let cases = [
            TestConfig { num_keys: 0, ..valid() },
            TestConfig { num_keys: -5, ..valid() },
            TestConfig { key_delay: -1, ..valid() },
            TestConfig { key_ttl: 0, ..valid() },
            TestConfig { dedup_window: -1, ..valid() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(HarnessError::Configuration(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn test_config_parses_dashboard_body() {
        let body = r#"{"num_keys":1000,"key_delay":5,"key_ttl":1000,"dedup_window":5000}"#;
        let config: TestConfig = serde_json::from_str(body).unwrap();
        assert_eq!(config.num_keys, 1000);
        assert_eq!(config.dedup_window, 5000);
    }

    #[test]
    fn test_missing_field_is_parse_error() {
        let body = r#"{"num_keys":10,"key_delay":5,"key_ttl":100}"#;
        assert!(serde_json::from_str::<TestConfig>(body).is_err());
    }

    #[test]
    fn test_consumer_ids_use_prefix() {
        let settings = HarnessSettings { consumer_prefix: "pod".into(), ..HarnessSettings::default() };
        assert_eq!(settings.consumer_id(2), "pod-2");
    }
}
