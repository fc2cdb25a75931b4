// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::errors::ConfigError;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the log alerts consumer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Deploy environment, used as `env` when a record has none
    pub deploy_env: String,
    /// Datadog API key for authentication
    pub api_key: String,
    /// Datadog site (e.g., datadoghq.com, datadoghq.eu)
    pub site: String,
    /// Full intake URL, overrides the one derived from `site`
    pub url: Option<String>,
    pub log_level: String,
    /// Items per batch handed to the delivery pipeline
    pub batch_count: usize,
    pub batch_interval: Duration,
    pub rollup_flush_interval: Duration,
    pub volume_flush_interval: Duration,
    pub lag_flush_interval: Duration,
    /// HTTP timeout for intake requests
    pub flush_timeout: Duration,
    /// zstd level for series payloads
    pub compression_level: i32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            deploy_env: String::new(),
            api_key: String::new(),
            site: "datadoghq.com".to_string(),
            url: None,
            log_level: "info".to_string(),
            batch_count: 100,
            batch_interval: Duration::from_secs(5),
            rollup_flush_interval: Duration::from_secs(20),
            volume_flush_interval: Duration::from_secs(60),
            lag_flush_interval: Duration::from_secs(15),
            flush_timeout: Duration::from_secs(5),
            compression_level: 6,
        }
    }
}

impl ConsumerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let required = |key: &'static str| {
            lookup(key)
                .filter(|val| !val.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(val) => val.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                    ConfigError::InvalidConfig(format!("{key} must be a whole number of seconds, got '{val}'"))
                }),
                None => Ok(default),
            }
        };

        let batch_count = match lookup("BATCH_COUNT") {
            Some(val) => val.trim().parse::<usize>().map_err(|_| {
                ConfigError::InvalidConfig(format!("BATCH_COUNT must be a number, got '{val}'"))
            })?,
            None => defaults.batch_count,
        };
        let compression_level = match lookup("COMPRESSION_LEVEL") {
            Some(val) => val.trim().parse::<i32>().map_err(|_| {
                ConfigError::InvalidConfig(format!("COMPRESSION_LEVEL must be a number, got '{val}'"))
            })?,
            None => defaults.compression_level,
        };

        let config = Self {
            deploy_env: required("DEPLOY_ENV")?,
            api_key: required("DD_API_KEY")?,
            site: lookup("DD_SITE").unwrap_or(defaults.site),
            url: lookup("DD_URL").filter(|url| !url.trim().is_empty()),
            log_level: lookup("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            batch_count,
            batch_interval: secs("BATCH_INTERVAL_SECS", defaults.batch_interval)?,
            rollup_flush_interval: secs(
                "ROLLUP_FLUSH_INTERVAL_SECS",
                defaults.rollup_flush_interval,
            )?,
            volume_flush_interval: secs(
                "VOLUME_FLUSH_INTERVAL_SECS",
                defaults.volume_flush_interval,
            )?,
            lag_flush_interval: secs("LAG_FLUSH_INTERVAL_SECS", defaults.lag_flush_interval)?,
            flush_timeout: secs("FLUSH_TIMEOUT_SECS", defaults.flush_timeout)?,
            compression_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "BATCH_COUNT must be greater than 0".to_string(),
            ));
        }

        let intervals = [
            ("BATCH_INTERVAL_SECS", self.batch_interval),
            ("ROLLUP_FLUSH_INTERVAL_SECS", self.rollup_flush_interval),
            ("VOLUME_FLUSH_INTERVAL_SECS", self.volume_flush_interval),
            ("LAG_FLUSH_INTERVAL_SECS", self.lag_flush_interval),
            ("FLUSH_TIMEOUT_SECS", self.flush_timeout),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.site.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "DD_SITE cannot be empty".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// API root the intake client posts to.
    pub fn intake_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://api.{}", self.site.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ConsumerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ConsumerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn valid() -> ConsumerConfig {
        ConsumerConfig {
            deploy_env: "production".to_string(),
            api_key: "key".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DEPLOY_ENV", "production"), ("DD_API_KEY", "key")]).unwrap();
        assert_eq!(config, valid());
        assert_eq!(config.intake_url(), "https://api.datadoghq.com");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DEPLOY_ENV", "staging"),
            ("DD_API_KEY", "key"),
            ("DD_SITE", "datadoghq.eu"),
            ("LOG_LEVEL", "DEBUG"),
            ("BATCH_COUNT", "10"),
            ("ROLLUP_FLUSH_INTERVAL_SECS", "1"),
            ("COMPRESSION_LEVEL", "3"),
        ])
        .unwrap();
        assert_eq!(config.deploy_env, "staging");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.batch_count, 10);
        assert_eq!(config.rollup_flush_interval, Duration::from_secs(1));
        assert_eq!(config.compression_level, 3);
        assert_eq!(config.intake_url(), "https://api.datadoghq.eu");
    }

    #[test]
    fn test_url_override() {
        let config = load(&[
            ("DEPLOY_ENV", "production"),
            ("DD_API_KEY", "key"),
            ("DD_URL", "http://127.0.0.1:8080/"),
        ])
        .unwrap();
        assert_eq!(config.intake_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_missing_required() {
        assert_eq!(
            load(&[("DD_API_KEY", "key")]),
            Err(ConfigError::Missing("DEPLOY_ENV"))
        );
        assert_eq!(
            load(&[("DEPLOY_ENV", "production"), ("DD_API_KEY", " ")]),
            Err(ConfigError::Missing("DD_API_KEY"))
        );
    }

    #[test]
    fn test_unparseable_number() {
        let err = load(&[
            ("DEPLOY_ENV", "production"),
            ("DD_API_KEY", "key"),
            ("BATCH_INTERVAL_SECS", "soon"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_zero_batch_count() {
        let config = ConsumerConfig {
            batch_count: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = ConsumerConfig {
            lag_flush_interval: Duration::ZERO,
            ..valid()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConfig(
                "LAG_FLUSH_INTERVAL_SECS must be greater than 0".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_empty_site() {
        let config = ConsumerConfig {
            site: "   ".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let config = ConsumerConfig {
                log_level: level.to_string(),
                ..valid()
            };
            assert!(
                config.validate().is_ok(),
                "Log level '{}' should be valid",
                level
            );
        }
        let config = ConsumerConfig {
            log_level: "verbose".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }
}
