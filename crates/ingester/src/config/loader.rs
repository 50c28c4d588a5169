use std::path::Path;
use thiserror::Error;

use super::types::IngesterConfigFile;
use crate::application::config::MIN_CONNECT_INTERVAL;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Missing {0} URL")]
    MissingUrl(&'static str),
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Load ingester configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngesterConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: IngesterConfigFile = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<IngesterConfigFile, ConfigError> {
    let config: IngesterConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<IngesterConfigFile, ConfigError> {
    let default_config = include_str!("default_config.json");
    load_config_from_str(default_config)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl IngesterConfigFile {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.ws_url.trim().is_empty() {
            return Err(ConfigError::MissingUrl("WebSocket"));
        }
        if self.feed.rest_url.trim().is_empty() {
            return Err(ConfigError::MissingUrl("REST"));
        }

        let floor_ms = MIN_CONNECT_INTERVAL.as_millis() as u64;
        let connection = &self.connection;
        if connection.min_connect_interval_ms < floor_ms {
            return Err(invalid(
                "connection.min_connect_interval_ms",
                format!("must be at least {}", floor_ms),
            ));
        }
        if connection.backoff_base_ms < floor_ms {
            return Err(invalid(
                "connection.backoff_base_ms",
                format!("must be at least {}", floor_ms),
            ));
        }
        if connection.backoff_max_ms < connection.backoff_base_ms {
            return Err(invalid(
                "connection.backoff_max_ms",
                "must not be below backoff_base_ms",
            ));
        }
        if connection.backoff_multiplier < 1.0 {
            return Err(invalid(
                "connection.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if !(0.0..1.0).contains(&connection.jitter_factor) {
            return Err(invalid("connection.jitter_factor", "must be in [0, 1)"));
        }

        if self.recovery.max_attempts == 0 {
            return Err(invalid("recovery.max_attempts", "must be at least 1"));
        }
        if self.recovery.max_held_messages == 0 {
            return Err(invalid("recovery.max_held_messages", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = load_default_config().unwrap();
        assert!(!config.products.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingester.json");
        std::fs::write(
            &path,
            r#"{"feed": {"ws_url": "ws://localhost:9000", "rest_url": "http://localhost:9001"}}"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.feed.ws_url, "ws://localhost:9000");
        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_fast_reconnects() {
        let mut config = load_default_config().unwrap();
        config.connection.min_connect_interval_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "connection.min_connect_interval_ms",
                ..
            })
        ));

        let mut config = load_default_config().unwrap();
        config.connection.backoff_base_ms = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = load_default_config().unwrap();
        config.feed.rest_url = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::MissingUrl("REST"))));

        let mut config = load_default_config().unwrap();
        config.connection.jitter_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = load_default_config().unwrap();
        config.connection.backoff_max_ms = 100;
        assert!(config.validate().is_err());

        let mut config = load_default_config().unwrap();
        config.recovery.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            load_config_from_str("{"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
