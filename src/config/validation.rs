//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, known log levels)
//! - Check the database and consumer sections only when they are enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use crate::config::schema::AppConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint, collecting all violations.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::new("server.host", "must not be empty"));
    }
    if config.server.base_path.ends_with('/') {
        errors.push(ValidationError::new("server.base_path", "must not end with '/'"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    if config.server.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new("server.shutdown_timeout_secs", "must be greater than 0"));
    }

    if config.lifecycle.grace_period_secs == 0 {
        errors.push(ValidationError::new("lifecycle.grace_period_secs", "must be greater than 0"));
    }
    if config.lifecycle.release_timeout_secs == 0 {
        errors.push(ValidationError::new("lifecycle.release_timeout_secs", "must be greater than 0"));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled && config.observability.upkeep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "observability.upkeep_interval_secs",
            "must be greater than 0",
        ));
    }

    let database = &config.database;
    if database.enabled {
        if !(database.url.starts_with("postgres://") || database.url.starts_with("postgresql://")) {
            errors.push(ValidationError::new(
                "database.url",
                "must be a postgres:// or postgresql:// URL",
            ));
        }
        if database.max_connections == 0 {
            errors.push(ValidationError::new("database.max_connections", "must be greater than 0"));
        }
        if database.connect_timeout_secs == 0 {
            errors.push(ValidationError::new("database.connect_timeout_secs", "must be greater than 0"));
        }
    }

    let consumer = &config.consumer;
    if consumer.enabled {
        if consumer.brokers.trim().is_empty() {
            errors.push(ValidationError::new("consumer.brokers", "must not be empty"));
        }
        if consumer.topic.trim().is_empty() {
            errors.push(ValidationError::new("consumer.topic", "must not be empty"));
        }
        if consumer.group_id.trim().is_empty() {
            errors.push(ValidationError::new("consumer.group_id", "must not be empty"));
        }
        if consumer.base_delay_ms > consumer.max_delay_ms {
            errors.push(ValidationError::new(
                "consumer.base_delay_ms",
                "must not exceed consumer.max_delay_ms",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = AppConfig::default();
        config.server.host = " ".into();
        config.lifecycle.grace_period_secs = 0;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();

        assert_eq!(
            fields,
            vec!["server.host", "lifecycle.grace_period_secs", "observability.log_level"]
        );
    }

    #[test]
    fn test_consumer_checked_only_when_enabled() {
        let mut config = AppConfig::default();
        config.consumer.topic = String::new();
        assert!(validate_config(&config).is_ok());

        config.consumer.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "consumer.topic: must not be empty");
    }

    #[test]
    fn test_database_checked_only_when_enabled() {
        let mut config = AppConfig::default();
        config.database.url = "mysql://localhost/db".into();
        config.database.max_connections = 0;
        assert!(validate_config(&config).is_ok());

        config.database.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["database.url", "database.max_connections"]);
    }
}
