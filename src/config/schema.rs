//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Task and teardown bounds.
    pub lifecycle: LifecycleConfig,

    /// Optional product database.
    pub database: DatabaseConfig,

    /// Optional message-queue consumer.
    pub consumer: ConsumerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or IP to bind.
    pub host: String,

    /// TCP port to bind (0 picks a free port).
    pub port: u16,

    /// Prefix placed before `/api/v1` (empty for none).
    pub base_path: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Time allowed for in-flight requests once shutdown starts.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// `host:port` as accepted by `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_path: String::new(),
            request_timeout_secs: 30,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Bounds on task unwinding and resource release.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long tasks may take to return after cancellation.
    pub grace_period_secs: u64,

    /// Bound on each release action.
    pub release_timeout_secs: u64,
}

impl LifecycleConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            release_timeout_secs: 5,
        }
    }
}

/// Product database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connect at startup and persist consumed products.
    pub enabled: bool,

    /// Postgres connection URL.
    pub url: String,

    /// Pool size.
    pub max_connections: u32,

    /// Lifetime of a pooled connection in seconds.
    pub max_lifetime_secs: u64,

    /// Bound on establishing or acquiring a connection in seconds.
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "postgres://postgres@localhost:5432/postgres".to_string(),
            max_connections: 3,
            max_lifetime_secs: 15 * 60,
            connect_timeout_secs: 5,
        }
    }
}

/// Message-queue consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Run the consumer next to the HTTP server.
    pub enabled: bool,

    /// Comma-separated broker list.
    pub brokers: String,

    /// Consumer group.
    pub group_id: String,

    /// Topic carrying product messages.
    pub topic: String,

    /// Consecutive source failures tolerated before giving up.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: "localhost:9092".to_string(),
            group_id: "telemetry".to_string(),
            topic: "products".to_string(),
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,

    /// Interval between recorder upkeep runs in seconds.
    pub upkeep_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            upkeep_interval_secs: 5,
        }
    }
}
