//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults (AppConfig::default)
//!     → config file (TOML, optional) via loader.rs
//!     → command-line overrides (host, port, base path, log level)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable), passed by value to startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, resolve_config, ConfigError, Overrides};
pub use schema::{
    AppConfig, ConsumerConfig, DatabaseConfig, LifecycleConfig, ObservabilityConfig, ServerConfig,
};
