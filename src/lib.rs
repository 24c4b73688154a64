//! Telemetry service library.

pub mod config;
pub mod counter;
pub mod database;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;

pub use config::schema::AppConfig;
pub use counter::Counter;
pub use http::HttpServer;
pub use lifecycle::{Exit, Orchestrator, ShutdownRegistry};
