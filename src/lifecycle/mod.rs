//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Acquire telemetry → database → queue source → HTTP listener
//!     (each registers a release action in shutdown.rs)
//!
//! Run (orchestrator.rs, group.rs):
//!     Spawn subsystem tasks under one root CancellationToken
//!     First task error → cancel siblings → bounded grace period
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT or root cancellation → cancel → drain registry once
//!
//! Shutdown (shutdown.rs):
//!     Release actions run newest first, each under its own timeout
//! ```
//!
//! # Design Decisions
//! - Cancellation reaches every task before any resource is released
//! - Draining happens exactly once, whoever triggers it
//! - A failing release action never stops the others
//! - A requested shutdown is an `Exit` value, not an error

pub mod group;
pub mod orchestrator;
pub mod shutdown;
pub mod signals;
pub mod startup;

/// Error type carried across task and release-action boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use group::{TaskError, TaskFailure, TaskGroup};
pub use orchestrator::{Exit, Orchestrator};
pub use shutdown::{DrainReport, RegistryError, ShutdownRegistry};
pub use signals::{termination_signal, ShutdownSignal, SignalListener, Trigger};
pub use startup::{Service, ServiceError, StartupError};
