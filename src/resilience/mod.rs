//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Message source failure:
//!     → backoff.rs (wait with jittered exponential delay)
//!     → retry until the budget is spent, then give up
//! ```
//!
//! # Design Decisions
//! - Retry budget counts consecutive failures only; a success resets it
//! - Jitter keeps restarted consumers from retrying in lockstep

pub mod backoff;

pub use backoff::Backoff;
