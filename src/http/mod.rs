//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, graceful stop)
//!     → request.rs (request ID, trace span)
//!     → handlers.rs (count, status, health, metrics)
//!     → response.rs (message envelope)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::{ApiError, Message};
pub use server::{AppState, HttpServer, ServerError, ServerHandle};
