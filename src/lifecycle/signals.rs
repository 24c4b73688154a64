//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT/SIGTERM handlers at startup
//! - Bridge a termination signal into the same cancellation path as a
//!   subsystem failure
//! - Drain the shutdown registry once cancellation is observed
//!
//! # Design Decisions
//! - Handlers are installed eagerly so a failure surfaces before any
//!   subsystem starts
//! - The listener runs once and is never restarted

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::shutdown::ShutdownRegistry;

/// Termination signal that requested the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT or Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// What made the listener fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An external termination signal arrived first.
    Signal(ShutdownSignal),
    /// The root token was cancelled through another path.
    Cancelled,
}

/// Install termination handlers and return a future resolving on the first
/// signal received.
#[cfg(unix)]
pub fn termination_signal() -> std::io::Result<impl Future<Output = ShutdownSignal> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
        }
    })
}

#[cfg(not(unix))]
pub fn termination_signal() -> std::io::Result<impl Future<Output = ShutdownSignal> + Send> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::Interrupt
    })
}

/// Background task waiting for a signal or root cancellation.
pub struct SignalListener {
    handle: JoinHandle<Trigger>,
}

impl SignalListener {
    /// Start listening. Whichever of `signal` or `token` fires first cancels
    /// the token and drains `registry`.
    pub fn spawn<S>(token: CancellationToken, registry: Arc<ShutdownRegistry>, signal: S) -> Self
    where
        S: Future<Output = ShutdownSignal> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let trigger = tokio::select! {
                signal = signal => {
                    tracing::info!(signal = %signal, "Shutdown signal received");
                    Trigger::Signal(signal)
                }
                _ = token.cancelled() => {
                    tracing::info!("Cancellation observed, shutting down");
                    Trigger::Cancelled
                }
            };

            token.cancel();
            registry.drain().await;
            trigger
        });

        Self { handle }
    }

    /// Wait for the listener to finish.
    pub async fn join(self) -> Trigger {
        match self.handle.await {
            Ok(trigger) => trigger,
            Err(e) => {
                tracing::error!(error = %e, "Signal listener task failed");
                Trigger::Cancelled
            }
        }
    }
}
