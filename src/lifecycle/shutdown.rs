//! Ordered release of acquired resources.
//!
//! # Responsibilities
//! - Collect named release actions as subsystems acquire resources
//! - Run them once, last acquired first released
//! - Keep going when an individual action fails, panics or hangs
//!
//! # Design Decisions
//! - Registration after draining has started is rejected and logged
//! - The registry lock is never held while an action runs
//! - Every action is bounded by the registry's per-action timeout
//! - Actions are taken one at a time, so a drain whose future is dropped
//!   is resumed by the next caller; the interrupted action counts as failed

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::lifecycle::BoxError;

/// Default bound on a single release action.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

type Release = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A named, fallible teardown step.
struct ReleaseAction {
    name: String,
    release: Release,
}

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry has already started draining.
    #[error("Release action `{0}` registered after shutdown started")]
    Closed(String),
}

/// Outcome of a drain, by action name in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub released: Vec<String>,
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
}

impl DrainReport {
    /// True when every action completed successfully.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

#[derive(Default)]
struct State {
    actions: Vec<ReleaseAction>,
    closed: bool,
    report: DrainReport,
}

/// Records the running action as failed if its drain is dropped mid-way.
struct InFlight<'a> {
    state: &'a Mutex<State>,
    name: Option<String>,
}

impl InFlight<'_> {
    fn finish(mut self) -> String {
        self.name.take().unwrap_or_default()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            tracing::error!(action = %name, "Release action interrupted");
            self.state.lock().report.failed.push(name);
        }
    }
}

/// LIFO registry of release actions, drained at most once.
pub struct ShutdownRegistry {
    state: Mutex<State>,
    timeout: Duration,
    drained: OnceCell<DrainReport>,
}

impl ShutdownRegistry {
    /// Create a registry with the default per-action timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_RELEASE_TIMEOUT)
    }

    /// Create a registry whose actions are each bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            timeout,
            drained: OnceCell::new(),
        }
    }

    /// Register a release action under `name`.
    pub fn register<F, Fut, E>(&self, name: impl Into<String>, action: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let name = name.into();
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            tracing::error!(action = %name, "Release action registered after shutdown started, rejecting");
            return Err(RegistryError::Closed(name));
        }

        tracing::debug!(action = %name, position = state.actions.len(), "Release action registered");
        let release: Release =
            Box::new(move || async move { action().await.map_err(Into::<BoxError>::into) }.boxed());
        state.actions.push(ReleaseAction { name, release });
        Ok(())
    }

    /// Run every registered action once, in reverse registration order.
    ///
    /// Later calls, including concurrent ones, run nothing and return the
    /// report of the first drain once it has finished. If the future of an
    /// unfinished drain is dropped, the next call carries on with the actions
    /// that have not started yet.
    pub async fn drain(&self) -> DrainReport {
        self.drained.get_or_init(|| self.release_all()).await.clone()
    }

    /// Whether a drain has completed.
    pub fn is_drained(&self) -> bool {
        self.drained.initialized()
    }

    /// Number of actions waiting to run.
    pub fn len(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn release_all(&self) -> DrainReport {
        let remaining = {
            let mut state = self.state.lock();
            state.closed = true;
            state.actions.len()
        };
        tracing::info!(actions = remaining, "Releasing resources");

        loop {
            let Some(ReleaseAction { name, release }) = self.state.lock().actions.pop() else {
                break;
            };

            let in_flight = InFlight {
                state: &self.state,
                name: Some(name),
            };
            let started = Instant::now();
            let guarded = AssertUnwindSafe(async move { release().await }).catch_unwind();
            let outcome = tokio::time::timeout(self.timeout, guarded).await;
            let name = in_flight.finish();

            let mut state = self.state.lock();
            match outcome {
                Ok(Ok(Ok(()))) => {
                    tracing::info!(action = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Resource released");
                    state.report.released.push(name);
                }
                Ok(Ok(Err(e))) => {
                    tracing::error!(action = %name, error = %e, "Release action failed");
                    state.report.failed.push(name);
                }
                Ok(Err(_)) => {
                    tracing::error!(action = %name, "Release action panicked");
                    state.report.failed.push(name);
                }
                Err(_) => {
                    tracing::error!(
                        action = %name,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Release action timed out"
                    );
                    state.report.timed_out.push(name);
                }
            }
        }

        self.state.lock().report.clone()
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}
