//! Runs every subsystem to completion and reports how the process ended.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::group::{TaskError, TaskGroup};
use crate::lifecycle::shutdown::ShutdownRegistry;
use crate::lifecycle::signals::{ShutdownSignal, SignalListener, Trigger};
use crate::lifecycle::BoxError;

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Every task returned on its own.
    Completed,
    /// A termination signal asked for the shutdown.
    RequestedShutdown(ShutdownSignal),
}

/// Owns the root token, the subsystem tasks and the registry drained on exit.
pub struct Orchestrator {
    token: CancellationToken,
    registry: Arc<ShutdownRegistry>,
    group: TaskGroup,
}

impl Orchestrator {
    /// Create an orchestrator with a fresh root token.
    ///
    /// `grace` bounds how long tasks may take to return once cancelled.
    pub fn new(registry: Arc<ShutdownRegistry>, grace: Duration) -> Self {
        let token = CancellationToken::new();
        let group = TaskGroup::new(token.clone(), grace);
        Self {
            token,
            registry,
            group,
        }
    }

    /// The root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn registry(&self) -> &Arc<ShutdownRegistry> {
        &self.registry
    }

    /// Start a subsystem task bound to the root token.
    pub fn spawn<F, Fut, E>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.group.spawn(name, task);
    }

    /// Run until every task has returned, treating `signal` as the external
    /// termination request.
    ///
    /// Resources in the registry are released exactly once before this
    /// returns, whatever ended the run.
    pub async fn run_until<S>(self, signal: S) -> Result<Exit, TaskError>
    where
        S: Future<Output = ShutdownSignal> + Send + 'static,
    {
        let Self {
            token,
            registry,
            group,
        } = self;

        tracing::info!(tasks = group.len(), "Starting subsystems");
        let listener = SignalListener::spawn(token.clone(), registry.clone(), signal);

        let result = group.wait().await;

        // Every task may have ended on its own; release the listener too.
        token.cancel();
        let trigger = listener.join().await;

        let report = registry.drain().await;
        if !report.is_clean() {
            tracing::warn!(
                failed = ?report.failed,
                timed_out = ?report.timed_out,
                "Some resources were not released cleanly"
            );
        }

        match (result, trigger) {
            (Err(failure), Trigger::Signal(signal))
                if failure.during_shutdown && !matches!(failure.error, TaskError::Unresponsive { .. }) =>
            {
                tracing::warn!(error = %failure.error, "Task failed while shutting down");
                Ok(Exit::RequestedShutdown(signal))
            }
            (Err(failure), _) => Err(failure.error),
            (Ok(()), Trigger::Signal(signal)) => Ok(Exit::RequestedShutdown(signal)),
            (Ok(()), Trigger::Cancelled) => Ok(Exit::Completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_natural_completion_drains() {
        let registry = Arc::new(ShutdownRegistry::new());
        let released = Arc::new(AtomicUsize::new(0));
        {
            let released = released.clone();
            registry
                .register("resource", move || async move {
                    released.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                })
                .unwrap();
        }

        let mut orchestrator = Orchestrator::new(registry.clone(), Duration::from_secs(1));
        orchestrator.spawn("one-shot", |_token| async { Ok::<_, BoxError>(()) });

        let exit = orchestrator.run_until(std::future::pending()).await.unwrap();

        assert_eq!(exit, Exit::Completed);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(registry.is_drained());
    }

    #[tokio::test]
    async fn test_failure_during_requested_shutdown_is_not_fatal() {
        let registry = Arc::new(ShutdownRegistry::new());
        let mut orchestrator = Orchestrator::new(registry, Duration::from_secs(1));
        orchestrator.spawn("flaky-close", |token| async move {
            token.cancelled().await;
            Err::<(), BoxError>("connection reset while closing".into())
        });

        let exit = orchestrator
            .run_until(async { ShutdownSignal::Terminate })
            .await
            .unwrap();

        assert_eq!(exit, Exit::RequestedShutdown(ShutdownSignal::Terminate));
    }

    #[tokio::test]
    async fn test_unresponsive_task_is_fatal_even_when_requested() {
        let registry = Arc::new(ShutdownRegistry::new());
        let mut orchestrator = Orchestrator::new(registry, Duration::from_millis(50));
        orchestrator.spawn("stuck", |_token| async {
            std::future::pending::<()>().await;
            Ok::<_, BoxError>(())
        });

        let err = orchestrator
            .run_until(async { ShutdownSignal::Interrupt })
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Unresponsive { .. }));
    }
}
