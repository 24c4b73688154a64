//! Parallel subsystem tasks under one cancellation token.
//!
//! # Responsibilities
//! - Spawn every subsystem with a clone of the root token
//! - Cancel siblings on the first failure and keep only that error
//! - Wait for every task, bounding unwinding by a grace period
//!
//! # State Machine
//! ```text
//! Running → (task fails) → Draining (token cancelled) → Completed(error)
//! Running → (all tasks return Ok) → Completed(success)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::BoxError;

/// Default time tasks get to return after cancellation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Terminal error of a subsystem task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task `{task}` failed: {source}")]
    Failed {
        task: String,
        #[source]
        source: BoxError,
    },

    #[error("Task `{task}` panicked")]
    Panicked { task: String },

    #[error("Tasks did not stop within {grace:?} of cancellation: {tasks:?}")]
    Unresponsive { tasks: Vec<String>, grace: Duration },
}

impl TaskError {
    /// Name of the task that produced the error, if there is exactly one.
    pub fn task(&self) -> Option<&str> {
        match self {
            TaskError::Failed { task, .. } | TaskError::Panicked { task } => Some(task),
            TaskError::Unresponsive { .. } => None,
        }
    }
}

/// The error a group finished with.
#[derive(Debug)]
pub struct TaskFailure {
    pub error: TaskError,
    /// The token was already cancelled when the error was reported.
    pub during_shutdown: bool,
}

type Outcome = Result<(), TaskError>;

enum Step {
    Joined(Option<Result<(u64, Outcome), JoinError>>),
    Cancelled,
    GraceExpired,
}

/// A set of cancellation-aware tasks with first-error-wins semantics.
pub struct TaskGroup {
    token: CancellationToken,
    grace: Duration,
    tasks: JoinSet<(u64, Outcome)>,
    running: HashMap<u64, String>,
    next_id: u64,
}

impl TaskGroup {
    pub fn new(token: CancellationToken, grace: Duration) -> Self {
        Self {
            token,
            grace,
            tasks: JoinSet::new(),
            running: HashMap::new(),
            next_id: 0,
        }
    }

    /// The token shared by every task of this group.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of tasks that have not returned yet.
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Spawn `task`, handing it a clone of the group token.
    pub fn spawn<F, Fut, E>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let name = name.into();
        let id = self.next_id;
        self.next_id += 1;

        let future = task(self.token.clone());
        let task_name = name.clone();
        self.tasks.spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(TaskError::Failed {
                    task: task_name,
                    source: e.into(),
                }),
                Err(_) => Err(TaskError::Panicked { task: task_name }),
            };
            (id, outcome)
        });

        tracing::debug!(task = %name, "Task started");
        self.running.insert(id, name);
    }

    /// Wait until every task has returned.
    ///
    /// The first error cancels the token and is returned; later errors are
    /// only logged. After cancellation, tasks still running once the grace
    /// period expires are aborted and awaited.
    pub async fn wait(mut self) -> Result<(), TaskFailure> {
        let mut first: Option<TaskFailure> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            if deadline.is_none() && self.token.is_cancelled() {
                deadline = Some(Instant::now() + self.grace);
            }

            let step = tokio::select! {
                joined = self.tasks.join_next() => Step::Joined(joined),
                _ = self.token.cancelled(), if deadline.is_none() => Step::Cancelled,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::GraceExpired
                }
            };

            let joined = match step {
                Step::Joined(joined) => joined,
                Step::Cancelled => continue,
                Step::GraceExpired => {
                    self.abort_unresponsive(&mut first).await;
                    break;
                }
            };

            let Some(joined) = joined else { break };
            let (id, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Task join failed");
                    continue;
                }
            };

            let name = self.running.remove(&id).unwrap_or_default();
            match outcome {
                Ok(()) => tracing::info!(task = %name, "Task finished"),
                Err(error) => self.record(&mut first, error),
            }
        }

        match first {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn record(&self, first: &mut Option<TaskFailure>, error: TaskError) {
        if first.is_some() {
            tracing::warn!(error = %error, "Additional task failure");
            return;
        }

        let during_shutdown = self.token.is_cancelled();
        if during_shutdown {
            tracing::warn!(error = %error, "Task failed during shutdown");
        } else {
            tracing::error!(error = %error, "Task failed, cancelling remaining tasks");
        }
        self.token.cancel();
        *first = Some(TaskFailure { error, during_shutdown });
    }

    async fn abort_unresponsive(&mut self, first: &mut Option<TaskFailure>) {
        let mut tasks: Vec<String> = self.running.drain().map(|(_, name)| name).collect();
        tasks.sort();
        tracing::error!(
            tasks = ?tasks,
            grace_ms = self.grace.as_millis() as u64,
            "Tasks unresponsive after cancellation, aborting"
        );

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}

        let error = TaskError::Unresponsive {
            tasks,
            grace: self.grace,
        };
        match first {
            Some(failure) if !failure.during_shutdown => {
                tracing::warn!(error = %error, "Additional task failure");
            }
            _ => {
                *first = Some(TaskFailure {
                    error,
                    during_shutdown: true,
                });
            }
        }
    }
}
