//! Startup orchestration.
//!
//! # Responsibilities
//! - Acquire every subsystem resource in dependency order
//! - Register a release action for each acquired resource
//! - Bind the HTTP listener and spawn the subsystem tasks
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - A failed startup drains the registry, releasing what was acquired
//! - Listeners start last (traffic only when ready)

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::counter::Counter;
use crate::database::{Database, DatabaseError};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::group::TaskError;
use crate::lifecycle::orchestrator::{Exit, Orchestrator};
use crate::lifecycle::shutdown::{RegistryError, ShutdownRegistry};
use crate::lifecycle::signals::{termination_signal, ShutdownSignal};
use crate::observability::{Telemetry, TelemetryError};
use crate::queue::{self, MessageSource, ProductRecorder, QueueError};
use crate::resilience::Backoff;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Telemetry setup failed: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database setup failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("Queue consumer setup failed: {0}")]
    Consumer(#[from] QueueError),

    #[error("Queue consumer enabled but this build lacks the `kafka` feature")]
    ConsumerUnsupported,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Terminal error of a service run.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Startup failed: {0}")]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// A started service: resources acquired, tasks spawned, waiting to be run.
pub struct Service {
    orchestrator: Orchestrator,
    local_addr: SocketAddr,
    counter: Arc<Counter>,
    consumed: Arc<Counter>,
}

impl Service {
    /// Address the HTTP listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn token(&self) -> CancellationToken {
        self.orchestrator.token()
    }

    pub fn registry(&self) -> &Arc<ShutdownRegistry> {
        self.orchestrator.registry()
    }

    pub fn counter(&self) -> &Arc<Counter> {
        &self.counter
    }

    /// Number of queue messages handled so far.
    pub fn consumed(&self) -> &Arc<Counter> {
        &self.consumed
    }

    /// Run until every task ends, a task fails or `signal` fires.
    pub async fn run_until<S>(self, signal: S) -> Result<Exit, TaskError>
    where
        S: Future<Output = ShutdownSignal> + Send + 'static,
    {
        tracing::info!(address = %self.local_addr, "Service running");
        self.orchestrator.run_until(signal).await
    }
}

/// Start the service and run it until a termination signal or failure.
pub async fn run(config: AppConfig) -> Result<Exit, ServiceError> {
    let signal = termination_signal().map_err(StartupError::Signals)?;
    let service = start(&config).await?;
    Ok(service.run_until(signal).await?)
}

/// Start the service with the message source named by the configuration.
#[cfg(feature = "kafka")]
pub async fn start(config: &AppConfig) -> Result<Service, StartupError> {
    use crate::queue::KafkaSource;

    launch(config, |registry| {
        if !config.consumer.enabled {
            return Ok(None);
        }
        let source = KafkaSource::connect(&config.consumer)?;
        let closer = source.clone();
        registry.register("queue-consumer", move || async move {
            closer.close();
            Ok::<(), Infallible>(())
        })?;
        Ok(Some(source))
    })
    .await
}

/// Start the service with the message source named by the configuration.
#[cfg(not(feature = "kafka"))]
pub async fn start(config: &AppConfig) -> Result<Service, StartupError> {
    launch(config, |_| {
        if config.consumer.enabled {
            return Err(StartupError::ConsumerUnsupported);
        }
        Ok(None::<queue::ChannelSource>)
    })
    .await
}

/// Start the service consuming from `source` regardless of configuration.
pub async fn start_with_source<S>(config: &AppConfig, source: S) -> Result<Service, StartupError>
where
    S: MessageSource + 'static,
{
    launch(config, |_| Ok(Some(source))).await
}

async fn launch<S, C>(config: &AppConfig, connect: C) -> Result<Service, StartupError>
where
    S: MessageSource + 'static,
    C: FnOnce(&ShutdownRegistry) -> Result<Option<S>, StartupError>,
{
    let registry = Arc::new(ShutdownRegistry::with_timeout(config.lifecycle.release_timeout()));

    match acquire(config, registry.clone(), connect).await {
        Ok(service) => Ok(service),
        Err(e) => {
            tracing::error!(error = %e, "Startup failed, releasing acquired resources");
            registry.drain().await;
            Err(e)
        }
    }
}

async fn acquire<S, C>(
    config: &AppConfig,
    registry: Arc<ShutdownRegistry>,
    connect: C,
) -> Result<Service, StartupError>
where
    S: MessageSource + 'static,
    C: FnOnce(&ShutdownRegistry) -> Result<Option<S>, StartupError>,
{
    let counter = Arc::new(Counter::default());
    let consumed = Arc::new(Counter::default());

    // 1. Telemetry
    let telemetry = if config.observability.metrics_enabled {
        Telemetry::install(Duration::from_secs(config.observability.upkeep_interval_secs))?
    } else {
        Arc::new(Telemetry::detached())
    };
    let exporter = telemetry.clone();
    registry.register("telemetry", move || async move { exporter.shutdown().await })?;
    telemetry.observe("count_current", counter.clone());
    telemetry.observe("products_consumed_current", consumed.clone());

    // 2. Database
    let database = if config.database.enabled {
        let database = Database::connect(&config.database).await?;
        let pool = database.clone();
        registry.register("database", move || async move {
            pool.close().await;
            Ok::<(), Infallible>(())
        })?;
        Some(database)
    } else {
        None
    };

    // 3. Queue source
    let source = connect(&registry)?;

    // 4. HTTP listener
    let listener = HttpServer::bind(&config.server)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.server.bind_address(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
        addr: config.server.bind_address(),
        source,
    })?;

    let state = AppState::new(counter.clone(), consumed.clone(), telemetry);
    let server = HttpServer::new(&config.server, state);
    let handle = server.handle();
    registry.register("http-server", move || async move { handle.stop().await })?;

    tracing::info!(
        address = %local_addr,
        base_path = %config.server.base_path,
        database = database.is_some(),
        consumer = source.is_some(),
        "Resources acquired"
    );

    // 5. Tasks
    let mut orchestrator = Orchestrator::new(registry, config.lifecycle.grace_period());
    orchestrator.spawn("http-server", move |token| server.run(listener, token));

    if let Some(source) = source {
        let backoff = Backoff::new(
            config.consumer.max_retries,
            Duration::from_millis(config.consumer.base_delay_ms),
            Duration::from_millis(config.consumer.max_delay_ms),
        );
        let mut handler = ProductRecorder::new(consumed.clone());
        if let Some(database) = database {
            handler = handler.with_database(database);
        }
        orchestrator.spawn("queue-consumer", move |token| {
            queue::consume(source, token, backoff, handler)
        });
    }

    Ok(Service {
        orchestrator,
        local_addr,
        counter,
        consumed,
    })
}
