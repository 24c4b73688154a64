//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use telemetry_service::config::AppConfig;
use telemetry_service::counter::Counter;
use telemetry_service::http::{AppState, HttpServer, ServerError};
use telemetry_service::lifecycle::ShutdownSignal;
use telemetry_service::observability::Telemetry;

/// Configuration bound to a free loopback port with short lifecycle bounds.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.server.shutdown_timeout_secs = 2;
    config.lifecycle.grace_period_secs = 2;
    config.lifecycle.release_timeout_secs = 2;
    // The global recorder can only be installed once per process.
    config.observability.metrics_enabled = false;
    config
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// A termination signal fired by sending on the returned channel.
pub fn fake_signal(
    kind: ShutdownSignal,
) -> (oneshot::Sender<()>, impl Future<Output = ShutdownSignal> + Send + 'static) {
    let (tx, rx) = oneshot::channel::<()>();
    let signal = async move {
        match rx.await {
            Ok(()) => kind,
            // Dropping the sender never fires the signal.
            Err(_) => std::future::pending().await,
        }
    };
    (tx, signal)
}

/// A bare HTTP server running on a free port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub counter: Arc<Counter>,
    pub cancel: CancellationToken,
    pub handle: telemetry_service::http::ServerHandle,
    pub task: tokio::task::JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_server(config: &AppConfig) -> TestServer {
    let counter = Arc::new(Counter::default());
    let telemetry = Arc::new(Telemetry::detached());
    telemetry.observe("count_current", counter.clone());
    let state = AppState::new(counter.clone(), Arc::new(Counter::default()), telemetry);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config.server, state);
    let handle = server.handle();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(server.run(listener, cancel.clone()));

    TestServer {
        addr,
        counter,
        cancel,
        handle,
        task,
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
