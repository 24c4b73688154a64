//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, CORS, timeout, metrics)
//! - Turn handler panics into 500 responses
//! - Serve on a bound listener until cancelled or stopped
//! - Bound the drain of in-flight requests once shutdown starts
//!
//! # Design Decisions
//! - The listener is bound by the caller so the port is known before serving
//! - Returning while nobody asked for it is an error (`UnexpectedStop`)
//! - `ServerHandle::stop` may be called from any task, any number of times

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::counter::Counter;
use crate::http::handlers;
use crate::http::request::{make_span, MakeRequestUuid};
use crate::observability::metrics::track_metrics;
use crate::observability::Telemetry;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("In-flight requests still running after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Server stopped without being asked to")]
    UnexpectedStop,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub counter: Arc<Counter>,
    pub consumed: Arc<Counter>,
    pub telemetry: Arc<Telemetry>,
    pub started: Instant,
}

impl AppState {
    pub fn new(counter: Arc<Counter>, consumed: Arc<Counter>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            counter,
            consumed,
            telemetry,
            started: Instant::now(),
        }
    }
}

/// HTTP server for the counter API.
pub struct HttpServer {
    router: Router,
    shutdown_timeout: Duration,
    stop: CancellationToken,
    stopped: watch::Sender<bool>,
}

impl HttpServer {
    pub fn new(config: &ServerConfig, state: AppState) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            router: Self::build_router(config, state),
            shutdown_timeout: config.shutdown_timeout(),
            stop: CancellationToken::new(),
            stopped,
        }
    }

    /// Bind the configured address.
    pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
        TcpListener::bind(config.bind_address()).await
    }

    /// Path under which the API routes are mounted.
    pub fn api_prefix(base_path: &str) -> String {
        let base = base_path.trim_matches('/');
        if base.is_empty() {
            "/api/v1".to_string()
        } else {
            format!("/{base}/api/v1")
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        let api = Router::new()
            .route("/count", get(handlers::get_count).post(handlers::post_count))
            .route("/status", get(handlers::get_status));

        let routes = Router::new()
            .nest(&Self::api_prefix(&config.base_path), api)
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::scrape))
            .with_state(state);

        with_middleware(routes, config.request_timeout())
    }

    /// Handle that can stop this server from elsewhere.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: self.stop.clone(),
            stopped: self.stopped.subscribe(),
            timeout: self.shutdown_timeout,
        }
    }

    /// Serve on `listener` until `cancel` fires or the handle stops the server.
    pub async fn run(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
        let result = self.serve(listener, cancel).await;
        self.stopped.send_replace(true);

        match &result {
            Ok(()) => tracing::info!("HTTP server stopped"),
            Err(e) => tracing::error!(error = %e, "HTTP server failed"),
        }
        result
    }

    async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let graceful = shutdown_requested(cancel.clone(), self.stop.clone());
        let serve = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(graceful)
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            biased;
            _ = shutdown_requested(cancel, self.stop.clone()) => {}
            result = &mut serve => {
                result?;
                return Err(ServerError::UnexpectedStop);
            }
        }

        tracing::info!(timeout = ?self.shutdown_timeout, "HTTP server draining");
        match tokio::time::timeout(self.shutdown_timeout, &mut serve).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServerError::ShutdownTimeout(self.shutdown_timeout)),
        }
    }
}

/// Wrap `routes` in the middleware stack, innermost layer first.
#[allow(deprecated)]
fn with_middleware(routes: Router, request_timeout: Duration) -> Router {
    routes
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(track_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

async fn shutdown_requested(cancel: CancellationToken, stop: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = stop.cancelled() => {}
    }
}

/// Stops a running [`HttpServer`].
#[derive(Clone)]
pub struct ServerHandle {
    stop: CancellationToken,
    stopped: watch::Receiver<bool>,
    timeout: Duration,
}

impl ServerHandle {
    /// Ask the server to stop and wait until its listener is closed.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.stop.cancel();

        let mut stopped = self.stopped.clone();
        // A closed channel means the server was dropped, which closed the listener too.
        let waited = tokio::time::timeout(self.timeout, stopped.wait_for(|done| *done))
            .await
            .is_ok();

        if waited {
            Ok(())
        } else {
            Err(ServerError::ShutdownTimeout(self.timeout))
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_handler_panic_becomes_500() {
        let routes = Router::new().route(
            "/boom",
            get(|| async {
                if true {
                    panic!("handler blew up");
                }
                "unreachable"
            }),
        );
        let app = with_middleware(routes, Duration::from_secs(5));

        let res = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_cors_preflight_allowed() {
        let routes = Router::new().route("/health", get(|| async { "ok" }));
        let app = with_middleware(routes, Duration::from_secs(5));

        let res = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .header(header::ORIGIN, "http://dashboard.local")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn test_api_prefix() {
        assert_eq!(HttpServer::api_prefix(""), "/api/v1");
        assert_eq!(HttpServer::api_prefix("/telemetry"), "/telemetry/api/v1");
        assert_eq!(HttpServer::api_prefix("/"), "/api/v1");
    }
}
