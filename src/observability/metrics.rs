//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own the Prometheus recorder handle and its periodic upkeep
//! - Refresh observer-backed gauges right before each scrape
//! - Name the service metrics in one place
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, path, status
//! - `http_requests_duration_seconds` (histogram): latency distribution
//! - `count_requests_total` (counter): successful count updates
//! - `count_added_value` (histogram): deltas applied to the counter
//! - `count_updown` (gauge): count endpoint hits, reads and updates alike
//! - `products_consumed_total` (counter): queue messages handled
//! - observer gauges registered through [`Telemetry::observe`]
//!
//! # Design Decisions
//! - Observers are registered once at setup, never per request
//! - Shutdown stops upkeep and runs one final upkeep pass

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LATENCY_SECONDS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// A value sampled when metrics are scraped.
pub trait Observable: Send + Sync {
    fn observe(&self) -> i64;
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] BuildError),

    #[error("Metrics upkeep task failed: {0}")]
    Upkeep(#[from] tokio::task::JoinError),
}

/// Prometheus exporter state shared by the scrape endpoint and shutdown.
pub struct Telemetry {
    handle: PrometheusHandle,
    /// Set when the recorder is not the global one; observer gauges are
    /// then written through it directly.
    local: Option<PrometheusRecorder>,
    observers: Mutex<Vec<(&'static str, Arc<dyn Observable>)>>,
    upkeep: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl Telemetry {
    /// Install the global recorder and start upkeep every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn install(interval: Duration) -> Result<Arc<Self>, TelemetryError> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("http_requests_duration_seconds".to_string()),
                LATENCY_SECONDS,
            )?
            .install_recorder()?;

        let telemetry = Arc::new(Self::with_handle(handle));
        telemetry.start_upkeep(interval);

        tracing::info!(interval = ?interval, "Metrics recorder installed");
        Ok(telemetry)
    }

    /// Telemetry over a recorder that is not installed globally.
    ///
    /// Used when metrics are disabled. Observer gauges still show up in the
    /// scrape body; metrics recorded through the global macros do not.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self::with_handle(recorder.handle()).with_local(recorder)
    }

    /// Telemetry over the handle of an installed global recorder.
    pub fn with_handle(handle: PrometheusHandle) -> Self {
        Self {
            handle,
            local: None,
            observers: Mutex::new(Vec::new()),
            upkeep: Mutex::new(None),
            stop: CancellationToken::new(),
        }
    }

    fn with_local(mut self, recorder: PrometheusRecorder) -> Self {
        self.local = Some(recorder);
        self
    }

    fn start_upkeep(&self, interval: Duration) {
        let handle = self.handle.clone();
        let stop = self.stop.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => handle.run_upkeep(),
                }
            }
        });

        *self.upkeep.lock() = Some(task);
    }

    /// Register a gauge named `name` whose value is read from `source`
    /// on every scrape.
    pub fn observe(&self, name: &'static str, source: Arc<dyn Observable>) {
        self.observers.lock().push((name, source));
    }

    /// Push the current value of every observer into its gauge.
    pub fn refresh(&self) {
        let observers = self.observers.lock().clone();
        let set_all = || {
            for (name, source) in &observers {
                metrics::gauge!(*name).set(source.observe() as f64);
            }
        };

        match &self.local {
            Some(recorder) => metrics::with_local_recorder(recorder, set_all),
            None => set_all(),
        }
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> String {
        self.refresh();
        self.handle.render()
    }

    /// Stop the upkeep task and flush once more.
    pub async fn shutdown(&self) -> Result<(), TelemetryError> {
        self.stop.cancel();

        let task = self.upkeep.lock().take();
        if let Some(task) = task {
            task.await?;
        }

        self.handle.run_upkeep();
        tracing::debug!("Metrics recorder flushed");
        Ok(())
    }
}

/// Record a read of the shared counter.
pub fn record_count_read() {
    metrics::gauge!("count_updown").increment(1.0);
}

/// Record a successful update of the shared counter.
pub fn record_count_added(delta: i64) {
    metrics::counter!("count_requests_total").increment(1);
    metrics::histogram!("count_added_value").record(delta as f64);
    metrics::gauge!("count_updown").increment(1.0);
}

/// Record one product message handled by the queue consumer.
pub fn record_product_consumed() {
    metrics::counter!("products_consumed_total").increment(1);
}

/// Middleware recording request count and latency per matched route.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;

    #[test]
    fn test_render_refreshes_observers() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let telemetry = Telemetry::with_handle(recorder.handle());

        let counter = Arc::new(Counter::new(0));
        telemetry.observe("count_current", counter.clone());
        counter.add(42);

        let body = metrics::with_local_recorder(&recorder, || telemetry.render());
        assert!(body.contains("count_current 42"), "unexpected body: {body}");

        counter.add(-2);
        let body = metrics::with_local_recorder(&recorder, || telemetry.render());
        assert!(body.contains("count_current 40"), "unexpected body: {body}");
    }

    #[test]
    fn test_detached_scrape_includes_observers() {
        let telemetry = Telemetry::detached();
        let count = Arc::new(Counter::new(0));
        let consumed = Arc::new(Counter::new(0));
        telemetry.observe("count_current", count.clone());
        telemetry.observe("products_consumed_current", consumed.clone());

        count.add(42);
        consumed.add(3);
        let body = telemetry.render();
        assert!(body.contains("count_current 42"), "unexpected body: {body}");
        assert!(body.contains("products_consumed_current 3"), "unexpected body: {body}");

        count.add(-2);
        let body = telemetry.render();
        assert!(body.contains("count_current 40"), "unexpected body: {body}");
    }

    #[test]
    fn test_count_metrics_recorded() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_count_added(5);
            record_count_added(-2);
            record_count_read();
        });

        let body = handle.render();
        assert!(body.contains("count_requests_total 2"), "unexpected body: {body}");
        assert!(body.contains("count_updown 3"), "unexpected body: {body}");
    }

    #[tokio::test]
    async fn test_shutdown_stops_upkeep() {
        let telemetry = Telemetry::detached();
        telemetry.start_upkeep(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        telemetry.shutdown().await.unwrap();

        assert!(telemetry.stop.is_cancelled());
        assert!(telemetry.upkeep.lock().is_none());
        // A second shutdown finds nothing left to stop.
        telemetry.shutdown().await.unwrap();
    }
}
