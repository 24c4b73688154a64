//! Message-queue consumer subsystem.
//!
//! # Data Flow
//! ```text
//! MessageSource::recv (channel.rs in-process, kafka.rs with the `kafka` feature)
//!     → consume() decodes the JSON payload into a Product
//!     → ProductHandler::handle (handler.rs stores, counts and logs it)
//! ```
//!
//! # Design Decisions
//! - Undecodable payloads and handler errors are logged and skipped
//! - Retryable source errors back off; the budget covers consecutive failures
//! - A closed source ends the consumer cleanly
//! - Cancellation is observed both while waiting for a message and while
//!   backing off

pub mod channel;
pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::BoxError;
use crate::resilience::Backoff;

pub use channel::{channel, ChannelSource};
pub use handler::ProductRecorder;
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Transient failure; the consumer retries with backoff.
    #[error("Message source unavailable: {0}")]
    Unavailable(#[source] BoxError),

    #[error("Message source failed: {0}")]
    Fatal(#[source] BoxError),

    #[error("Giving up after {attempts} consecutive failures: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

/// A raw message as fetched from the source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Delivery {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            payload: payload.into(),
        }
    }
}

/// Product record carried on the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Where messages come from.
pub trait MessageSource: Send {
    /// Next message, or `None` once the source is closed for good.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Delivery>, QueueError>> + Send;
}

/// What to do with each decoded product.
pub trait ProductHandler: Send + Sync {
    fn handle(&self, product: Product) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Consume `source` until cancelled, closed or failed beyond retry.
pub async fn consume<S, H>(
    mut source: S,
    token: CancellationToken,
    backoff: Backoff,
    handler: H,
) -> Result<(), QueueError>
where
    S: MessageSource,
    H: ProductHandler,
{
    tracing::info!("Queue consumer started");
    let mut failures = 0u32;

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!("Queue consumer stopping");
                return Ok(());
            }
            next = source.recv() => next,
        };

        match next {
            Ok(Some(delivery)) => {
                failures = 0;
                dispatch(&delivery, &handler).await;
            }
            Ok(None) => {
                tracing::info!("Message source closed");
                return Ok(());
            }
            Err(QueueError::Unavailable(source)) => {
                failures += 1;
                let Some(delay) = backoff.delay(failures) else {
                    return Err(QueueError::RetriesExhausted {
                        attempts: failures,
                        source,
                    });
                };

                tracing::warn!(
                    error = %source,
                    attempt = failures,
                    delay = ?delay,
                    "Message source unavailable, retrying"
                );

                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Queue consumer stopping");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn dispatch<H: ProductHandler>(delivery: &Delivery, handler: &H) {
    let product = match serde_json::from_slice::<Product>(&delivery.payload) {
        Ok(product) => product,
        Err(e) => {
            tracing::warn!(error = %e, bytes = delivery.payload.len(), "Skipping undecodable message");
            return;
        }
    };

    let name = product.name.clone();
    if let Err(e) = handler.handle(product).await {
        tracing::warn!(product = %name, error = %e, "Product handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<String>>>);

    impl ProductHandler for Collect {
        async fn handle(&self, product: Product) -> Result<(), BoxError> {
            if product.name == "bad" {
                return Err("rejected".into());
            }
            self.0.lock().push(product.name);
            Ok(())
        }
    }

    fn fast_backoff(max_retries: u32) -> Backoff {
        Backoff::new(max_retries, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn unavailable() -> QueueError {
        QueueError::Unavailable("broker down".into())
    }

    #[tokio::test]
    async fn test_consumes_until_closed() {
        let (tx, source) = channel(8);
        let handler = Collect::default();

        tx.send(Ok(Delivery::new(r#"{"name":"a","description":"first"}"#))).await.unwrap();
        tx.send(Ok(Delivery::new("not json"))).await.unwrap();
        tx.send(Ok(Delivery::new(r#"{"name":"bad"}"#))).await.unwrap();
        tx.send(Ok(Delivery::new(r#"{"name":"b"}"#))).await.unwrap();
        drop(tx);

        consume(source, CancellationToken::new(), fast_backoff(3), handler.clone())
            .await
            .unwrap();

        assert_eq!(*handler.0.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_stops_on_cancellation() {
        let (_tx, source) = channel(1);
        let token = CancellationToken::new();

        let task = tokio::spawn(consume(source, token.clone(), fast_backoff(3), Collect::default()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .expect("consumer ignored cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (tx, source) = channel(8);
        let handler = Collect::default();

        tx.send(Err(unavailable())).await.unwrap();
        tx.send(Err(unavailable())).await.unwrap();
        tx.send(Ok(Delivery::new(r#"{"name":"a"}"#))).await.unwrap();
        tx.send(Err(unavailable())).await.unwrap();
        tx.send(Err(unavailable())).await.unwrap();
        tx.send(Ok(Delivery::new(r#"{"name":"b"}"#))).await.unwrap();
        drop(tx);

        // Two retries allowed; the success in between resets the budget.
        consume(source, CancellationToken::new(), fast_backoff(2), handler.clone())
            .await
            .unwrap();

        assert_eq!(handler.0.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (tx, source) = channel(8);
        for _ in 0..3 {
            tx.send(Err(unavailable())).await.unwrap();
        }

        let err = consume(source, CancellationToken::new(), fast_backoff(2), Collect::default())
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_returned() {
        let (tx, source) = channel(1);
        tx.send(Err(QueueError::Fatal("auth failed".into()))).await.unwrap();

        let err = consume(source, CancellationToken::new(), fast_backoff(2), Collect::default())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Message source failed: auth failed");
    }
}
