//! Kafka-backed message source.

use std::sync::Arc;

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};

use crate::config::ConsumerConfig;
use crate::queue::{Delivery, MessageSource, QueueError};

/// Single-topic consumer subscribed at construction.
#[derive(Clone)]
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaSource {
    pub fn connect(config: &ConsumerConfig) -> Result<Self, QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| QueueError::Fatal(e.into()))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| QueueError::Fatal(e.into()))?;

        tracing::info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
        })
    }

    /// Leave the consumer group.
    pub fn close(&self) {
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka consumer unsubscribed");
    }
}

impl MessageSource for KafkaSource {
    async fn recv(&mut self) -> Result<Option<Delivery>, QueueError> {
        match self.consumer.recv().await {
            Ok(message) => Ok(Some(Delivery {
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Err(e @ (KafkaError::ClientCreation(_) | KafkaError::Subscription(_))) => {
                Err(QueueError::Fatal(e.into()))
            }
            Err(e) => Err(QueueError::Unavailable(e.into())),
        }
    }
}
