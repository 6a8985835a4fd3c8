use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{info, warn};

use rideflow_shared::{EventEnvelope, EventPublisher, PublishError};

/// Kafka-backed publisher. Delivery is at-least-once: a send that fails is
/// retried with linear backoff up to `max_retries` before the failure is
/// surfaced to the caller.
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    max_retries: u32,
    backoff: Duration,
}

impl KafkaEventPublisher {
    pub fn new(
        brokers: &str,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            max_retries,
            backoff,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError> {
        let topic = event.topic();
        let key = event.trip_id.to_string();
        let payload = serde_json::to_string(event)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let record = FutureRecord::to(topic).key(&key).payload(&payload);

            match self
                .producer
                .send(record, Timeout::After(Duration::from_secs(0)))
                .await
            {
                Ok(delivery) => {
                    info!(
                        topic,
                        key,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "event published"
                    );
                    return Ok(());
                }
                Err((e, _msg)) if attempts <= self.max_retries => {
                    warn!(topic, attempts, error = %e, "publish failed, backing off");
                    tokio::time::sleep(self.backoff * attempts).await;
                }
                Err((e, _msg)) => {
                    return Err(PublishError::Failed {
                        topic: topic.to_string(),
                        attempts,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
