use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Coordinate, PackageType};

pub const TOPIC_TRIP_REQUESTED: &str = "trip.requested";
pub const TOPIC_DRIVER_ASSIGNED: &str = "trip.driver-assigned";
pub const TOPIC_PAYMENT_RECEIVED: &str = "trip.payment-received";
pub const TOPIC_TRIP_CANCELLED: &str = "trip.cancelled";

/// Cross-service domain event. Services exchange these by value over the
/// broker and look entities up by ID, never by shared reference.
///
/// `sequence` is relative to the trip: consumers discard any envelope whose
/// sequence is not strictly newer than the trip's last applied one, which is
/// what makes at-least-once redelivery safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub trip_id: Uuid,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub payload: TripEventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TripEventPayload {
    TripRequested {
        rider_id: String,
        fare_id: Uuid,
        package: PackageType,
        pickup: Coordinate,
        destination: Coordinate,
    },
    DriverAssigned {
        driver_id: String,
    },
    PaymentReceived {
        amount_cents: i64,
    },
    TripCancelled {
        reason: String,
    },
}

impl EventEnvelope {
    pub fn new(trip_id: Uuid, sequence: u64, payload: TripEventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            trip_id,
            sequence,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Broker topic derived from the payload variant.
    pub fn topic(&self) -> &'static str {
        match self.payload {
            TripEventPayload::TripRequested { .. } => TOPIC_TRIP_REQUESTED,
            TripEventPayload::DriverAssigned { .. } => TOPIC_DRIVER_ASSIGNED,
            TripEventPayload::PaymentReceived { .. } => TOPIC_PAYMENT_RECEIVED,
            TripEventPayload::TripCancelled { .. } => TOPIC_TRIP_CANCELLED,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to publish to {topic} after {attempts} attempts: {reason}")]
    Failed {
        topic: String,
        attempts: u32,
        reason: String,
    },
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broker-facing publisher. At-least-once: implementations may deliver a
/// given envelope more than once but must not drop it silently.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_per_variant() {
        let trip_id = Uuid::new_v4();
        let assigned = EventEnvelope::new(
            trip_id,
            1,
            TripEventPayload::DriverAssigned {
                driver_id: "driver-1".into(),
            },
        );
        assert_eq!(assigned.topic(), TOPIC_DRIVER_ASSIGNED);

        let cancelled = EventEnvelope::new(
            trip_id,
            2,
            TripEventPayload::TripCancelled {
                reason: "no driver available".into(),
            },
        );
        assert_eq!(cancelled.topic(), TOPIC_TRIP_CANCELLED);
    }

    #[test]
    fn test_envelope_json_shape() {
        let env = EventEnvelope::new(
            Uuid::new_v4(),
            3,
            TripEventPayload::PaymentReceived { amount_cents: 1250 },
        );

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["sequence"], 3);
        assert_eq!(json["payload"]["type"], "payment_received");
        assert_eq!(json["payload"]["amount_cents"], 1250);
    }
}
