pub mod events;
pub mod types;

pub use events::{
    EventEnvelope, EventPublisher, PublishError, TripEventPayload, TOPIC_DRIVER_ASSIGNED,
    TOPIC_PAYMENT_RECEIVED, TOPIC_TRIP_CANCELLED, TOPIC_TRIP_REQUESTED,
};
pub use types::{Coordinate, PackageType};
