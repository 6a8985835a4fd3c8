use thiserror::Error;
use uuid::Uuid;

use rideflow_fare::FareError;
use rideflow_shared::PublishError;

use crate::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum TripError {
    #[error("fare {0} not found")]
    FareNotFound(Uuid),
    #[error("fare {fare_id} does not belong to rider {rider_id}")]
    FareOwnership { fare_id: Uuid, rider_id: String },
    #[error("trip {0} not found")]
    TripNotFound(Uuid),
    #[error("payment amount {received} does not match fare total {expected}")]
    PaymentMismatch { expected: i64, received: i64 },
    #[error(transparent)]
    Fare(#[from] FareError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}
