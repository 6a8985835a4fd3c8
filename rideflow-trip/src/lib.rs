pub mod error;
pub mod models;
pub mod repository;
pub mod service;

pub use error::TripError;
pub use models::{TransitionOutcome, Trip, TripStatus};
pub use repository::{FareRepository, RepositoryError, TripRepository, VersionedTrip};
pub use service::{ApplyOutcome, TripService};
