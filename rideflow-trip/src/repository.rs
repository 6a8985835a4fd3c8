use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use rideflow_fare::RideFare;

use crate::models::Trip;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record {0} not found")]
    NotFound(Uuid),
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A trip plus the store version it was read at, for CAS writes.
#[derive(Debug, Clone)]
pub struct VersionedTrip {
    pub trip: Trip,
    pub version: u64,
}

/// Persistence contract for trips. The backing engine is out of scope;
/// the in-memory keyed store is the reference implementation.
///
/// `update` is a compare-and-swap: it succeeds only if the stored version
/// still equals `expected_version`. That single conditional write is the
/// serialization point for concurrent transitions; no lock is held across
/// any await.
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn insert(&self, trip: Trip) -> Result<VersionedTrip, RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<VersionedTrip>, RepositoryError>;

    /// Returns the new version on success, `VersionConflict` if another
    /// writer got there first.
    async fn update(&self, trip: &Trip, expected_version: u64) -> Result<u64, RepositoryError>;
}

/// Persistence contract for fares. Fares are immutable, so there is no
/// update and no version.
#[async_trait]
pub trait FareRepository: Send + Sync {
    async fn save(&self, fare: RideFare) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<RideFare>, RepositoryError>;
}
