use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use rideflow_fare::RideFare;
use rideflow_trip::{
    FareRepository, RepositoryError, Trip, TripRepository, VersionedTrip,
};

/// Reference implementation of the trip repository contract: a keyed
/// in-memory store with versioned compare-and-swap writes. The lock is
/// only held for the duration of a map operation, never across an await
/// in any caller.
#[derive(Default)]
pub struct InMemoryTripRepository {
    inner: RwLock<HashMap<Uuid, (u64, Trip)>>,
}

impl InMemoryTripRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TripRepository for InMemoryTripRepository {
    async fn insert(&self, trip: Trip) -> Result<VersionedTrip, RepositoryError> {
        let mut trips = self.inner.write().await;
        let versioned = VersionedTrip {
            trip: trip.clone(),
            version: 1,
        };
        trips.insert(trip.id, (1, trip));
        Ok(versioned)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VersionedTrip>, RepositoryError> {
        let trips = self.inner.read().await;
        Ok(trips.get(&id).map(|(version, trip)| VersionedTrip {
            trip: trip.clone(),
            version: *version,
        }))
    }

    async fn update(&self, trip: &Trip, expected_version: u64) -> Result<u64, RepositoryError> {
        let mut trips = self.inner.write().await;
        let Some((version, stored)) = trips.get_mut(&trip.id) else {
            return Err(RepositoryError::NotFound(trip.id));
        };
        if *version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                found: *version,
            });
        }
        *version += 1;
        *stored = trip.clone();
        Ok(*version)
    }
}

/// Fares are immutable, so this is a plain keyed store.
#[derive(Default)]
pub struct InMemoryFareRepository {
    inner: RwLock<HashMap<Uuid, RideFare>>,
}

impl InMemoryFareRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FareRepository for InMemoryFareRepository {
    async fn save(&self, fare: RideFare) -> Result<(), RepositoryError> {
        self.inner.write().await.insert(fare.id, fare);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RideFare>, RepositoryError> {
        Ok(self.inner.read().await.get(&id).cloned())
    }
}
