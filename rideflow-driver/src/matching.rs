use std::cmp::Ordering;

use uuid::Uuid;

use rideflow_shared::{Coordinate, PackageType};

use crate::models::Driver;

/// A `TripRequested` event as the driver service keeps it: enough to
/// match, and enough to republish the request verbatim on a re-match.
#[derive(Debug, Clone)]
pub struct RideRequest {
    pub trip_id: Uuid,
    pub rider_id: String,
    pub fare_id: Uuid,
    pub package: PackageType,
    pub pickup: Coordinate,
    pub destination: Coordinate,
}

/// Candidate-selection capability. Swapping the matching policy must not
/// touch the consumer's idempotency logic, so the strategy sees only the
/// request and the pre-filtered candidates.
pub trait MatchingStrategy: Send + Sync {
    fn select_candidate(&self, request: &RideRequest, candidates: &[Driver]) -> Option<String>;
}

/// Reference strategy: nearest available driver to the pickup point.
/// Tier filtering already happened at the pool.
pub struct NearestAvailable;

impl MatchingStrategy for NearestAvailable {
    fn select_candidate(&self, request: &RideRequest, candidates: &[Driver]) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| {
                let da = request.pickup.distance_km(&a.location);
                let db = request.pickup.distance_km(&b.location);
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            })
            .map(|driver| driver.id.clone())
    }
}
