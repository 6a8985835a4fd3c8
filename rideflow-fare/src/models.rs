use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rideflow_shared::{Coordinate, PackageType};

/// A priced quote for one rider/tier pair. Immutable once created: a trip
/// selects a fare by ID, it never copies or edits the price. The quoted
/// route rides along so trip creation only needs the fare ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideFare {
    pub id: Uuid,
    pub rider_id: String,
    pub package: PackageType,
    /// Integer minor-currency units. Never a float in storage, so repeated
    /// reads can't drift.
    pub total_price_cents: i64,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub created_at: DateTime<Utc>,
}

impl RideFare {
    pub fn new(
        rider_id: String,
        package: PackageType,
        total_price_cents: i64,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id,
            package,
            total_price_cents,
            pickup,
            destination,
            created_at: Utc::now(),
        }
    }
}
