use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rideflow_shared::{Coordinate, PackageType};

/// A driver as the driver service sees it. Other services only ever hold
/// the ID; availability and location never cross the service boundary
/// except through events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    pub package: PackageType,
    pub available: bool,
    pub location: Coordinate,
    pub assigned_trip: Option<Uuid>,
}

impl Driver {
    pub fn new(id: String, package: PackageType, location: Coordinate) -> Self {
        Self {
            id,
            package,
            available: true,
            location,
            assigned_trip: None,
        }
    }
}
