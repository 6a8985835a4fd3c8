use serde::{Deserialize, Serialize};
use thiserror::Error;

use rideflow_shared::{Coordinate, PackageType};

use crate::models::RideFare;

#[derive(Debug, Error, PartialEq)]
pub enum FareError {
    #[error("coordinate out of range: ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    #[error("pickup and destination are the same point")]
    InvalidRoute,
    #[error("unknown package tier: {0}")]
    UnknownTier(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Flat pickup fee in cents, applied before the tier multiplier.
    pub base_fee_cents: i64,
    /// Rate per kilometer in cents.
    pub per_km_cents: i64,
    pub sedan_multiplier: f64,
    pub suv_multiplier: f64,
    pub van_multiplier: f64,
    pub luxury_multiplier: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fee_cents: 250,
            per_km_cents: 120,
            sedan_multiplier: 1.0,
            suv_multiplier: 1.3,
            van_multiplier: 1.5,
            luxury_multiplier: 2.2,
        }
    }
}

impl PricingConfig {
    fn multiplier(&self, package: PackageType) -> f64 {
        match package {
            PackageType::Sedan => self.sedan_multiplier,
            PackageType::Suv => self.suv_multiplier,
            PackageType::Van => self.van_multiplier,
            PackageType::Luxury => self.luxury_multiplier,
        }
    }
}

/// Pure fare estimator: (pickup, destination, tier) -> priced quote.
/// Deterministic, no persistence, no clock dependence in the price itself.
pub struct FareEstimator {
    config: PricingConfig,
}

impl FareEstimator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn estimate(
        &self,
        rider_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
        package: PackageType,
    ) -> Result<RideFare, FareError> {
        Self::validate_route(pickup, destination)?;

        let distance_km = pickup.distance_km(&destination);
        let raw = (self.config.base_fee_cents as f64
            + self.config.per_km_cents as f64 * distance_km)
            * self.config.multiplier(package);

        // Round up to the next cent. base_fee > 0 keeps the price positive
        // for every valid route.
        let total_price_cents = raw.ceil() as i64;

        Ok(RideFare::new(
            rider_id.to_string(),
            package,
            total_price_cents,
            pickup,
            destination,
        ))
    }

    /// One fare per known tier, for the preview endpoint.
    pub fn estimate_all(
        &self,
        rider_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<Vec<RideFare>, FareError> {
        Self::validate_route(pickup, destination)?;

        PackageType::ALL
            .iter()
            .map(|pkg| self.estimate(rider_id, pickup, destination, *pkg))
            .collect()
    }

    pub fn estimate_for_slug(
        &self,
        rider_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
        slug: &str,
    ) -> Result<RideFare, FareError> {
        let package =
            PackageType::from_slug(slug).ok_or_else(|| FareError::UnknownTier(slug.to_string()))?;
        self.estimate(rider_id, pickup, destination, package)
    }

    fn validate_route(pickup: Coordinate, destination: Coordinate) -> Result<(), FareError> {
        for point in [pickup, destination] {
            if !point.in_bounds() {
                return Err(FareError::InvalidCoordinate {
                    latitude: point.latitude,
                    longitude: point.longitude,
                });
            }
        }
        if pickup == destination {
            return Err(FareError::InvalidRoute);
        }
        Ok(())
    }
}

impl Default for FareEstimator {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
