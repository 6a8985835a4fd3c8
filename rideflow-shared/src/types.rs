use serde::{Deserialize, Serialize};

/// A WGS84 point. Validation happens at the fare-estimation boundary,
/// not on construction, so deserialized payloads can carry whatever the
/// client sent until they hit a guard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn in_bounds(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in kilometers (haversine).
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }
}

/// Ride package tier, e.g. sedan, suv, van, luxury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Sedan,
    Suv,
    Van,
    Luxury,
}

impl PackageType {
    pub const ALL: [PackageType; 4] = [
        PackageType::Sedan,
        PackageType::Suv,
        PackageType::Van,
        PackageType::Luxury,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            PackageType::Sedan => "sedan",
            PackageType::Suv => "suv",
            PackageType::Van => "van",
            PackageType::Luxury => "luxury",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "sedan" => Some(PackageType::Sedan),
            "suv" => Some(PackageType::Suv),
            "van" => Some(PackageType::Van),
            "luxury" => Some(PackageType::Luxury),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(Coordinate::new(40.0, -73.0).in_bounds());
        assert!(!Coordinate::new(91.0, 0.0).in_bounds());
        assert!(!Coordinate::new(0.0, -181.0).in_bounds());
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Coordinate::new(40.0, -73.0);
        let b = Coordinate::new(40.1, -73.1);

        let d = a.distance_km(&b);
        assert!(d > 0.0);
        assert!((d - b.distance_km(&a)).abs() < 1e-9);
    }

    #[test]
    fn test_package_slug_round_trip() {
        for pkg in PackageType::ALL {
            assert_eq!(PackageType::from_slug(pkg.slug()), Some(pkg));
        }
        assert_eq!(PackageType::from_slug("rickshaw"), None);
    }
}
