use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use rideflow_shared::{Coordinate, PackageType};

use crate::models::Driver;

/// In-memory driver availability registry, owned by the driver service.
/// Safe for arbitrary worker contexts; no lock is ever held across an
/// await since every operation is synchronous.
#[derive(Default)]
pub struct DriverPool {
    inner: RwLock<HashMap<String, Driver>>,
}

impl DriverPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Driver>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Driver>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registration is idempotent for the same driver ID: re-registering
    /// refreshes tier and location but keeps an active assignment.
    pub fn register(&self, driver_id: &str, package: PackageType, location: Coordinate) -> Driver {
        let mut drivers = self.write();
        let driver = drivers
            .entry(driver_id.to_string())
            .and_modify(|d| {
                d.package = package;
                d.location = location;
            })
            .or_insert_with(|| Driver::new(driver_id.to_string(), package, location));
        driver.clone()
    }

    /// Removes the driver; returns the trip that was mid-assignment to
    /// them, if any, so the caller can trigger re-matching.
    pub fn unregister(&self, driver_id: &str) -> Option<Uuid> {
        self.write()
            .remove(driver_id)
            .and_then(|d| d.assigned_trip)
    }

    pub fn update_location(&self, driver_id: &str, location: Coordinate) -> bool {
        match self.write().get_mut(driver_id) {
            Some(driver) => {
                driver.location = location;
                true
            }
            None => false,
        }
    }

    /// Marks the driver busy on `trip_id`. Returns false if the driver is
    /// gone or already reserved, which is how two racing matches for the
    /// same driver resolve.
    pub fn reserve(&self, driver_id: &str, trip_id: Uuid) -> bool {
        match self.write().get_mut(driver_id) {
            Some(driver) if driver.available => {
                driver.available = false;
                driver.assigned_trip = Some(trip_id);
                true
            }
            _ => false,
        }
    }

    /// Returns the driver to the available pool, but only while they are
    /// still reserved for `trip_id`. A redelivered release for an
    /// assignment the driver has already left is a no-op, as is an
    /// unknown ID (the driver may have unregistered while the release was
    /// in flight).
    pub fn release(&self, driver_id: &str, trip_id: Uuid) {
        if let Some(driver) = self.write().get_mut(driver_id) {
            if driver.assigned_trip == Some(trip_id) {
                driver.available = true;
                driver.assigned_trip = None;
            }
        }
    }

    pub fn get(&self, driver_id: &str) -> Option<Driver> {
        self.read().get(driver_id).cloned()
    }

    pub fn available_for(&self, package: PackageType) -> Vec<Driver> {
        self.read()
            .values()
            .filter(|d| d.available && d.package == package)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(ids: &[&str]) -> DriverPool {
        let pool = DriverPool::new();
        for id in ids {
            pool.register(id, PackageType::Sedan, Coordinate::new(40.0, -73.0));
        }
        pool
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let pool = pool_with(&["driver-1"]);
        let trip_a = Uuid::new_v4();
        let trip_b = Uuid::new_v4();

        assert!(pool.reserve("driver-1", trip_a));
        assert!(!pool.reserve("driver-1", trip_b));

        pool.release("driver-1", trip_a);
        assert!(pool.reserve("driver-1", trip_b));
    }

    #[test]
    fn test_release_is_trip_scoped() {
        let pool = pool_with(&["driver-1"]);
        let trip_a = Uuid::new_v4();
        let trip_b = Uuid::new_v4();

        pool.reserve("driver-1", trip_a);
        pool.release("driver-1", trip_a);
        pool.reserve("driver-1", trip_b);

        // A redelivered release for the earlier assignment must not free
        // the driver from the one they now hold.
        pool.release("driver-1", trip_a);
        let driver = pool.get("driver-1").unwrap();
        assert!(!driver.available);
        assert_eq!(driver.assigned_trip, Some(trip_b));
    }

    #[test]
    fn test_unregister_surfaces_orphaned_trip() {
        let pool = pool_with(&["driver-1", "driver-2"]);
        let trip = Uuid::new_v4();
        pool.reserve("driver-1", trip);

        assert_eq!(pool.unregister("driver-1"), Some(trip));
        assert_eq!(pool.unregister("driver-2"), None);
        assert_eq!(pool.unregister("driver-1"), None);
    }

    #[test]
    fn test_available_for_filters_tier_and_state() {
        let pool = pool_with(&["sedan-1", "sedan-2"]);
        pool.register("van-1", PackageType::Van, Coordinate::new(40.0, -73.0));
        pool.reserve("sedan-2", Uuid::new_v4());

        let sedans = pool.available_for(PackageType::Sedan);
        assert_eq!(sedans.len(), 1);
        assert_eq!(sedans[0].id, "sedan-1");
    }
}
