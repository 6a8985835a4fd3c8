use std::sync::Arc;

use rideflow_driver::{DriverAssignmentProcessor, DriverPool};
use rideflow_shared::EventPublisher;
use rideflow_trip::TripService;

use crate::hub::ConnectionHub;

#[derive(Clone)]
pub struct AppState {
    pub trips: Arc<TripService>,
    pub assignment: Arc<DriverAssignmentProcessor>,
    pub pool: Arc<DriverPool>,
    pub hub: Arc<ConnectionHub>,
    pub publisher: Arc<dyn EventPublisher>,
}
