pub mod assignment;
pub mod matching;
pub mod models;
pub mod pool;

pub use assignment::{DriverAssignmentProcessor, MatchDecision, MatchPolicy};
pub use matching::{MatchingStrategy, NearestAvailable, RideRequest};
pub use models::Driver;
pub use pool::DriverPool;
