pub mod estimator;
pub mod models;

pub use estimator::{FareError, FareEstimator, PricingConfig};
pub use models::RideFare;
