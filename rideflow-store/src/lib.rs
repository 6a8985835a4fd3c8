pub mod app_config;
pub mod events;
pub mod memory;
pub mod reconcile;

pub use app_config::Config;
pub use events::KafkaEventPublisher;
pub use memory::{InMemoryFareRepository, InMemoryTripRepository};
pub use reconcile::{ReconcileQueue, ReliablePublisher};
