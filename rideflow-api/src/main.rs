use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rideflow_api::{app, AppState};
use rideflow_api::hub::ConnectionHub;
use rideflow_api::worker::{run_match_worker, run_trip_worker};
use rideflow_driver::{DriverAssignmentProcessor, DriverPool, MatchPolicy, NearestAvailable};
use rideflow_fare::FareEstimator;
use rideflow_store::reconcile::run_reconcile_sweep;
use rideflow_store::{
    Config, InMemoryFareRepository, InMemoryTripRepository, KafkaEventPublisher, ReconcileQueue,
    ReliablePublisher,
};
use rideflow_trip::TripService;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rideflow=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!(
        environment = %config.environment,
        port = config.server.port,
        "Starting RideFlow gateway"
    );

    let kafka = KafkaEventPublisher::new(
        &config.kafka.brokers,
        config.publish.max_retries,
        config.publish.backoff(),
    )
    .expect("Failed to create Kafka producer");
    let kafka: Arc<dyn rideflow_shared::EventPublisher> = Arc::new(kafka);

    let reconcile_queue = Arc::new(ReconcileQueue::new());
    let publisher: Arc<dyn rideflow_shared::EventPublisher> = Arc::new(ReliablePublisher::new(
        kafka.clone(),
        reconcile_queue.clone(),
    ));

    let trips = TripService::new(
        Arc::new(InMemoryTripRepository::new()),
        Arc::new(InMemoryFareRepository::new()),
        publisher.clone(),
        FareEstimator::default(),
    );

    let pool = Arc::new(DriverPool::new());
    let assignment = DriverAssignmentProcessor::new(
        pool.clone(),
        Arc::new(NearestAvailable),
        publisher.clone(),
        MatchPolicy {
            max_attempts: config.matching.max_attempts,
            retry_interval: config.matching.retry_interval(),
        },
    );

    let state = AppState {
        trips: Arc::new(trips),
        assignment: Arc::new(assignment),
        pool,
        hub: Arc::new(ConnectionHub::new(config.hub.write_timeout())),
        publisher,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(run_match_worker(
        config.kafka.brokers.clone(),
        format!("{}-match", config.kafka.group_id),
        state.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_trip_worker(
        config.kafka.brokers.clone(),
        format!("{}-trip", config.kafka.group_id),
        state.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(run_reconcile_sweep(
        reconcile_queue,
        kafka,
        config.publish.reconcile_interval(),
        shutdown_rx,
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    let _ = shutdown_tx.send(true);
}
