use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use rideflow_driver::MatchDecision;
use rideflow_shared::{
    EventEnvelope, TOPIC_DRIVER_ASSIGNED, TOPIC_PAYMENT_RECEIVED, TOPIC_TRIP_CANCELLED,
    TOPIC_TRIP_REQUESTED,
};
use rideflow_trip::{ApplyOutcome, TripError};

use crate::state::AppState;
use crate::ws::broadcast_trip_update;

/// Pause before re-running a handler that reported a transient failure.
/// The message is only committed once the handler acknowledges it, so a
/// crash mid-retry redelivers.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

fn create_consumer(brokers: &str, group_id: &str, topics: &[&str]) -> StreamConsumer {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .expect("consumer creation failed");
    consumer.subscribe(topics).expect("can't subscribe");
    consumer
}

fn decode_envelope(m: &BorrowedMessage<'_>) -> Option<EventEnvelope> {
    let payload = m.payload()?;
    match serde_json::from_slice(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            // Undecodable messages are committed and skipped; redelivering
            // them would wedge the partition.
            error!(error = %e, topic = m.topic(), "discarding undecodable event");
            None
        }
    }
}

fn commit(consumer: &StreamConsumer, m: &BorrowedMessage<'_>) {
    if let Err(e) = consumer.commit_message(m, CommitMode::Async) {
        error!(error = %e, topic = m.topic(), "offset commit failed");
    }
}

/// Consumes `trip.requested` and drives matching. A `RetryLater` decision
/// commits the message and hands the trip to a delayed retry task, so a
/// thin pool does not block the partition.
pub async fn run_match_worker(
    brokers: String,
    group_id: String,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) {
    let consumer = create_consumer(&brokers, &group_id, &[TOPIC_TRIP_REQUESTED]);
    info!(group_id, "match worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("match worker shutting down");
                    return;
                }
            }
            result = consumer.recv() => match result {
                Err(e) => error!(error = %e, "kafka receive error"),
                Ok(m) => {
                    if let Some(envelope) = decode_envelope(&m) {
                        loop {
                            match state.assignment.handle_trip_requested(&envelope).await {
                                Ok(MatchDecision::RetryLater { attempt }) => {
                                    info!(trip_id = %envelope.trip_id, attempt, "scheduling match retry");
                                    spawn_match_retry(state.clone(), envelope.trip_id);
                                    break;
                                }
                                Ok(_) => break,
                                Err(e) => {
                                    error!(error = %e, trip_id = %envelope.trip_id, "assignment publish failed, retrying");
                                    sleep(RETRY_BACKOFF).await;
                                }
                            }
                        }
                    }
                    commit(&consumer, &m);
                }
            }
        }
    }
}

fn spawn_match_retry(state: AppState, trip_id: Uuid) {
    tokio::spawn(async move {
        loop {
            sleep(state.assignment.retry_interval()).await;
            match state.assignment.match_once(trip_id).await {
                Ok(MatchDecision::RetryLater { .. }) => continue,
                Ok(_) => return,
                Err(e) => {
                    error!(error = %e, %trip_id, "match retry publish failed");
                }
            }
        }
    });
}

/// Consumes the trip-side topics and applies each event through the
/// trip service's CAS path, then fans the new state out to connected
/// clients. Offsets commit only after the handler acknowledges, which
/// keeps delivery at-least-once end to end.
pub async fn run_trip_worker(
    brokers: String,
    group_id: String,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) {
    let consumer = create_consumer(
        &brokers,
        &group_id,
        &[TOPIC_DRIVER_ASSIGNED, TOPIC_PAYMENT_RECEIVED, TOPIC_TRIP_CANCELLED],
    );
    info!(group_id, "trip worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("trip worker shutting down");
                    return;
                }
            }
            result = consumer.recv() => match result {
                Err(e) => error!(error = %e, "kafka receive error"),
                Ok(m) => {
                    if let Some(envelope) = decode_envelope(&m) {
                        // Re-run transient failures in place; the trip's
                        // sequence gate makes the re-run safe.
                        while !apply_trip_event(&state, &envelope).await {
                            sleep(RETRY_BACKOFF).await;
                        }
                    }
                    commit(&consumer, &m);
                }
            }
        }
    }
}

/// Applies one envelope. Returns false only for transient failures the
/// caller should retry; everything else is acknowledged.
async fn apply_trip_event(state: &AppState, envelope: &EventEnvelope) -> bool {
    match envelope.topic() {
        TOPIC_DRIVER_ASSIGNED => match state.trips.apply_driver_assigned(envelope).await {
            ApplyOutcome::Applied(trip) => {
                broadcast_trip_update(&state.hub, &trip).await;
                true
            }
            ApplyOutcome::Stale => true,
            ApplyOutcome::Superseded { released_driver } => {
                if let Some(driver_id) = released_driver {
                    info!(trip_id = %envelope.trip_id, driver_id, "assignment superseded, releasing driver");
                    state.assignment.release_driver(&driver_id, envelope.trip_id);
                }
                true
            }
            ApplyOutcome::Retry => false,
        },
        TOPIC_PAYMENT_RECEIVED => match state.trips.apply_payment(envelope).await {
            Ok(ApplyOutcome::Applied(trip)) => {
                finish_trip(state, &trip).await;
                true
            }
            Ok(ApplyOutcome::Retry) => false,
            Ok(_) => true,
            Err(e @ TripError::PaymentMismatch { .. }) => {
                // Never auto-complete on a wrong amount; surface and ack so
                // the bad event is not redelivered forever.
                error!(error = %e, trip_id = %envelope.trip_id, "payment amount mismatch");
                true
            }
            Err(e) => {
                error!(error = %e, trip_id = %envelope.trip_id, "failed to apply payment");
                true
            }
        },
        TOPIC_TRIP_CANCELLED => match state.trips.apply_cancelled(envelope).await {
            ApplyOutcome::Applied(trip) => {
                finish_trip(state, &trip).await;
                true
            }
            ApplyOutcome::Retry => false,
            _ => true,
        },
        other => {
            warn!(topic = other, "event on unexpected topic, discarding");
            true
        }
    }
}

/// Terminal-state housekeeping: free the driver, drop the matching
/// bookkeeping and push the final state to both sides.
async fn finish_trip(state: &AppState, trip: &rideflow_trip::Trip) {
    if let Some(driver_id) = &trip.driver_id {
        state.assignment.release_driver(driver_id, trip.id);
    }
    state.assignment.forget_trip(trip.id);
    broadcast_trip_update(&state.hub, trip).await;
}
