use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use rideflow_shared::{EventEnvelope, EventPublisher, PublishError, TripEventPayload};

use crate::matching::{MatchingStrategy, RideRequest};
use crate::pool::DriverPool;

/// Bounded matching retry window: after `max_attempts` tries without a
/// candidate the trip is cancelled instead of waiting forever.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// What the consumer loop should do with a `trip.requested` message.
#[derive(Debug)]
pub enum MatchDecision {
    /// A driver was reserved and `trip.driver-assigned` published.
    Assigned { driver_id: String },
    /// No candidate right now; try again after the policy interval.
    RetryLater { attempt: u32 },
    /// Retry budget exhausted; `trip.cancelled` published.
    GaveUp,
    /// Duplicate delivery or not a ride request. Acknowledge and move on.
    Ignored,
}

struct PendingMatch {
    request: RideRequest,
    attempts: u32,
    /// Sequence the next assignment for this trip will carry. Strictly
    /// greater than anything previously emitted, so a re-match after a
    /// driver dropout is not mistaken for a stale duplicate.
    emit_sequence: u64,
    matched: bool,
}

/// Consumes ride requests, reserves a candidate driver and emits the
/// assignment. Idempotent under redelivery: a request for a trip that is
/// already matched is ignored, and duplicate assignments carry the same
/// sequence so the trip side discards them.
pub struct DriverAssignmentProcessor {
    pool: Arc<DriverPool>,
    strategy: Arc<dyn MatchingStrategy>,
    publisher: Arc<dyn EventPublisher>,
    policy: MatchPolicy,
    pending: Mutex<HashMap<Uuid, PendingMatch>>,
}

impl DriverAssignmentProcessor {
    pub fn new(
        pool: Arc<DriverPool>,
        strategy: Arc<dyn MatchingStrategy>,
        publisher: Arc<dyn EventPublisher>,
        policy: MatchPolicy,
    ) -> Self {
        Self {
            pool,
            strategy,
            publisher,
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.policy.retry_interval
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Uuid, PendingMatch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point for `trip.requested` envelopes.
    pub async fn handle_trip_requested(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<MatchDecision, PublishError> {
        let TripEventPayload::TripRequested {
            rider_id,
            fare_id,
            package,
            pickup,
            destination,
        } = &envelope.payload
        else {
            warn!(trip_id = %envelope.trip_id, "unexpected payload on ride request");
            return Ok(MatchDecision::Ignored);
        };

        let fresh = {
            let mut pending = self.pending();
            match pending.entry(envelope.trip_id) {
                Entry::Vacant(slot) => {
                    slot.insert(PendingMatch {
                        request: RideRequest {
                            trip_id: envelope.trip_id,
                            rider_id: rider_id.clone(),
                            fare_id: *fare_id,
                            package: *package,
                            pickup: *pickup,
                            destination: *destination,
                        },
                        attempts: 0,
                        emit_sequence: envelope.sequence + 1,
                        matched: false,
                    });
                    true
                }
                Entry::Occupied(mut slot) => {
                    // A republished request (re-match) carries a newer
                    // sequence and reopens the entry; a redelivered
                    // duplicate does not, and must not burn a retry.
                    let entry = slot.get_mut();
                    if envelope.sequence + 1 > entry.emit_sequence {
                        entry.emit_sequence = envelope.sequence + 1;
                        entry.matched = false;
                        entry.attempts = 0;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if !fresh {
            return Ok(MatchDecision::Ignored);
        }

        self.match_once(envelope.trip_id).await
    }

    /// One matching attempt against the current pool. Called again by the
    /// consumer loop after `retry_interval` on `RetryLater`.
    pub async fn match_once(&self, trip_id: Uuid) -> Result<MatchDecision, PublishError> {
        let (request, emit_sequence, attempt) = {
            let mut pending = self.pending();
            let Some(entry) = pending.get_mut(&trip_id) else {
                return Ok(MatchDecision::Ignored);
            };
            if entry.matched {
                return Ok(MatchDecision::Ignored);
            }
            entry.attempts += 1;
            (entry.request.clone(), entry.emit_sequence, entry.attempts)
        };

        let mut candidates = self.pool.available_for(request.package);
        while let Some(driver_id) = self.strategy.select_candidate(&request, &candidates) {
            if !self.pool.reserve(&driver_id, trip_id) {
                // Raced with another reservation; drop this candidate and
                // ask the strategy for the next one.
                candidates.retain(|d| d.id != driver_id);
                continue;
            }

            let envelope = EventEnvelope::new(
                trip_id,
                emit_sequence,
                TripEventPayload::DriverAssigned {
                    driver_id: driver_id.clone(),
                },
            );
            if let Err(e) = self.publisher.publish(&envelope).await {
                // Broker hiccup, not a matching failure: free the driver
                // and give the attempt back before the message is retried.
                self.pool.release(&driver_id, trip_id);
                let mut pending = self.pending();
                if let Some(entry) = pending.get_mut(&trip_id) {
                    entry.attempts = entry.attempts.saturating_sub(1);
                }
                return Err(e);
            }

            if let Some(entry) = self.pending().get_mut(&trip_id) {
                entry.matched = true;
            }
            info!(%trip_id, driver_id, sequence = emit_sequence, "driver assigned");
            return Ok(MatchDecision::Assigned { driver_id });
        }

        if attempt >= self.policy.max_attempts {
            let envelope = EventEnvelope::new(
                trip_id,
                emit_sequence,
                TripEventPayload::TripCancelled {
                    reason: "no driver available".to_string(),
                },
            );
            self.publisher.publish(&envelope).await?;
            self.pending().remove(&trip_id);
            info!(%trip_id, attempts = attempt, "matching gave up, trip cancelled");
            return Ok(MatchDecision::GaveUp);
        }

        info!(%trip_id, attempt, "no candidate available, will retry");
        Ok(MatchDecision::RetryLater { attempt })
    }

    /// Driver dropped out. If a trip was mid-assignment to them, republish
    /// the ride request with a bumped sequence so it gets re-matched
    /// instead of staying stuck.
    pub async fn handle_driver_unregistered(
        &self,
        driver_id: &str,
    ) -> Result<Option<Uuid>, PublishError> {
        let Some(trip_id) = self.pool.unregister(driver_id) else {
            return Ok(None);
        };

        let republish = {
            let mut pending = self.pending();
            pending.get_mut(&trip_id).map(|entry| {
                entry.matched = false;
                entry.attempts = 0;
                entry.emit_sequence += 2;
                let request = &entry.request;
                EventEnvelope::new(
                    trip_id,
                    entry.emit_sequence - 1,
                    TripEventPayload::TripRequested {
                        rider_id: request.rider_id.clone(),
                        fare_id: request.fare_id,
                        package: request.package,
                        pickup: request.pickup,
                        destination: request.destination,
                    },
                )
            })
        };

        if let Some(envelope) = republish {
            warn!(%trip_id, driver_id, "driver dropped mid-assignment, requeueing match");
            self.publisher.publish(&envelope).await?;
        }
        Ok(Some(trip_id))
    }

    /// Called when the trip reaches a terminal state; drops the matching
    /// bookkeeping for it.
    pub fn forget_trip(&self, trip_id: Uuid) {
        self.pending().remove(&trip_id);
    }

    /// Returns the event's driver to the pool after the trip side reported
    /// the assignment superseded or the trip finished. Scoped to the trip
    /// so a redelivered release cannot free a driver who has since been
    /// reserved elsewhere.
    pub fn release_driver(&self, driver_id: &str, trip_id: Uuid) {
        self.pool.release(driver_id, trip_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::NearestAvailable;
    use async_trait::async_trait;
    use rideflow_shared::{Coordinate, PackageType};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<EventEnvelope>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError> {
            self.published.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn request_envelope(trip_id: Uuid) -> EventEnvelope {
        EventEnvelope::new(
            trip_id,
            0,
            TripEventPayload::TripRequested {
                rider_id: "rider-1".into(),
                fare_id: Uuid::new_v4(),
                package: PackageType::Sedan,
                pickup: Coordinate::new(40.0, -73.0),
                destination: Coordinate::new(40.1, -73.1),
            },
        )
    }

    fn processor(
        pool: Arc<DriverPool>,
        publisher: Arc<RecordingPublisher>,
        max_attempts: u32,
    ) -> DriverAssignmentProcessor {
        DriverAssignmentProcessor::new(
            pool,
            Arc::new(NearestAvailable),
            publisher,
            MatchPolicy {
                max_attempts,
                retry_interval: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_assigns_and_reserves_driver() {
        let pool = Arc::new(DriverPool::new());
        pool.register("driver-1", PackageType::Sedan, Coordinate::new(40.0, -73.0));
        let publisher = Arc::new(RecordingPublisher::default());
        let proc = processor(pool.clone(), publisher.clone(), 3);

        let trip_id = Uuid::new_v4();
        let decision = proc
            .handle_trip_requested(&request_envelope(trip_id))
            .await
            .unwrap();

        assert!(matches!(decision, MatchDecision::Assigned { ref driver_id } if driver_id == "driver-1"));
        assert!(!pool.get("driver-1").unwrap().available);

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].sequence, 1);
        assert!(matches!(
            published[0].payload,
            TripEventPayload::DriverAssigned { .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_request_is_ignored_after_match() {
        let pool = Arc::new(DriverPool::new());
        pool.register("driver-1", PackageType::Sedan, Coordinate::new(40.0, -73.0));
        let publisher = Arc::new(RecordingPublisher::default());
        let proc = processor(pool.clone(), publisher.clone(), 3);

        let envelope = request_envelope(Uuid::new_v4());
        proc.handle_trip_requested(&envelope).await.unwrap();
        let decision = proc.handle_trip_requested(&envelope).await.unwrap();

        assert!(matches!(decision, MatchDecision::Ignored));
        assert_eq!(publisher.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_request_does_not_burn_attempts() {
        let pool = Arc::new(DriverPool::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let proc = processor(pool, publisher.clone(), 2);

        let envelope = request_envelope(Uuid::new_v4());
        let first = proc.handle_trip_requested(&envelope).await.unwrap();
        assert!(matches!(first, MatchDecision::RetryLater { attempt: 1 }));

        // Broker redelivery of the same unmatched request: no attempt
        // consumed, nothing published.
        let redelivered = proc.handle_trip_requested(&envelope).await.unwrap();
        assert!(matches!(redelivered, MatchDecision::Ignored));
        assert!(publisher.published.lock().unwrap().is_empty());

        // The budget is intact: the next real attempt is number 2.
        let second = proc.match_once(envelope.trip_id).await.unwrap();
        assert!(matches!(second, MatchDecision::GaveUp));
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let pool = Arc::new(DriverPool::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let proc = processor(pool, publisher.clone(), 2);

        let trip_id = Uuid::new_v4();
        let first = proc
            .handle_trip_requested(&request_envelope(trip_id))
            .await
            .unwrap();
        assert!(matches!(first, MatchDecision::RetryLater { attempt: 1 }));

        let second = proc.match_once(trip_id).await.unwrap();
        assert!(matches!(second, MatchDecision::GaveUp));

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        match &published[0].payload {
            TripEventPayload::TripCancelled { reason } => {
                assert_eq!(reason, "no driver available");
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unregister_mid_assignment_requeues_match() {
        let pool = Arc::new(DriverPool::new());
        pool.register("driver-1", PackageType::Sedan, Coordinate::new(40.0, -73.0));
        let publisher = Arc::new(RecordingPublisher::default());
        let proc = processor(pool.clone(), publisher.clone(), 3);

        let trip_id = Uuid::new_v4();
        proc.handle_trip_requested(&request_envelope(trip_id))
            .await
            .unwrap();

        let orphaned = proc.handle_driver_unregistered("driver-1").await.unwrap();
        assert_eq!(orphaned, Some(trip_id));

        // Second driver appears; the republished request re-matches with a
        // strictly newer assignment sequence.
        pool.register("driver-2", PackageType::Sedan, Coordinate::new(40.0, -73.0));
        let published = publisher.published.lock().unwrap().clone();
        let requeued = published.last().unwrap().clone();
        drop(published);

        let decision = proc.handle_trip_requested(&requeued).await.unwrap();
        assert!(matches!(decision, MatchDecision::Assigned { ref driver_id } if driver_id == "driver-2"));

        let published = publisher.published.lock().unwrap();
        let assignment = published.last().unwrap();
        assert!(assignment.sequence > 1);
    }
}
