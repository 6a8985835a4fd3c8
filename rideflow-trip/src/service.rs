use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use rideflow_fare::{FareEstimator, RideFare};
use rideflow_shared::{Coordinate, EventEnvelope, EventPublisher, TripEventPayload};

use crate::error::TripError;
use crate::models::{TransitionOutcome, Trip};
use crate::repository::{FareRepository, RepositoryError, TripRepository};

/// Bounded re-reads after a CAS conflict before handing the message back
/// for broker redelivery.
const CAS_RETRY_LIMIT: u32 = 3;

/// Consumer-facing result of applying an event.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Transition committed; carries the new state for fan-out.
    Applied(Trip),
    /// Duplicate or out-of-order delivery. Acknowledge and discard.
    Stale,
    /// Lost to a concurrent winner. Acknowledge, do not retry; when set,
    /// `released_driver` must be returned to the available pool.
    Superseded { released_driver: Option<String> },
    /// Transient infrastructure failure. Negative-ack for redelivery.
    Retry,
}

/// Orchestrates every trip transition: gateway-initiated operations and
/// the consumer-side application of broker events. All writes go through
/// the repository CAS, so concurrent attempts on the same trip resolve
/// deterministically.
pub struct TripService {
    trips: Arc<dyn TripRepository>,
    fares: Arc<dyn FareRepository>,
    publisher: Arc<dyn EventPublisher>,
    estimator: FareEstimator,
}

impl TripService {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        fares: Arc<dyn FareRepository>,
        publisher: Arc<dyn EventPublisher>,
        estimator: FareEstimator,
    ) -> Self {
        Self {
            trips,
            fares,
            publisher,
            estimator,
        }
    }

    /// One persisted fare per known tier for the rider to pick from.
    pub async fn preview(
        &self,
        rider_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<Vec<RideFare>, TripError> {
        let fares = self.estimator.estimate_all(rider_id, pickup, destination)?;
        for fare in &fares {
            self.fares.save(fare.clone()).await?;
        }
        Ok(fares)
    }

    /// Single-tier quote for clients that already know the package slug.
    /// Unknown slugs surface `FareError::UnknownTier`.
    pub async fn preview_tier(
        &self,
        rider_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
        slug: &str,
    ) -> Result<RideFare, TripError> {
        let fare = self
            .estimator
            .estimate_for_slug(rider_id, pickup, destination, slug)?;
        self.fares.save(fare.clone()).await?;
        Ok(fare)
    }

    /// Creates the trip in `Requested` and emits `trip.requested`.
    /// Persist-then-publish: the publisher's reconciliation path covers a
    /// publish that exhausts its retries after the trip is committed.
    pub async fn create_trip(&self, rider_id: &str, fare_id: Uuid) -> Result<Trip, TripError> {
        let fare = self
            .fares
            .get(fare_id)
            .await?
            .ok_or(TripError::FareNotFound(fare_id))?;
        if fare.rider_id != rider_id {
            return Err(TripError::FareOwnership {
                fare_id,
                rider_id: rider_id.to_string(),
            });
        }

        let trip = Trip::new(rider_id.to_string(), &fare);
        self.trips.insert(trip.clone()).await?;

        let envelope = EventEnvelope::new(
            trip.id,
            trip.sequence,
            TripEventPayload::TripRequested {
                rider_id: trip.rider_id.clone(),
                fare_id: fare.id,
                package: trip.package,
                pickup: trip.pickup,
                destination: trip.destination,
            },
        );
        self.publisher.publish(&envelope).await?;

        Ok(trip)
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Option<Trip>, TripError> {
        Ok(self.trips.get(trip_id).await?.map(|vt| vt.trip))
    }

    pub async fn get_fare(&self, fare_id: Uuid) -> Result<Option<RideFare>, TripError> {
        Ok(self.fares.get(fare_id).await?)
    }

    /// Driver-initiated `DriverAssigned -> InProgress`.
    pub async fn start_ride(
        &self,
        trip_id: Uuid,
        driver_id: &str,
    ) -> Result<ApplyOutcome, TripError> {
        self.transition(trip_id, |trip| {
            let sequence = trip.next_sequence();
            trip.start_ride(driver_id, sequence)
        })
        .await
    }

    /// Rider- or policy-initiated cancellation.
    pub async fn cancel_trip(
        &self,
        trip_id: Uuid,
        reason: &str,
    ) -> Result<ApplyOutcome, TripError> {
        self.transition(trip_id, |trip| {
            let sequence = trip.next_sequence();
            trip.cancel(reason, sequence)
        })
        .await
    }

    /// Applies a `DriverAssigned` event. Safe under redelivery, duplication
    /// and out-of-order arrival; when the event loses to a concurrent
    /// winner the event's driver is reported for release.
    pub async fn apply_driver_assigned(&self, envelope: &EventEnvelope) -> ApplyOutcome {
        let TripEventPayload::DriverAssigned { driver_id } = &envelope.payload else {
            warn!(trip_id = %envelope.trip_id, "unexpected payload on driver-assignment event");
            return ApplyOutcome::Stale;
        };

        let mut tries = 0;
        loop {
            let versioned = match self.trips.get(envelope.trip_id).await {
                Ok(Some(vt)) => vt,
                Ok(None) => {
                    warn!(trip_id = %envelope.trip_id, "assignment for unknown trip, discarding");
                    return ApplyOutcome::Stale;
                }
                Err(e) => {
                    error!(error = %e, trip_id = %envelope.trip_id, "repository read failed");
                    return ApplyOutcome::Retry;
                }
            };

            let attached = versioned.trip.driver_id.clone();
            let mut trip = versioned.trip;
            match trip.assign_driver(driver_id, envelope.sequence) {
                TransitionOutcome::Applied => {
                    match self.trips.update(&trip, versioned.version).await {
                        Ok(_) => return ApplyOutcome::Applied(trip),
                        Err(RepositoryError::VersionConflict { .. }) if tries < CAS_RETRY_LIMIT => {
                            tries += 1;
                            continue;
                        }
                        Err(e) => {
                            error!(error = %e, trip_id = %envelope.trip_id, "CAS update failed");
                            return ApplyOutcome::Retry;
                        }
                    }
                }
                _ => {
                    // The event did not apply. If its driver is not the one
                    // attached, this assignment lost a race and the driver
                    // goes back to the pool.
                    if attached.as_deref() == Some(driver_id.as_str()) {
                        return ApplyOutcome::Stale;
                    }
                    return ApplyOutcome::Superseded {
                        released_driver: Some(driver_id.clone()),
                    };
                }
            }
        }
    }

    /// Applies a `PaymentReceived` event: `InProgress -> Completed` guarded
    /// by the payment amount matching the fare total. A mismatch is
    /// surfaced, never auto-applied.
    pub async fn apply_payment(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<ApplyOutcome, TripError> {
        let TripEventPayload::PaymentReceived { amount_cents } = envelope.payload else {
            warn!(trip_id = %envelope.trip_id, "unexpected payload on payment event");
            return Ok(ApplyOutcome::Stale);
        };

        let trip = match self.trips.get(envelope.trip_id).await {
            Ok(Some(vt)) => vt.trip,
            Ok(None) => {
                warn!(trip_id = %envelope.trip_id, "payment for unknown trip, discarding");
                return Ok(ApplyOutcome::Stale);
            }
            Err(e) => {
                error!(error = %e, trip_id = %envelope.trip_id, "repository read failed");
                return Ok(ApplyOutcome::Retry);
            }
        };

        let fare = self
            .fares
            .get(trip.fare_id)
            .await?
            .ok_or(TripError::FareNotFound(trip.fare_id))?;
        if amount_cents != fare.total_price_cents {
            return Err(TripError::PaymentMismatch {
                expected: fare.total_price_cents,
                received: amount_cents,
            });
        }

        match self
            .transition(envelope.trip_id, |trip| trip.complete(envelope.sequence))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(TripError::Repository(RepositoryError::Unavailable(reason))) => {
                error!(reason, trip_id = %envelope.trip_id, "repository unavailable");
                Ok(ApplyOutcome::Retry)
            }
            Err(e) => Err(e),
        }
    }

    /// Applies a `TripCancelled` event (e.g. matching gave up). The caller
    /// releases `Applied(trip).driver_id` if one was attached.
    pub async fn apply_cancelled(&self, envelope: &EventEnvelope) -> ApplyOutcome {
        let TripEventPayload::TripCancelled { reason } = &envelope.payload else {
            warn!(trip_id = %envelope.trip_id, "unexpected payload on cancellation event");
            return ApplyOutcome::Stale;
        };

        match self
            .transition(envelope.trip_id, |trip| {
                trip.cancel(reason, envelope.sequence)
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(TripError::TripNotFound(id)) => {
                warn!(trip_id = %id, "cancellation for unknown trip, discarding");
                ApplyOutcome::Stale
            }
            Err(e) => {
                error!(error = %e, trip_id = %envelope.trip_id, "failed to apply cancellation");
                ApplyOutcome::Retry
            }
        }
    }

    /// Read-modify-CAS loop shared by the direct transition paths. The
    /// closure re-runs against a fresh read after a version conflict, so a
    /// loser retries only while its transition is still legal.
    async fn transition<F>(&self, trip_id: Uuid, mut attempt: F) -> Result<ApplyOutcome, TripError>
    where
        F: FnMut(&mut Trip) -> TransitionOutcome,
    {
        let mut tries = 0;
        loop {
            let versioned = self
                .trips
                .get(trip_id)
                .await?
                .ok_or(TripError::TripNotFound(trip_id))?;

            let mut trip = versioned.trip;
            match attempt(&mut trip) {
                TransitionOutcome::Applied => {}
                TransitionOutcome::Stale | TransitionOutcome::Terminal => {
                    return Ok(ApplyOutcome::Stale)
                }
                TransitionOutcome::WrongState => {
                    return Ok(ApplyOutcome::Superseded {
                        released_driver: None,
                    })
                }
            }

            match self.trips.update(&trip, versioned.version).await {
                Ok(_) => return Ok(ApplyOutcome::Applied(trip)),
                Err(RepositoryError::VersionConflict { .. }) if tries < CAS_RETRY_LIMIT => {
                    tries += 1;
                    continue;
                }
                Err(RepositoryError::VersionConflict { .. }) => return Ok(ApplyOutcome::Retry),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
