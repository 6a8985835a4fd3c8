//! Service-level tests for the trip lifecycle against the in-memory
//! reference store: consumer idempotency, the CAS race on assignment,
//! and the payment guard.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use rideflow_fare::{FareError, FareEstimator};
use rideflow_shared::{
    Coordinate, EventEnvelope, EventPublisher, PackageType, PublishError, TripEventPayload,
};
use rideflow_store::{InMemoryFareRepository, InMemoryTripRepository};
use rideflow_trip::{ApplyOutcome, TripError, TripService, TripStatus};

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

fn service() -> (Arc<TripService>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let service = Arc::new(TripService::new(
        Arc::new(InMemoryTripRepository::new()),
        Arc::new(InMemoryFareRepository::new()),
        publisher.clone(),
        FareEstimator::default(),
    ));
    (service, publisher)
}

async fn requested_trip(service: &TripService) -> rideflow_trip::Trip {
    let fares = service
        .preview(
            "rider-1",
            Coordinate::new(40.0, -73.0),
            Coordinate::new(40.1, -73.1),
        )
        .await
        .unwrap();
    let sedan = fares
        .iter()
        .find(|f| f.package == PackageType::Sedan)
        .unwrap();
    service.create_trip("rider-1", sedan.id).await.unwrap()
}

fn assignment(trip_id: Uuid, driver_id: &str, sequence: u64) -> EventEnvelope {
    EventEnvelope::new(
        trip_id,
        sequence,
        TripEventPayload::DriverAssigned {
            driver_id: driver_id.to_string(),
        },
    )
}

#[tokio::test]
async fn test_create_trip_publishes_request() {
    let (service, publisher) = service();
    let trip = requested_trip(&service).await;

    assert_eq!(trip.status, TripStatus::Requested);
    assert_eq!(trip.sequence, 0);

    let published = publisher.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].trip_id, trip.id);
    assert!(matches!(
        published[0].payload,
        TripEventPayload::TripRequested { .. }
    ));
}

#[tokio::test]
async fn test_single_tier_preview_validates_slug() {
    let (service, _) = service();
    let pickup = Coordinate::new(40.0, -73.0);
    let destination = Coordinate::new(40.1, -73.1);

    let fare = service
        .preview_tier("rider-1", pickup, destination, "van")
        .await
        .unwrap();
    assert_eq!(fare.package, PackageType::Van);

    // The persisted quote is selectable by a trip like any other.
    let trip = service.create_trip("rider-1", fare.id).await.unwrap();
    assert_eq!(trip.package, PackageType::Van);

    let err = service
        .preview_tier("rider-1", pickup, destination, "zeppelin")
        .await
        .unwrap_err();
    assert!(matches!(err, TripError::Fare(FareError::UnknownTier(_))));
}

#[tokio::test]
async fn test_create_trip_enforces_fare_ownership() {
    let (service, _) = service();
    let fares = service
        .preview(
            "rider-1",
            Coordinate::new(40.0, -73.0),
            Coordinate::new(40.1, -73.1),
        )
        .await
        .unwrap();

    let err = service
        .create_trip("rider-2", fares[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, TripError::FareOwnership { .. }));
}

#[tokio::test]
async fn test_duplicate_assignment_is_idempotent() {
    let (service, _) = service();
    let trip = requested_trip(&service).await;

    let event = assignment(trip.id, "driver-1", 1);
    assert!(matches!(
        service.apply_driver_assigned(&event).await,
        ApplyOutcome::Applied(_)
    ));

    // Redelivery of the exact same event: no state change, no release.
    assert!(matches!(
        service.apply_driver_assigned(&event).await,
        ApplyOutcome::Stale
    ));

    let stored = service.get_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::DriverAssigned);
    assert_eq!(stored.driver_id.as_deref(), Some("driver-1"));
    assert_eq!(stored.sequence, 1);
}

#[tokio::test]
async fn test_concurrent_assignments_resolve_to_one_driver() {
    let (service, _) = service();
    let trip = requested_trip(&service).await;

    let a = {
        let service = service.clone();
        let event = assignment(trip.id, "driver-a", 1);
        tokio::spawn(async move { service.apply_driver_assigned(&event).await })
    };
    let b = {
        let service = service.clone();
        let event = assignment(trip.id, "driver-b", 1);
        tokio::spawn(async move { service.apply_driver_assigned(&event).await })
    };

    let outcomes = [a.await.unwrap(), b.await.unwrap()];

    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, ApplyOutcome::Applied(_)))
        .count();
    assert_eq!(winners, 1);

    // The loser is acknowledged and reports its driver for release.
    let released: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            ApplyOutcome::Superseded {
                released_driver: Some(d),
            } => Some(d.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(released.len(), 1);

    let stored = service.get_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::DriverAssigned);
    let attached = stored.driver_id.unwrap();
    assert_ne!(Some(&attached), released.first().map(|s| s));
}

#[tokio::test]
async fn test_payment_completes_in_progress_trip() {
    let (service, _) = service();
    let trip = requested_trip(&service).await;

    service
        .apply_driver_assigned(&assignment(trip.id, "driver-1", 1))
        .await;
    assert!(matches!(
        service.start_ride(trip.id, "driver-1").await.unwrap(),
        ApplyOutcome::Applied(_)
    ));

    let fare_total = {
        let stored = service.get_trip(trip.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TripStatus::InProgress);
        // Amount must match the selected fare, which priced this route.
        FareEstimator::default()
            .estimate(
                "rider-1",
                stored.pickup,
                stored.destination,
                stored.package,
            )
            .unwrap()
            .total_price_cents
    };

    let payment = EventEnvelope::new(
        trip.id,
        3,
        TripEventPayload::PaymentReceived {
            amount_cents: fare_total,
        },
    );
    assert!(matches!(
        service.apply_payment(&payment).await.unwrap(),
        ApplyOutcome::Applied(_)
    ));

    let stored = service.get_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::Completed);

    // Replay of the payment is a no-op.
    assert!(matches!(
        service.apply_payment(&payment).await.unwrap(),
        ApplyOutcome::Stale
    ));
}

#[tokio::test]
async fn test_payment_mismatch_is_surfaced_not_applied() {
    let (service, _) = service();
    let trip = requested_trip(&service).await;

    service
        .apply_driver_assigned(&assignment(trip.id, "driver-1", 1))
        .await;
    service.start_ride(trip.id, "driver-1").await.unwrap();

    let payment = EventEnvelope::new(
        trip.id,
        3,
        TripEventPayload::PaymentReceived { amount_cents: 1 },
    );
    let err = service.apply_payment(&payment).await.unwrap_err();
    assert!(matches!(err, TripError::PaymentMismatch { .. }));

    let stored = service.get_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::InProgress);
}

#[tokio::test]
async fn test_payment_rejected_before_ride_starts() {
    let (service, _) = service();
    let trip = requested_trip(&service).await;

    service
        .apply_driver_assigned(&assignment(trip.id, "driver-1", 1))
        .await;

    let fare_total = {
        let stored = service.get_trip(trip.id).await.unwrap().unwrap();
        FareEstimator::default()
            .estimate(
                "rider-1",
                stored.pickup,
                stored.destination,
                stored.package,
            )
            .unwrap()
            .total_price_cents
    };

    // Correct amount, but the trip is not InProgress: guard failure, no-op.
    let payment = EventEnvelope::new(
        trip.id,
        2,
        TripEventPayload::PaymentReceived {
            amount_cents: fare_total,
        },
    );
    assert!(matches!(
        service.apply_payment(&payment).await.unwrap(),
        ApplyOutcome::Superseded { .. }
    ));

    let stored = service.get_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::DriverAssigned);
}

#[tokio::test]
async fn test_cancellation_event_from_matching() {
    let (service, _) = service();
    let trip = requested_trip(&service).await;

    let cancel = EventEnvelope::new(
        trip.id,
        1,
        TripEventPayload::TripCancelled {
            reason: "no driver available".into(),
        },
    );
    assert!(matches!(
        service.apply_cancelled(&cancel).await,
        ApplyOutcome::Applied(_)
    ));

    let stored = service.get_trip(trip.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TripStatus::Cancelled);
    assert_eq!(stored.cancel_reason.as_deref(), Some("no driver available"));

    // A late assignment for the cancelled trip releases its driver.
    let late = assignment(trip.id, "driver-9", 2);
    assert!(matches!(
        service.apply_driver_assigned(&late).await,
        ApplyOutcome::Superseded { released_driver: Some(d) } if d == "driver-9"
    ));
}
