use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rideflow_fare::RideFare;
use rideflow_shared::{Coordinate, PackageType};

/// Trip status in the lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Requested,
    DriverAssigned,
    InProgress,
    Completed,
    Cancelled,
}

/// Result of attempting a transition on the aggregate.
///
/// None of the non-`Applied` variants are errors: a stale or illegal
/// attempt leaves the trip untouched, which is what makes redelivered
/// events safe to apply blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Event sequence not newer than the last applied one.
    Stale,
    /// Trip already `Completed` or `Cancelled`.
    Terminal,
    /// Guard failed: the trip moved on under a concurrent winner, or the
    /// caller's identity doesn't match.
    WrongState,
}

/// The aggregate for one ride request, creation to terminal state.
/// Owned exclusively by the trip service; other services hold only its ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub rider_id: String,
    pub driver_id: Option<String>,
    pub fare_id: Uuid,
    pub package: PackageType,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    pub status: TripStatus,
    /// Sequence of the last applied event, starting at 0 on creation.
    /// Consumers discard anything not strictly newer.
    pub sequence: u64,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn new(rider_id: String, fare: &RideFare) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rider_id,
            driver_id: None,
            fare_id: fare.id,
            package: fare.package,
            pickup: fare.pickup,
            destination: fare.destination,
            status: TripStatus::Requested,
            sequence: 0,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TripStatus::Completed | TripStatus::Cancelled)
    }

    fn gate(&self, sequence: u64) -> Option<TransitionOutcome> {
        if self.is_terminal() {
            return Some(TransitionOutcome::Terminal);
        }
        if sequence <= self.sequence {
            return Some(TransitionOutcome::Stale);
        }
        None
    }

    fn advance(&mut self, status: TripStatus, sequence: u64) {
        self.status = status;
        self.sequence = sequence;
        self.updated_at = Utc::now();
    }

    /// `Requested -> DriverAssigned`. A strictly newer assignment on a
    /// non-terminal trip replaces the driver (re-match after a dropout);
    /// an `InProgress` trip returns to `DriverAssigned` so the
    /// replacement driver starts the ride themselves. A racing duplicate
    /// carries the same sequence and lands in `Stale`, so exactly one
    /// driver is attached at any time.
    pub fn assign_driver(&mut self, driver_id: &str, sequence: u64) -> TransitionOutcome {
        if let Some(blocked) = self.gate(sequence) {
            return blocked;
        }
        self.driver_id = Some(driver_id.to_string());
        self.advance(TripStatus::DriverAssigned, sequence);
        TransitionOutcome::Applied
    }

    /// `DriverAssigned -> InProgress`; only the assigned driver may start.
    pub fn start_ride(&mut self, driver_id: &str, sequence: u64) -> TransitionOutcome {
        if let Some(blocked) = self.gate(sequence) {
            return blocked;
        }
        if self.status != TripStatus::DriverAssigned {
            return TransitionOutcome::WrongState;
        }
        if self.driver_id.as_deref() != Some(driver_id) {
            return TransitionOutcome::WrongState;
        }
        self.advance(TripStatus::InProgress, sequence);
        TransitionOutcome::Applied
    }

    /// `InProgress -> Completed`. The payment-amount guard lives in the
    /// service, which holds the fare.
    pub fn complete(&mut self, sequence: u64) -> TransitionOutcome {
        if let Some(blocked) = self.gate(sequence) {
            return blocked;
        }
        if self.status != TripStatus::InProgress {
            return TransitionOutcome::WrongState;
        }
        self.advance(TripStatus::Completed, sequence);
        TransitionOutcome::Applied
    }

    /// `Requested | DriverAssigned -> Cancelled`.
    pub fn cancel(&mut self, reason: &str, sequence: u64) -> TransitionOutcome {
        if let Some(blocked) = self.gate(sequence) {
            return blocked;
        }
        match self.status {
            TripStatus::Requested | TripStatus::DriverAssigned => {
                self.cancel_reason = Some(reason.to_string());
                self.advance(TripStatus::Cancelled, sequence);
                TransitionOutcome::Applied
            }
            _ => TransitionOutcome::WrongState,
        }
    }

    /// Sequence a locally initiated transition should carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence + 1
    }
}
