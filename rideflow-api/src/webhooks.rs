use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use rideflow_shared::{EventEnvelope, TripEventPayload};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StripeWebhook {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: CheckoutSession,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Amount in the smallest currency unit, matching fare cents.
    pub amount_total: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// POST /webhook/stripe
/// Payment confirmation entry point. The webhook only validates and
/// publishes `trip.payment-received`; the trip transition itself happens
/// in the consumer so it goes through the same CAS path as everything
/// else.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    Json(payload): Json<StripeWebhook>,
) -> Result<StatusCode, AppError> {
    info!(event = %payload.type_, session = %payload.data.object.id, "stripe webhook received");

    if payload.type_ != "checkout.session.completed" {
        return Ok(StatusCode::OK);
    }

    let session = payload.data.object;
    let trip_id = session
        .metadata
        .get("trip_id")
        .ok_or_else(|| AppError::Validation("webhook missing trip_id metadata".to_string()))?;
    let trip_id = Uuid::parse_str(trip_id)
        .map_err(|_| AppError::Validation(format!("invalid trip_id metadata: {trip_id}")))?;

    let trip = state
        .trips
        .get_trip(trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} not found")))?;
    let fare = state
        .trips
        .get_fare(trip.fare_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("fare {} not found", trip.fare_id)))?;

    // Reject obviously wrong charges at the edge; the consumer re-checks
    // before completing the trip.
    if session.amount_total != fare.total_price_cents {
        return Err(AppError::Unprocessable(format!(
            "payment amount {} does not match fare total {}",
            session.amount_total, fare.total_price_cents
        )));
    }

    let envelope = EventEnvelope::new(
        trip_id,
        trip.next_sequence(),
        TripEventPayload::PaymentReceived {
            amount_cents: session.amount_total,
        },
    );
    state
        .publisher
        .publish(&envelope)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok(StatusCode::OK)
}
