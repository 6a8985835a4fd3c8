use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use rideflow_fare::RideFare;
use rideflow_shared::Coordinate;
use rideflow_trip::Trip;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PreviewTripRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub pickup: Coordinate,
    pub destination: Coordinate,
    /// When present, price only this tier; an unknown slug is a 400.
    #[serde(rename = "packageSlug", default)]
    pub package_slug: Option<String>,
}

/// POST /trip/preview
/// One priced fare per package tier for the requested route, or a single
/// fare when the rider already picked a tier.
pub async fn preview(
    State(state): State<AppState>,
    Json(payload): Json<PreviewTripRequest>,
) -> Result<Json<Vec<RideFare>>, AppError> {
    let fares = match payload.package_slug.as_deref() {
        Some(slug) => vec![
            state
                .trips
                .preview_tier(&payload.user_id, payload.pickup, payload.destination, slug)
                .await?,
        ],
        None => {
            state
                .trips
                .preview(&payload.user_id, payload.pickup, payload.destination)
                .await?
        }
    };
    Ok(Json(fares))
}

#[derive(Debug, Deserialize)]
pub struct StartTripRequest {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "fareID")]
    pub fare_id: Uuid,
}

/// POST /trip/start
/// Creates the trip in `Requested` and kicks off matching via the broker.
pub async fn start(
    State(state): State<AppState>,
    Json(payload): Json<StartTripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state
        .trips
        .create_trip(&payload.user_id, payload.fare_id)
        .await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// GET /trip/{id}
/// The authoritative state; clients that missed a realtime push re-fetch
/// here.
pub async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    let trip = state
        .trips
        .get_trip(trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} not found")))?;
    Ok(Json(trip))
}
