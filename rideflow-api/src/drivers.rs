use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use rideflow_driver::Driver;
use rideflow_shared::{Coordinate, PackageType};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterDriverRequest {
    #[serde(rename = "driverID")]
    pub driver_id: String,
    #[serde(rename = "packageSlug")]
    pub package_slug: String,
    pub location: Coordinate,
}

#[derive(Debug, Serialize)]
pub struct RegisterDriverResponse {
    pub driver: Driver,
}

/// POST /driver/register
/// Registration over HTTP for drivers not using the socket; idempotent
/// for the same driver ID.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<RegisterDriverResponse>, AppError> {
    let package = PackageType::from_slug(&payload.package_slug).ok_or_else(|| {
        AppError::Validation(format!("unknown package slug: {}", payload.package_slug))
    })?;
    if !payload.location.in_bounds() {
        return Err(AppError::Validation("location out of bounds".to_string()));
    }

    let driver = state
        .pool
        .register(&payload.driver_id, package, payload.location);
    Ok(Json(RegisterDriverResponse { driver }))
}

#[derive(Debug, Deserialize)]
pub struct UnregisterDriverRequest {
    #[serde(rename = "driverID")]
    pub driver_id: String,
}

/// POST /driver/unregister
/// Takes the driver out of the pool. A trip mid-assignment to them goes
/// back through matching.
pub async fn unregister(
    State(state): State<AppState>,
    Json(payload): Json<UnregisterDriverRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let orphaned = state
        .assignment
        .handle_driver_unregistered(&payload.driver_id)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok((
        StatusCode::OK,
        Json(json!({ "requeuedTrip": orphaned })),
    ))
}
