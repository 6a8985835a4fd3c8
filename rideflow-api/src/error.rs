use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use rideflow_fare::FareError;
use rideflow_trip::{RepositoryError, TripError};

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Internal(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<TripError> for AppError {
    fn from(err: TripError) -> Self {
        match err {
            TripError::FareNotFound(_) | TripError::TripNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            TripError::FareOwnership { .. } => AppError::Validation(err.to_string()),
            TripError::PaymentMismatch { .. } => AppError::Unprocessable(err.to_string()),
            TripError::Fare(e) => e.into(),
            TripError::Repository(RepositoryError::VersionConflict { .. }) => {
                AppError::Conflict(err.to_string())
            }
            other => AppError::Internal(other.into()),
        }
    }
}

impl From<FareError> for AppError {
    fn from(err: FareError) -> Self {
        AppError::Validation(err.to_string())
    }
}
