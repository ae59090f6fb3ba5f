use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use parkr_core::{ReservationError, Slot, StoreError};

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    /// Lost a conditional update; carries the slot as it is now.
    SlotConflict(Box<Slot>),
    ConflictError(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl AppError {
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { current } => AppError::SlotConflict(current),
            StoreError::NotFound(what) => AppError::NotFoundError(format!("{} not found", what)),
            StoreError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            StoreError::Serialization(msg) => AppError::InternalServerError(msg),
        }
    }

    pub fn from_reservation(err: ReservationError) -> Self {
        match err {
            ReservationError::InvalidBookingWindow(msg) => AppError::ValidationError(msg),
            e @ ReservationError::UnknownSlot { .. } => AppError::NotFoundError(e.to_string()),
            e @ ReservationError::NotSlotOwner { .. } => AppError::AuthorizationError(e.to_string()),
            e @ (ReservationError::AlreadyHoldingSlot { .. } | ReservationError::SlotUnavailable { .. }) => {
                AppError::ConflictError(e.to_string())
            }
            ReservationError::TransientFetchError(msg) => AppError::ServiceUnavailable(msg),
            ReservationError::Store(e) => AppError::from_store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::SlotConflict(current) => (
                StatusCode::CONFLICT,
                json!({
                    "error": format!("slot {}/{} is {}", current.lot_id, current.slot_id, current.action),
                    "current": current,
                }),
            ),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Backing service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": "Service temporarily unavailable" }),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}
