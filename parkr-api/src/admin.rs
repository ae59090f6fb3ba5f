use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use parkr_core::{Booking, BookingStatus, SnapshotStats};

use crate::bookings::BookingsResponse;
use crate::error::AppError;
use crate::middleware::admin_auth_middleware;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub lot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: BookingStatus,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: BookingStatus,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(slot_stats))
        .route("/admin/bookings", get(bookings_by_status))
        .route("/admin/bookings/{booking_id}/status", put(update_booking_status))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

async fn slot_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<SnapshotStats>, AppError> {
    let slots = state
        .slots
        .list_slots(query.lot_id.as_deref())
        .await
        .map_err(AppError::from_store)?;
    Ok(Json(SnapshotStats::from_slots(&slots)))
}

async fn bookings_by_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<BookingsResponse>, AppError> {
    let bookings = state
        .bookings
        .list_by_status(query.status)
        .await
        .map_err(AppError::from_store)?;
    Ok(Json(BookingsResponse { bookings }))
}

async fn update_booking_status(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .bookings
        .update_status(booking_id, update.status)
        .await
        .map_err(AppError::from_store)?;

    info!("Booking {} set to {}", booking_id, booking.status);
    Ok(Json(booking))
}
