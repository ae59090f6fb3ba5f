use axum::{
    extract::{Path, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use parkr_core::{Booking, UserIdentity};

use crate::error::AppError;
use crate::middleware::{user_auth_middleware, Claims};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBookingRequest {
    pub slot_id: String,
    pub lot_id: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub duration: u32,
}

#[derive(Debug, Serialize)]
pub struct BookingsResponse {
    pub bookings: Vec<Booking>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/bookings/schedule", post(schedule_booking))
        .route("/bookings/user/{email}", get(list_user_bookings))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

/// Records a future booking. Current occupancy is not consulted.
async fn schedule_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ScheduleBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    let user = match req.user_email.as_deref() {
        Some(email) if !claims.can_act_for(email) => {
            return Err(AppError::AuthorizationError(
                "cannot schedule on behalf of another user".to_string(),
            ));
        }
        Some(email) if email != claims.email => {
            UserIdentity::new(email, req.user_name.clone().unwrap_or_default())
        }
        _ => UserIdentity::new(
            claims.email.clone(),
            req.user_name.clone().unwrap_or_else(|| claims.name.clone()),
        ),
    };

    let booking = state
        .scheduler
        .schedule(&user, &req.lot_id, &req.slot_id, req.date, &req.time, req.duration)
        .await
        .map_err(AppError::from_reservation)?;

    Ok(Json(booking))
}

async fn list_user_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(email): Path<String>,
) -> Result<Json<BookingsResponse>, AppError> {
    if !claims.can_act_for(&email) {
        return Err(AppError::AuthorizationError(
            "cannot list another user's bookings".to_string(),
        ));
    }

    let bookings = state
        .bookings
        .list_for_user(&email)
        .await
        .map_err(AppError::from_store)?;
    Ok(Json(BookingsResponse { bookings }))
}
