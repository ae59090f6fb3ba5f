use axum::{
    extract::{Query, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tracing::info;

use parkr_core::Slot;
use parkr_shared::Masked;

use crate::error::AppError;
use crate::middleware::{user_auth_middleware, Claims};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotsQuery {
    pub lot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotCommand {
    pub slot_id: String,
    pub lot_id: String,
    /// Defaults to the bearer's email; anything else is refused.
    pub rfid: Option<String>,
}

impl SlotCommand {
    fn rfid_for(&self, claims: &Claims) -> Result<String, AppError> {
        match &self.rfid {
            Some(rfid) if rfid != &claims.email => Err(AppError::AuthorizationError(
                "rfid must match the signed-in user".to_string(),
            )),
            _ => Ok(claims.email.clone()),
        }
    }
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/slots", get(list_slots))
        .route("/reserve", post(reserve_slot))
        .route("/free", post(free_slot))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

async fn list_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    let slots = state
        .slots
        .list_slots(query.lot_id.as_deref())
        .await
        .map_err(AppError::from_store)?;
    Ok(Json(slots))
}

/// Conditional reserve: succeeds only if the slot is free right now.
async fn reserve_slot(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(cmd): Json<SlotCommand>,
) -> Result<Json<Slot>, AppError> {
    let rfid = cmd.rfid_for(&claims)?;
    let slot = state
        .slots
        .reserve(&cmd.lot_id, &cmd.slot_id, &rfid)
        .await
        .map_err(AppError::from_store)?;

    info!("Slot {}/{} reserved by {:?}", cmd.lot_id, cmd.slot_id, Masked(&rfid));
    Ok(Json(slot))
}

/// Conditional free: succeeds only if the bearer holds the slot right now.
async fn free_slot(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(cmd): Json<SlotCommand>,
) -> Result<Json<Slot>, AppError> {
    let rfid = cmd.rfid_for(&claims)?;
    let slot = state
        .slots
        .free(&cmd.lot_id, &cmd.slot_id, &rfid)
        .await
        .map_err(AppError::from_store)?;

    info!("Slot {}/{} freed by {:?}", cmd.lot_id, cmd.slot_id, Masked(&rfid));
    Ok(Json(slot))
}
