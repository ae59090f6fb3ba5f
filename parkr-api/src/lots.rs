use axum::{extract::State, middleware, routing::get, Json, Router};
use serde::Serialize;

use parkr_core::Lot;
use parkr_store::app_config::BusinessRules;

use crate::error::AppError;
use crate::middleware::user_auth_middleware;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LotsResponse {
    pub data: Vec<Lot>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/parking-lots", get(list_lots))
        .route("/settings", get(settings))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

async fn list_lots(State(state): State<AppState>) -> Result<Json<LotsResponse>, AppError> {
    let data = state.lots.list_lots().await.map_err(AppError::from_store)?;
    Ok(Json(LotsResponse { data }))
}

async fn settings(State(state): State<AppState>) -> Json<BusinessRules> {
    Json(state.business_rules.clone())
}
