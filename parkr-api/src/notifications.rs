use axum::{extract::State, middleware, routing::post, Extension, Json, Router};
use serde::Serialize;

use parkr_shared::SlotNotification;

use crate::error::AppError;
use crate::middleware::{user_auth_middleware, Claims};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/notifications/send-email", post(send_email))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

/// Accepts the notification and returns before delivery is attempted.
async fn send_email(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(notification): Json<SlotNotification>,
) -> Result<Json<QueuedResponse>, AppError> {
    if !claims.can_act_for(notification.user_email.expose()) {
        return Err(AppError::AuthorizationError(
            "cannot notify on behalf of another user".to_string(),
        ));
    }

    state.dispatcher.dispatch(notification);
    Ok(Json(QueuedResponse { queued: true }))
}
