use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use parkr_core::UserIdentity;

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_USER: &str = "USER";
pub const ROLE_ADMIN: &str = "ADMIN";

// ============================================================================
// JWT Claims
// ============================================================================

/// Claims issued by the external auth service. Only verified here, never minted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.email.clone(), self.name.clone())
    }

    /// Whether the bearer may act on `email`'s data.
    pub fn can_act_for(&self, email: &str) -> bool {
        self.is_admin() || self.email == email
    }
}

fn bearer_claims(state: &AppState, req: &Request) -> Result<Claims, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::AuthenticationError("Missing Authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::AuthenticationError("Expected a Bearer token".to_string()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected bearer token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    Ok(token_data.claims)
}

// ============================================================================
// User Authentication Middleware
// ============================================================================

/// Any signed-in user. Admins pass too.
pub async fn user_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = bearer_claims(&state, &req)?;

    if claims.role != ROLE_USER && claims.role != ROLE_ADMIN {
        return Err(AppError::AuthorizationError(format!("Role {} may not use this service", claims.role)));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Admin Authentication Middleware
// ============================================================================

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = bearer_claims(&state, &req)?;

    if !claims.is_admin() {
        return Err(AppError::AuthorizationError("Admin role required".to_string()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
