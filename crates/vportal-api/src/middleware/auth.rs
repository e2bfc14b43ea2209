//! JWT Authentication Middleware
//!
//! Extracts the bearer token from the Authorization header, validates it and
//! makes the resulting [`AuthContext`] available to handlers via Axum's
//! Extension.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::debug;
use vportal_auth::JwtValidator;
use vportal_proto::{AuthContext, CONFIG_SCOPE};

use crate::models::ErrorResponse;

/// JWT validation state shared across middleware instances
#[derive(Clone)]
pub struct JwtState {
    pub validator: Arc<JwtValidator>,
}

impl JwtState {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            validator: Arc::new(JwtValidator::new(secret)),
        }
    }
}

fn reject(status: StatusCode, error: String, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error,
            code: Some(code.to_string()),
        }),
    )
}

/// Require a valid access token carrying the `config` scope
///
/// # Errors
/// - 401 if the header is missing or malformed, or the token is invalid or expired
/// - 403 if the token lacks the `config` scope
pub async fn require_auth(
    State(state): State<Arc<JwtState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            reject(
                StatusCode::UNAUTHORIZED,
                "Missing Authorization header".to_string(),
                "MISSING_AUTH",
            )
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        reject(
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format. Expected 'Bearer <token>'".to_string(),
            "INVALID_AUTH_FORMAT",
        )
    })?;

    let claims = state.validator.validate(token).map_err(|e| {
        debug!("Rejected access token: {}", e);
        reject(
            StatusCode::UNAUTHORIZED,
            format!("Invalid or expired token: {}", e),
            "INVALID_TOKEN",
        )
    })?;

    let auth: AuthContext = claims.into_auth_context();
    if !auth.has_scope(CONFIG_SCOPE) {
        return Err(reject(
            StatusCode::FORBIDDEN,
            format!("Token lacks the '{}' scope", CONFIG_SCOPE),
            "INSUFFICIENT_SCOPE",
        ));
    }

    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}
