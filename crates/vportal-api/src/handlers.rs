use axum::{
    extract::{rejection::FormRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use std::sync::Arc;
use tracing::{debug, info};
use vportal_control::{ConnectError, ConnectRequest, DEFAULT_DISPLAY_NAME};
use vportal_proto::{AuthContext, VpnProtocol};

use crate::models::*;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a transaction error to its HTTP status
pub fn error_status(e: &ConnectError) -> StatusCode {
    match e {
        ConnectError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ConnectError::NotAuthorized(_) => StatusCode::FORBIDDEN,
        ConnectError::ConflictingSession { .. } => StatusCode::CONFLICT,
        ConnectError::NoAddressAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ConnectError::DaemonUnavailable(_) => StatusCode::BAD_GATEWAY,
        ConnectError::StorageFailure(_) | ConnectError::CredentialFailure(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn api_error(e: ConnectError) -> ApiError {
    (
        error_status(&e),
        Json(ErrorResponse {
            error: e.to_string(),
            code: Some(e.code().to_string()),
        }),
    )
}

/// Protocols named in an `Accept` header; empty when none is named
fn accepted_protocols(headers: &HeaderMap) -> Vec<VpnProtocol> {
    let mut accepted: Vec<VpnProtocol> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(VpnProtocol::from_content_type)
        .collect();
    accepted.dedup();
    accepted
}

fn parse_prefer_tcp(value: Option<&str>) -> Result<bool, ConnectError> {
    match value {
        None | Some("no") => Ok(false),
        Some("yes") => Ok(true),
        Some(other) => Err(ConnectError::InvalidRequest(format!(
            "prefer_tcp must be 'yes' or 'no', got '{}'",
            other
        ))),
    }
}

/// HTTP date as used by the `Expires` header
fn http_date(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// List the profiles available to the caller
#[utoipa::path(
    get,
    path = "/info",
    responses(
        (status = 200, description = "Available profiles", body = InfoResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Token lacks the config scope", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "vpn"
)]
pub async fn info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let profile_list = state
        .manager
        .registry()
        .list_profiles()
        .iter()
        .map(|p| ProfileInfo {
            profile_id: p.profile_id.clone(),
            display_name: p.display_name.clone(),
            vpn_proto_list: p.protocols.clone(),
            vpn_proto_preferred: p.preferred_protocol,
            default_gateway: p.default_gateway,
        })
        .collect();

    Json(InfoResponse {
        info: ProfileList { profile_list },
    })
}

/// Create a VPN session and download its client configuration
#[utoipa::path(
    post,
    path = "/connect",
    request_body(content = ConnectForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "OpenVPN or WireGuard client configuration", body = String),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Not authorized", body = ErrorResponse),
        (status = 409, description = "Credential already connected", body = ErrorResponse),
        (status = 502, description = "VPN daemon unavailable", body = ErrorResponse),
        (status = 503, description = "Address pool exhausted", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "vpn"
)]
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    form: Result<Form<ConnectForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let Form(form) = form.map_err(|e| {
        api_error(ConnectError::InvalidRequest(format!(
            "malformed form body: {}",
            e.body_text()
        )))
    })?;
    let profile_id = form
        .profile_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| api_error(ConnectError::InvalidRequest("missing profile_id".to_string())))?;
    let prefer_tcp = parse_prefer_tcp(form.prefer_tcp.as_deref()).map_err(api_error)?;

    debug!(user_id = %auth.user_id, profile_id = %profile_id, "Connect request");

    let request = ConnectRequest {
        profile_id,
        public_key: form.public_key.filter(|k| !k.is_empty()),
        prefer_tcp,
        accepted_protocols: accepted_protocols(&headers),
        display_name: form
            .display_name
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
    };

    let config = state
        .manager
        .connect(&auth, request)
        .await
        .map_err(api_error)?;

    Ok((
        [
            (header::CONTENT_TYPE, config.content_type().to_string()),
            (header::EXPIRES, http_date(config.expires_at)),
        ],
        config.body,
    )
        .into_response())
}

/// Tear down every session of the caller's authorization
#[utoipa::path(
    post,
    path = "/disconnect",
    responses(
        (status = 204, description = "Sessions removed (or none existed)"),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 502, description = "VPN daemon unavailable", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "vpn"
)]
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, ApiError> {
    let count = state.manager.disconnect(&auth).await.map_err(api_error)?;
    info!(user_id = %auth.user_id, count, "Disconnect");
    Ok(StatusCode::NO_CONTENT)
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        profiles: state.manager.registry().len(),
    })
}
