//! API request and response models

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vportal_proto::VpnProtocol;

/// A profile as advertised to clients
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileInfo {
    pub profile_id: String,
    pub display_name: String,
    /// Supported protocols
    pub vpn_proto_list: Vec<VpnProtocol>,
    pub vpn_proto_preferred: VpnProtocol,
    /// Whether all traffic is routed over the VPN
    pub default_gateway: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProfileList {
    pub profile_list: Vec<ProfileInfo>,
}

/// `GET /info` response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InfoResponse {
    pub info: ProfileList,
}

/// `POST /connect` form
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConnectForm {
    pub profile_id: Option<String>,
    /// WireGuard public key, base64
    pub public_key: Option<String>,
    /// `yes` or `no`
    pub prefer_tcp: Option<String>,
    /// Name shown on the configurations page
    pub display_name: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Configured profiles
    pub profiles: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
