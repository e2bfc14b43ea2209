//! Connect/disconnect transaction errors

use thiserror::Error;
use vportal_cert::CertError;
use vportal_daemon::DaemonError;
use vportal_db::StoreError;
use vportal_proto::{AddressFamily, VpnProtocol};

/// Every failure a connect or disconnect transaction can end in
///
/// Each variant is reported to API clients with a stable [`code`](Self::code).
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("No free {family} address for {protocol} in profile {profile_id}")]
    NoAddressAvailable {
        profile_id: String,
        protocol: VpnProtocol,
        family: AddressFamily,
    },

    #[error("Credential {credential_id} is already connected to profile {profile_id}")]
    ConflictingSession {
        profile_id: String,
        credential_id: String,
    },

    #[error("VPN daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Credential issuance failed: {0}")]
    CredentialFailure(String),
}

impl ConnectError {
    /// Machine readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ConnectError::InvalidRequest(_) => "INVALID_REQUEST",
            ConnectError::NotAuthorized(_) => "NOT_AUTHORIZED",
            ConnectError::NoAddressAvailable { .. } => "NO_ADDRESS_AVAILABLE",
            ConnectError::ConflictingSession { .. } => "CONFLICTING_SESSION",
            ConnectError::DaemonUnavailable(_) => "DAEMON_UNAVAILABLE",
            ConnectError::StorageFailure(_) => "STORAGE_FAILURE",
            ConnectError::CredentialFailure(_) => "CREDENTIAL_FAILURE",
        }
    }
}

impl From<StoreError> for ConnectError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict {
                profile_id,
                credential_id,
            } => ConnectError::ConflictingSession {
                profile_id,
                credential_id,
            },
            other => ConnectError::StorageFailure(other.to_string()),
        }
    }
}

impl From<DaemonError> for ConnectError {
    fn from(e: DaemonError) -> Self {
        ConnectError::DaemonUnavailable(e.to_string())
    }
}

impl From<CertError> for ConnectError {
    fn from(e: CertError) -> Self {
        ConnectError::CredentialFailure(e.to_string())
    }
}
