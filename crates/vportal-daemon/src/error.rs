use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Timeouts, transport failures and 5xx answers, after all retries
    #[error("Daemon for profile {profile_id} unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        profile_id: String,
        attempts: u32,
        reason: String,
    },

    /// The daemon understood the request and refused it
    #[error("Daemon rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("No daemon configured for profile {0}")]
    UnknownProfile(String),

    #[error("Invalid daemon response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid daemon URL: {0}")]
    Url(#[from] url::ParseError),
}
