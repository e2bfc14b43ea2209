//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the portal configuration
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate profile id: {0}")]
    DuplicateProfile(String),

    #[error("Invalid profile id '{0}': must be lowercase alphanumeric with hyphens/underscores only")]
    InvalidProfileId(String),

    #[error("Profile '{0}' does not declare any supported protocol")]
    NoProtocols(String),

    #[error("Profile '{profile_id}': preferred protocol '{protocol}' is not supported by the profile")]
    PreferredNotSupported { profile_id: String, protocol: String },

    #[error("Profile '{profile_id}': missing address range for protocol '{protocol}'")]
    MissingRange { profile_id: String, protocol: String },

    #[error("Profile '{profile_id}': invalid {field} '{value}': {reason}")]
    InvalidNetwork {
        profile_id: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("Profile '{profile_id}': ranges {first} and {second} overlap")]
    OverlappingRanges {
        profile_id: String,
        first: String,
        second: String,
    },

    #[error("Profile '{profile_id}': invalid DNS server '{value}'")]
    InvalidDnsServer { profile_id: String, value: String },

    #[error("Profile '{profile_id}': invalid node_url '{value}': {reason}")]
    InvalidNodeUrl {
        profile_id: String,
        value: String,
        reason: String,
    },

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}
