//! Portal configuration and profile registry
//!
//! The configuration file is YAML. Loading it validates every profile up
//! front; an invalid file stops the portal from starting.

pub mod config;
pub mod error;
pub mod profile;

pub use config::{
    DaemonSettings, OpenVpnPorts, PortalConfig, ProfileConfig, RangeConfig, WireGuardSettings,
};
pub use error::ConfigError;
pub use profile::{AddressRange, Profile, ProfileRegistry};
