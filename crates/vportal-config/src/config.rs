//! Portal configuration file format
//!
//! A single YAML document carries the global session policy, daemon RPC
//! settings and the list of VPN profiles.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vportal_proto::VpnProtocol;

use crate::error::ConfigError;
use crate::profile::ProfileRegistry;

/// Top-level portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Lifetime of a VPN session (and of its credential) in days
    #[serde(default = "default_session_expiry_days")]
    pub session_expiry_days: i64,

    /// Maximum number of concurrent configurations per user and profile
    #[serde(default = "default_max_active_configurations")]
    pub max_active_configurations: usize,

    /// Upper bound for client certificate lifetime; defaults to the session expiry
    #[serde(default)]
    pub certificate_max_lifetime_days: Option<i64>,

    #[serde(default)]
    pub wireguard: WireGuardSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,

    /// VPN profile definitions
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

fn default_session_expiry_days() -> i64 {
    90
}

fn default_max_active_configurations() -> usize {
    3
}

/// Node-wide WireGuard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGuardSettings {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_listen_port() -> u16 {
    51820
}

impl Default for WireGuardSettings {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
        }
    }
}

/// Node daemon RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts per call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff between attempts, doubled after every failure
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    250
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl DaemonSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// A single profile as written in the configuration file
///
/// Values are kept as strings here and checked by
/// [`ProfileRegistry::from_config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile id (required, must be unique)
    pub profile_id: String,

    pub display_name: String,

    /// Host name clients connect to
    pub host_name: String,

    #[serde(default)]
    pub dns_servers: Vec<String>,

    /// Supported protocols (default: both)
    #[serde(default = "default_protocols")]
    pub protocols: Vec<VpnProtocol>,

    #[serde(default = "default_preferred_protocol")]
    pub preferred_protocol: VpnProtocol,

    /// Whether clients route all traffic through the VPN
    #[serde(default = "default_gateway")]
    pub default_gateway: bool,

    /// Routes pushed to clients of non default-gateway profiles
    #[serde(default)]
    pub routes: Vec<String>,

    #[serde(default)]
    pub wireguard_range: Option<RangeConfig>,

    #[serde(default)]
    pub openvpn_range: Option<RangeConfig>,

    /// Base URL of the node daemon serving this profile
    pub node_url: String,

    #[serde(default)]
    pub node_number: u32,

    #[serde(default)]
    pub openvpn: OpenVpnPorts,
}

fn default_protocols() -> Vec<VpnProtocol> {
    VpnProtocol::ALL.to_vec()
}

fn default_preferred_protocol() -> VpnProtocol {
    VpnProtocol::OpenVpn
}

fn default_gateway() -> bool {
    true
}

/// IPv4 and IPv6 client ranges in CIDR notation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConfig {
    pub four: String,
    pub six: String,
}

/// Ports the OpenVPN server processes listen on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenVpnPorts {
    #[serde(default = "default_openvpn_ports")]
    pub udp_ports: Vec<u16>,

    #[serde(default = "default_openvpn_ports")]
    pub tcp_ports: Vec<u16>,
}

fn default_openvpn_ports() -> Vec<u16> {
    vec![1194]
}

impl Default for OpenVpnPorts {
    fn default() -> Self {
        Self {
            udp_ports: default_openvpn_ports(),
            tcp_ports: default_openvpn_ports(),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            session_expiry_days: default_session_expiry_days(),
            max_active_configurations: default_max_active_configurations(),
            certificate_max_lifetime_days: None,
            wireguard: WireGuardSettings::default(),
            daemon: DaemonSettings::default(),
            profiles: Vec::new(),
        }
    }
}

impl PortalConfig {
    /// Load config from a specific file path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::parse(&content)?;
        info!(
            path = %path.display(),
            profiles = config.profiles.len(),
            "Loaded portal configuration"
        );
        Ok(config)
    }

    /// Parse config from YAML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: PortalConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate global settings and every profile
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_expiry_days <= 0 {
            return Err(invalid_setting(
                "session_expiry_days",
                "must be a positive number of days",
            ));
        }
        if self.max_active_configurations == 0 {
            return Err(invalid_setting(
                "max_active_configurations",
                "must be at least 1",
            ));
        }
        if let Some(days) = self.certificate_max_lifetime_days {
            if days <= 0 {
                return Err(invalid_setting(
                    "certificate_max_lifetime_days",
                    "must be a positive number of days",
                ));
            }
        }
        if self.daemon.max_attempts == 0 {
            return Err(invalid_setting("daemon.max_attempts", "must be at least 1"));
        }
        if self.daemon.timeout_ms == 0 {
            return Err(invalid_setting("daemon.timeout_ms", "must be non-zero"));
        }

        ProfileRegistry::from_config(self).map(|_| ())
    }

    pub fn session_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_expiry_days)
    }

    pub fn certificate_max_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(
            self.certificate_max_lifetime_days
                .unwrap_or(self.session_expiry_days),
        )
    }

    /// Generate a template config file content
    pub fn template() -> String {
        r#"# VPN portal configuration

session_expiry_days: 90
max_active_configurations: 3
# certificate_max_lifetime_days: 90

wireguard:
  listen_port: 51820

daemon:
  timeout_ms: 5000
  max_attempts: 3
  backoff_ms: 250

profiles:
  - profile_id: default
    display_name: Default
    host_name: vpn.example.org
    dns_servers: ["9.9.9.9", "2620:fe::fe"]
    preferred_protocol: openvpn
    wireguard_range:
      four: 10.43.43.0/24
      six: fd43::/64
    openvpn_range:
      four: 10.42.42.0/24
      six: fd42::/64
    node_url: http://localhost:41194

  # - profile_id: office
  #   display_name: Office
  #   host_name: office.vpn.example.org
  #   protocols: [wireguard]
  #   preferred_protocol: wireguard
  #   default_gateway: false
  #   routes: ["192.168.1.0/24"]
  #   wireguard_range:
  #     four: 10.50.0.0/24
  #     six: fd50::/64
  #   node_url: http://10.0.0.2:41194
  #   node_number: 1
"#
        .to_string()
    }
}

fn invalid_setting(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
profiles:
  - profile_id: default
    display_name: Default
    host_name: vpn.example.org
    wireguard_range:
      four: 10.43.43.0/24
      six: fd43::/64
    openvpn_range:
      four: 10.42.42.0/24
      six: fd42::/64
    node_url: http://localhost:41194
"#;
        let config = PortalConfig::parse(yaml).unwrap();
        assert_eq!(config.session_expiry_days, 90);
        assert_eq!(config.max_active_configurations, 3);
        assert_eq!(config.wireguard.listen_port, 51820);
        assert_eq!(config.daemon.max_attempts, 3);

        let profile = &config.profiles[0];
        assert_eq!(profile.protocols, VpnProtocol::ALL.to_vec()); // default
        assert_eq!(profile.preferred_protocol, VpnProtocol::OpenVpn); // default
        assert!(profile.default_gateway); // default true
        assert_eq!(profile.openvpn.udp_ports, vec![1194]);
        assert_eq!(profile.node_number, 0);
    }

    #[test]
    fn test_certificate_lifetime_defaults_to_session_expiry() {
        let config = PortalConfig {
            session_expiry_days: 30,
            ..Default::default()
        };
        assert_eq!(config.certificate_max_lifetime(), chrono::Duration::days(30));

        let config = PortalConfig {
            certificate_max_lifetime_days: Some(7),
            ..Default::default()
        };
        assert_eq!(config.certificate_max_lifetime(), chrono::Duration::days(7));
    }

    #[test]
    fn test_zero_max_active_configurations_rejected() {
        let yaml = "max_active_configurations: 0\n";
        let result = PortalConfig::parse(yaml);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_active_configurations"));
    }

    #[test]
    fn test_invalid_yaml() {
        let result = PortalConfig::parse("profiles: [");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_template_is_valid_config() {
        let config = PortalConfig::parse(&PortalConfig::template()).unwrap();
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].profile_id, "default");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vportal.yml");
        std::fs::write(&path, PortalConfig::template()).unwrap();

        let config = PortalConfig::load(&path).unwrap();
        assert_eq!(config.profiles[0].host_name, "vpn.example.org");

        let missing = PortalConfig::load(&dir.path().join("missing.yml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
