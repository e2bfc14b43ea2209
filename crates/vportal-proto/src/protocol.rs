//! VPN protocol and address family enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// VPN protocol a profile can offer
///
/// Ordering is significant: protocol lists are always reported
/// OpenVPN first, then WireGuard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum VpnProtocol {
    OpenVpn,
    WireGuard,
}

impl VpnProtocol {
    pub const ALL: [VpnProtocol; 2] = [VpnProtocol::OpenVpn, VpnProtocol::WireGuard];

    pub fn as_str(&self) -> &'static str {
        match self {
            VpnProtocol::OpenVpn => "openvpn",
            VpnProtocol::WireGuard => "wireguard",
        }
    }

    /// Media type of the client configuration document for this protocol
    pub fn content_type(&self) -> &'static str {
        match self {
            VpnProtocol::OpenVpn => "application/x-openvpn-profile",
            VpnProtocol::WireGuard => "application/x-wireguard-profile",
        }
    }

    /// Reverse lookup from a media type (as found in an `Accept` header)
    pub fn from_content_type(media_type: &str) -> Option<Self> {
        let media_type = media_type.split(';').next().unwrap_or("").trim();
        Self::ALL
            .into_iter()
            .find(|p| p.content_type().eq_ignore_ascii_case(media_type))
    }
}

impl fmt::Display for VpnProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown VPN protocol '{0}' (expected 'openvpn' or 'wireguard')")]
pub struct ParseProtocolError(pub String);

impl FromStr for VpnProtocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openvpn" => Ok(VpnProtocol::OpenVpn),
            "wireguard" => Ok(VpnProtocol::WireGuard),
            other => Err(ParseProtocolError(other.to_string())),
        }
    }
}

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("ipv4"),
            AddressFamily::V6 => f.write_str("ipv6"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_serializes_lowercase() {
        let json = serde_json::to_string(&VpnProtocol::WireGuard).unwrap();
        assert_eq!(json, "\"wireguard\"");

        let parsed: VpnProtocol = serde_json::from_str("\"openvpn\"").unwrap();
        assert_eq!(parsed, VpnProtocol::OpenVpn);
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("OpenVPN".parse::<VpnProtocol>().unwrap(), VpnProtocol::OpenVpn);
        assert_eq!(
            "wireguard".parse::<VpnProtocol>().unwrap(),
            VpnProtocol::WireGuard
        );
        assert!("ipsec".parse::<VpnProtocol>().is_err());
    }

    #[test]
    fn test_protocol_ordering() {
        let mut protocols = vec![VpnProtocol::WireGuard, VpnProtocol::OpenVpn];
        protocols.sort();
        assert_eq!(protocols, vec![VpnProtocol::OpenVpn, VpnProtocol::WireGuard]);
    }

    #[test]
    fn test_from_content_type() {
        assert_eq!(
            VpnProtocol::from_content_type("application/x-wireguard-profile"),
            Some(VpnProtocol::WireGuard)
        );
        assert_eq!(
            VpnProtocol::from_content_type(" application/x-openvpn-profile; q=0.5"),
            Some(VpnProtocol::OpenVpn)
        );
        assert_eq!(VpnProtocol::from_content_type("text/plain"), None);
    }
}
