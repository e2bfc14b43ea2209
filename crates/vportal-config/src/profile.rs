//! Validated VPN profiles
//!
//! [`ProfileRegistry`] is built once at startup from a [`PortalConfig`] and
//! is immutable afterwards.

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::collections::HashSet;
use std::net::IpAddr;
use url::Url;
use vportal_proto::{AddressFamily, VpnProtocol};

use crate::config::{PortalConfig, ProfileConfig, RangeConfig};
use crate::error::ConfigError;

/// Smallest IPv4 range that still holds one client (network, gateway, client, broadcast)
const MAX_PREFIX_V4: u8 = 30;
/// Smallest IPv6 range that still holds one client
const MAX_PREFIX_V6: u8 = 126;

/// Client address range of one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub four: Ipv4Network,
    pub six: Ipv6Network,
}

impl AddressRange {
    pub fn network(&self, family: AddressFamily) -> IpNetwork {
        match family {
            AddressFamily::V4 => IpNetwork::V4(self.four),
            AddressFamily::V6 => IpNetwork::V6(self.six),
        }
    }
}

/// A validated VPN profile
#[derive(Debug, Clone)]
pub struct Profile {
    pub profile_id: String,
    pub display_name: String,
    pub host_name: String,
    pub dns_servers: Vec<IpAddr>,
    /// Supported protocols, OpenVPN first
    pub protocols: Vec<VpnProtocol>,
    pub preferred_protocol: VpnProtocol,
    pub default_gateway: bool,
    pub routes: Vec<IpNetwork>,
    pub wireguard_range: Option<AddressRange>,
    pub openvpn_range: Option<AddressRange>,
    pub node_url: Url,
    pub node_number: u32,
    pub openvpn_udp_ports: Vec<u16>,
    pub openvpn_tcp_ports: Vec<u16>,
}

impl Profile {
    pub fn supports(&self, protocol: VpnProtocol) -> bool {
        self.protocols.contains(&protocol)
    }

    /// Address range clients of `protocol` are allocated from
    pub fn range(&self, protocol: VpnProtocol) -> Option<&AddressRange> {
        match protocol {
            VpnProtocol::OpenVpn => self.openvpn_range.as_ref(),
            VpnProtocol::WireGuard => self.wireguard_range.as_ref(),
        }
    }

    fn from_config(config: &ProfileConfig) -> Result<Self, ConfigError> {
        let id = &config.profile_id;

        if !is_valid_profile_id(id) {
            return Err(ConfigError::InvalidProfileId(id.clone()));
        }

        let mut protocols = config.protocols.clone();
        protocols.sort();
        protocols.dedup();
        if protocols.is_empty() {
            return Err(ConfigError::NoProtocols(id.clone()));
        }
        if !protocols.contains(&config.preferred_protocol) {
            return Err(ConfigError::PreferredNotSupported {
                profile_id: id.clone(),
                protocol: config.preferred_protocol.to_string(),
            });
        }

        let wireguard_range = config
            .wireguard_range
            .as_ref()
            .map(|r| parse_range(id, "wireguard_range", r))
            .transpose()?;
        let openvpn_range = config
            .openvpn_range
            .as_ref()
            .map(|r| parse_range(id, "openvpn_range", r))
            .transpose()?;

        for protocol in &protocols {
            let present = match protocol {
                VpnProtocol::OpenVpn => openvpn_range.is_some(),
                VpnProtocol::WireGuard => wireguard_range.is_some(),
            };
            if !present {
                return Err(ConfigError::MissingRange {
                    profile_id: id.clone(),
                    protocol: protocol.to_string(),
                });
            }
        }

        if let (Some(wg), Some(ovpn)) = (&wireguard_range, &openvpn_range) {
            check_disjoint(id, IpNetwork::V4(wg.four), IpNetwork::V4(ovpn.four))?;
            check_disjoint(id, IpNetwork::V6(wg.six), IpNetwork::V6(ovpn.six))?;
        }

        let dns_servers = config
            .dns_servers
            .iter()
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| ConfigError::InvalidDnsServer {
                        profile_id: id.clone(),
                        value: s.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let routes = config
            .routes
            .iter()
            .map(|s| {
                s.parse::<IpNetwork>()
                    .map_err(|e| invalid_network(id, "route", s, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let node_url = Url::parse(&config.node_url).map_err(|e| ConfigError::InvalidNodeUrl {
            profile_id: id.clone(),
            value: config.node_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(node_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidNodeUrl {
                profile_id: id.clone(),
                value: config.node_url.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        Ok(Self {
            profile_id: id.clone(),
            display_name: config.display_name.clone(),
            host_name: config.host_name.clone(),
            dns_servers,
            protocols,
            preferred_protocol: config.preferred_protocol,
            default_gateway: config.default_gateway,
            routes,
            wireguard_range,
            openvpn_range,
            node_url,
            node_number: config.node_number,
            openvpn_udp_ports: config.openvpn.udp_ports.clone(),
            openvpn_tcp_ports: config.openvpn.tcp_ports.clone(),
        })
    }
}

/// Static, validated view of the configured profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: Vec<Profile>,
}

impl ProfileRegistry {
    /// Validate every profile of `config`
    ///
    /// Profiles keep the order in which they appear in the file.
    pub fn from_config(config: &PortalConfig) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut profiles = Vec::with_capacity(config.profiles.len());

        for profile_config in &config.profiles {
            if !seen.insert(profile_config.profile_id.as_str()) {
                return Err(ConfigError::DuplicateProfile(
                    profile_config.profile_id.clone(),
                ));
            }
            profiles.push(Profile::from_config(profile_config)?);
        }

        Ok(Self { profiles })
    }

    pub fn profile(&self, profile_id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.profile_id == profile_id)
    }

    pub fn list_profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Profile ids end up in file names and URLs
fn is_valid_profile_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn parse_range(profile_id: &str, field: &str, range: &RangeConfig) -> Result<AddressRange, ConfigError> {
    let four_field = format!("{field}.four");
    let six_field = format!("{field}.six");

    let four: Ipv4Network = range
        .four
        .parse()
        .map_err(|e: ipnetwork::IpNetworkError| {
            invalid_network(profile_id, &four_field, &range.four, e.to_string())
        })?;
    let six: Ipv6Network = range
        .six
        .parse()
        .map_err(|e: ipnetwork::IpNetworkError| {
            invalid_network(profile_id, &six_field, &range.six, e.to_string())
        })?;

    if four.prefix() > MAX_PREFIX_V4 {
        return Err(invalid_network(
            profile_id,
            &four_field,
            &range.four,
            format!("prefix must be /{MAX_PREFIX_V4} or shorter"),
        ));
    }
    if six.prefix() > MAX_PREFIX_V6 {
        return Err(invalid_network(
            profile_id,
            &six_field,
            &range.six,
            format!("prefix must be /{MAX_PREFIX_V6} or shorter"),
        ));
    }

    // Host bits are dropped: "10.0.0.5/24" means 10.0.0.0/24
    let four = Ipv4Network::new(four.network(), four.prefix())
        .map_err(|e| invalid_network(profile_id, &four_field, &range.four, e.to_string()))?;
    let six = Ipv6Network::new(six.network(), six.prefix())
        .map_err(|e| invalid_network(profile_id, &six_field, &range.six, e.to_string()))?;

    Ok(AddressRange { four, six })
}

fn check_disjoint(profile_id: &str, a: IpNetwork, b: IpNetwork) -> Result<(), ConfigError> {
    if a.contains(b.network()) || b.contains(a.network()) {
        return Err(ConfigError::OverlappingRanges {
            profile_id: profile_id.to_string(),
            first: a.to_string(),
            second: b.to_string(),
        });
    }
    Ok(())
}

fn invalid_network(profile_id: &str, field: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::InvalidNetwork {
        profile_id: profile_id.to_string(),
        field: field.to_string(),
        value: value.to_string(),
        reason,
    }
}
