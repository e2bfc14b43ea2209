//! Protocol selection for a connect request

use vportal_config::Profile;
use vportal_proto::VpnProtocol;

use crate::error::ConnectError;

/// Pick the protocol a connect request is served with
///
/// `accepted` restricts the profile's protocols (empty means any).
/// `prefer_tcp` rules out WireGuard, which is UDP only, while OpenVPN is
/// still acceptable. WireGuard needs a client public key; it wins when it
/// is the profile's preferred protocol or the only acceptable one.
pub fn select_protocol(
    profile: &Profile,
    accepted: &[VpnProtocol],
    has_public_key: bool,
    prefer_tcp: bool,
) -> Result<VpnProtocol, ConnectError> {
    let acceptable = |p: VpnProtocol| {
        profile.supports(p) && (accepted.is_empty() || accepted.contains(&p))
    };
    let openvpn = acceptable(VpnProtocol::OpenVpn);
    let wireguard = acceptable(VpnProtocol::WireGuard) && !(prefer_tcp && openvpn);

    if wireguard
        && has_public_key
        && (profile.preferred_protocol == VpnProtocol::WireGuard || !openvpn)
    {
        return Ok(VpnProtocol::WireGuard);
    }
    if openvpn {
        return Ok(VpnProtocol::OpenVpn);
    }
    if wireguard {
        return Err(ConnectError::InvalidRequest(
            "public_key is required for WireGuard".to_string(),
        ));
    }

    Err(ConnectError::InvalidRequest(format!(
        "profile {} supports none of the acceptable protocols",
        profile.profile_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vportal_config::{PortalConfig, ProfileRegistry};

    fn registry() -> ProfileRegistry {
        let config = PortalConfig::parse(
            r#"
profiles:
  - profile_id: both-ovpn
    display_name: Both (OpenVPN preferred)
    host_name: vpn.example.org
    wireguard_range: { four: 10.43.43.0/24, six: "fd43::/64" }
    openvpn_range: { four: 10.42.42.0/24, six: "fd42::/64" }
    node_url: http://localhost:41194
  - profile_id: both-wg
    display_name: Both (WireGuard preferred)
    host_name: vpn.example.org
    preferred_protocol: wireguard
    wireguard_range: { four: 10.44.44.0/24, six: "fd44::/64" }
    openvpn_range: { four: 10.45.45.0/24, six: "fd45::/64" }
    node_url: http://localhost:41194
  - profile_id: wg-only
    display_name: WireGuard only
    host_name: vpn.example.org
    protocols: [wireguard]
    preferred_protocol: wireguard
    wireguard_range: { four: 10.46.46.0/24, six: "fd46::/64" }
    node_url: http://localhost:41194
"#,
        )
        .unwrap();
        ProfileRegistry::from_config(&config).unwrap()
    }

    #[test]
    fn test_preferred_protocol_wins_with_public_key() {
        let registry = registry();
        let both_wg = registry.profile("both-wg").unwrap();
        let both_ovpn = registry.profile("both-ovpn").unwrap();

        assert_eq!(
            select_protocol(both_wg, &[], true, false).unwrap(),
            VpnProtocol::WireGuard
        );
        assert_eq!(
            select_protocol(both_ovpn, &[], true, false).unwrap(),
            VpnProtocol::OpenVpn
        );
    }

    #[test]
    fn test_without_public_key_falls_back_to_openvpn() {
        let registry = registry();
        let both_wg = registry.profile("both-wg").unwrap();
        assert_eq!(
            select_protocol(both_wg, &[], false, false).unwrap(),
            VpnProtocol::OpenVpn
        );

        let wg_only = registry.profile("wg-only").unwrap();
        assert!(matches!(
            select_protocol(wg_only, &[], false, false),
            Err(ConnectError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_prefer_tcp_excludes_wireguard() {
        let registry = registry();
        let both_wg = registry.profile("both-wg").unwrap();
        assert_eq!(
            select_protocol(both_wg, &[], true, true).unwrap(),
            VpnProtocol::OpenVpn
        );

        // Still WireGuard when nothing else is on offer
        let wg_only = registry.profile("wg-only").unwrap();
        assert_eq!(
            select_protocol(wg_only, &[], true, true).unwrap(),
            VpnProtocol::WireGuard
        );
    }

    #[test]
    fn test_accepted_protocols_restrict_choice() {
        let registry = registry();
        let both_ovpn = registry.profile("both-ovpn").unwrap();
        assert_eq!(
            select_protocol(both_ovpn, &[VpnProtocol::WireGuard], true, false).unwrap(),
            VpnProtocol::WireGuard
        );

        let wg_only = registry.profile("wg-only").unwrap();
        assert!(matches!(
            select_protocol(wg_only, &[VpnProtocol::OpenVpn], true, false),
            Err(ConnectError::InvalidRequest(_))
        ));
    }
}
