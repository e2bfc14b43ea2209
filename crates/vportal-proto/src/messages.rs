//! Node daemon wire messages
//!
//! The portal talks HTTP/JSON to a trusted agent on every VPN node. These
//! types are the request and response bodies of that RPC.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::VpnProtocol;

/// Everything a node needs to program (or remove) one client on its tunnel
/// interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum PeerDescriptor {
    /// OpenVPN client identified by its certificate common name
    OpenVpn {
        common_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_four: Option<Ipv4Addr>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_six: Option<Ipv6Addr>,
    },
    /// WireGuard peer identified by its public key
    WireGuard {
        public_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_four: Option<Ipv4Addr>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ip_six: Option<Ipv6Addr>,
    },
}

impl PeerDescriptor {
    pub fn protocol(&self) -> VpnProtocol {
        match self {
            PeerDescriptor::OpenVpn { .. } => VpnProtocol::OpenVpn,
            PeerDescriptor::WireGuard { .. } => VpnProtocol::WireGuard,
        }
    }

    /// Common name or public key, whichever identifies this peer
    pub fn credential_id(&self) -> &str {
        match self {
            PeerDescriptor::OpenVpn { common_name, .. } => common_name,
            PeerDescriptor::WireGuard { public_key, .. } => public_key,
        }
    }
}

/// Body of `POST /peer/add` and `POST /peer/remove`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRequest {
    pub profile_id: String,
    pub peer: PeerDescriptor,
}

/// Response of `GET /peer/list`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeerListResponse {
    pub peers: Vec<PeerDescriptor>,
}

/// Error body returned by a node daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonErrorBody {
    pub error: String,
}
