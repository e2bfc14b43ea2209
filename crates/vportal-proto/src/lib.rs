//! VPN Portal Protocol Definitions
//!
//! Shared domain types for the portal: VPN protocols, address families,
//! the authorization context handed in by the OAuth layer, WireGuard key
//! handling and the node daemon wire messages.

pub mod auth;
pub mod keys;
pub mod messages;
pub mod protocol;

pub use auth::AuthContext;
pub use keys::{KeyError, WireGuardPublicKey, WIREGUARD_KEY_LEN};
pub use messages::*;
pub use protocol::{AddressFamily, ParseProtocolError, VpnProtocol};

/// Daemon RPC API version
pub const DAEMON_API_VERSION: u32 = 1;

/// OAuth scope required to obtain VPN configurations
pub const CONFIG_SCOPE: &str = "config";
