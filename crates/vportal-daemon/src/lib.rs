//! Daemon Client
//!
//! RPC to the agent running on every VPN node. The agent programs OpenVPN
//! and WireGuard peers on the node's tunnel interfaces; the portal tells it
//! which peers should exist.

pub mod error;
pub mod http;
pub mod memory;

pub use error::DaemonError;
pub use http::{HttpDaemonClient, RetryPolicy};
pub use memory::MemoryDaemon;

use async_trait::async_trait;
use vportal_proto::PeerDescriptor;

/// Programs peers on the node serving a profile
///
/// Both add and remove are idempotent on the node side: adding a peer that
/// exists replaces it, removing a peer that does not exist succeeds.
#[async_trait]
pub trait VpnDaemon: Send + Sync {
    async fn add_peer(&self, profile_id: &str, peer: &PeerDescriptor) -> Result<(), DaemonError>;

    async fn remove_peer(&self, profile_id: &str, peer: &PeerDescriptor)
        -> Result<(), DaemonError>;

    async fn list_peers(&self, profile_id: &str) -> Result<Vec<PeerDescriptor>, DaemonError>;
}
