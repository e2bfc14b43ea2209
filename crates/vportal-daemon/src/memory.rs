//! In-process daemon for development and tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use vportal_proto::PeerDescriptor;

use crate::error::DaemonError;
use crate::VpnDaemon;

/// Keeps the programmed peers of every profile in memory
///
/// [`MemoryDaemon::set_available`] simulates an unreachable node.
#[derive(Debug)]
pub struct MemoryDaemon {
    peers: RwLock<HashMap<String, Vec<PeerDescriptor>>>,
    available: AtomicBool,
}

impl Default for MemoryDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDaemon {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total number of peers across all profiles
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.values().map(Vec::len).sum()
    }

    fn check_available(&self, profile_id: &str) -> Result<(), DaemonError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DaemonError::Unavailable {
                profile_id: profile_id.to_string(),
                attempts: 1,
                reason: "daemon marked unavailable".to_string(),
            })
        }
    }
}

#[async_trait]
impl VpnDaemon for MemoryDaemon {
    async fn add_peer(&self, profile_id: &str, peer: &PeerDescriptor) -> Result<(), DaemonError> {
        self.check_available(profile_id)?;

        let mut peers = self.peers.write().await;
        let list = peers.entry(profile_id.to_string()).or_default();
        list.retain(|p| p.credential_id() != peer.credential_id());
        list.push(peer.clone());

        debug!(profile_id = %profile_id, credential_id = %peer.credential_id(), "Peer added");
        Ok(())
    }

    async fn remove_peer(
        &self,
        profile_id: &str,
        peer: &PeerDescriptor,
    ) -> Result<(), DaemonError> {
        self.check_available(profile_id)?;

        let mut peers = self.peers.write().await;
        if let Some(list) = peers.get_mut(profile_id) {
            list.retain(|p| p.credential_id() != peer.credential_id());
        }

        debug!(profile_id = %profile_id, credential_id = %peer.credential_id(), "Peer removed");
        Ok(())
    }

    async fn list_peers(&self, profile_id: &str) -> Result<Vec<PeerDescriptor>, DaemonError> {
        self.check_available(profile_id)?;

        Ok(self
            .peers
            .read()
            .await
            .get(profile_id)
            .cloned()
            .unwrap_or_default())
    }
}
