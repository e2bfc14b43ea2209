//! WireGuard server public keys
//!
//! The node daemon writes its public key to
//! `<key-dir>/wireguard.<node_number>.public.key`; the portal only reads it.

use std::path::{Path, PathBuf};
use vportal_proto::WireGuardPublicKey;

use crate::error::CertError;

pub fn server_public_key_path(key_dir: &Path, node_number: u32) -> PathBuf {
    key_dir.join(format!("wireguard.{}.public.key", node_number))
}

/// Read and validate the WireGuard public key of node `node_number`
pub async fn read_server_public_key(
    key_dir: &Path,
    node_number: u32,
) -> Result<WireGuardPublicKey, CertError> {
    let path = server_public_key_path(key_dir, node_number);
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| CertError::io(&path, e))?;

    WireGuardPublicKey::parse(&contents).map_err(|e| CertError::InvalidKey {
        path,
        reason: e.to_string(),
    })
}
