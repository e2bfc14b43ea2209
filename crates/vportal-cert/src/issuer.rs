//! Credential Issuer
//!
//! Mints OpenVPN client certificates and prepares WireGuard peer
//! registrations. Programming the node daemon is the caller's job.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::info;
use vportal_config::Profile;
use vportal_proto::WireGuardPublicKey;

use crate::ca::{CaInfo, CertificateAuthority, ClientCertificate};
use crate::error::CertError;
use crate::tls_crypt::TlsCrypt;
use crate::wireguard::read_server_public_key;

/// What a WireGuard client needs besides its own private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRegistration {
    pub client_public_key: WireGuardPublicKey,
    pub server_public_key: WireGuardPublicKey,
    pub listen_port: u16,
    pub ip_four: Ipv4Addr,
    pub ip_six: Ipv6Addr,
}

#[derive(Debug)]
pub struct CredentialIssuer {
    ca: CertificateAuthority,
    tls_crypt: TlsCrypt,
    key_dir: PathBuf,
    listen_port: u16,
    max_lifetime: chrono::Duration,
    server_keys: DashMap<u32, WireGuardPublicKey>,
}

impl CredentialIssuer {
    pub fn new(
        ca: CertificateAuthority,
        key_dir: impl Into<PathBuf>,
        listen_port: u16,
        max_lifetime: chrono::Duration,
    ) -> Self {
        let key_dir = key_dir.into();
        Self {
            ca,
            tls_crypt: TlsCrypt::new(key_dir.clone()),
            key_dir,
            listen_port,
            max_lifetime,
            server_keys: DashMap::new(),
        }
    }

    pub fn ca_info(&self) -> &CaInfo {
        self.ca.info()
    }

    pub async fn tls_crypt(&self, profile_id: &str) -> Result<String, CertError> {
        self.tls_crypt.get(profile_id).await
    }

    /// Issue a client certificate
    ///
    /// The validity ends at the earliest of `not_after`, the configured
    /// maximum lifetime and the CA expiry.
    pub fn issue_certificate(
        &self,
        user_id: &str,
        profile_id: &str,
        common_name: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<ClientCertificate, CertError> {
        let not_after = not_after.min(not_before + self.max_lifetime);
        let cert = self
            .ca
            .issue_client_certificate(common_name, not_before, not_after)?;

        info!(
            user_id = %user_id,
            profile_id = %profile_id,
            common_name = %common_name,
            expires_at = %cert.not_after,
            "Issued OpenVPN client certificate"
        );
        Ok(cert)
    }

    /// Prepare the registration of a client supplied WireGuard key
    pub async fn issue_peer(
        &self,
        profile: &Profile,
        public_key: &WireGuardPublicKey,
        ip_four: Ipv4Addr,
        ip_six: Ipv6Addr,
    ) -> Result<PeerRegistration, CertError> {
        let server_public_key = self.server_public_key(profile.node_number).await?;

        info!(
            profile_id = %profile.profile_id,
            public_key = %public_key,
            "Prepared WireGuard peer registration"
        );

        Ok(PeerRegistration {
            client_public_key: public_key.clone(),
            server_public_key,
            listen_port: self.listen_port,
            ip_four,
            ip_six,
        })
    }

    async fn server_public_key(&self, node_number: u32) -> Result<WireGuardPublicKey, CertError> {
        if let Some(key) = self.server_keys.get(&node_number) {
            return Ok(key.clone());
        }
        let key = read_server_public_key(&self.key_dir, node_number).await?;
        self.server_keys.insert(node_number, key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::server_public_key_path;
    use vportal_config::{PortalConfig, ProfileRegistry};

    const SERVER_KEY: &str = "gc6RjjPtIKeflbOun+dyAssnsdXzD6bmWisbxJrZiB0=";
    const CLIENT_KEY: &str = "eRPR1zoK0lm97k5Vgb3ViEX6lNWyay6V6ynEMnYs+2w=";

    fn issuer(dir: &std::path::Path, max_lifetime_days: i64) -> CredentialIssuer {
        let ca = CertificateAuthority::generate(Utc::now(), chrono::Duration::days(365)).unwrap();
        CredentialIssuer::new(ca, dir, 51820, chrono::Duration::days(max_lifetime_days))
    }

    fn wireguard_profile() -> Profile {
        let config = PortalConfig::parse(
            r#"
profiles:
  - profile_id: default-wg
    display_name: WireGuard
    host_name: vpn.example.org
    protocols: [wireguard]
    preferred_protocol: wireguard
    node_number: 0
    wireguard_range:
      four: 10.44.44.0/24
      six: fd44::/64
    node_url: http://localhost:41194
"#,
        )
        .unwrap();
        ProfileRegistry::from_config(&config)
            .unwrap()
            .profile("default-wg")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_certificate_lifetime_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = issuer(dir.path(), 1);

        let now = Utc::now();
        let cert = issuer
            .issue_certificate("alice", "default", "cn", now, now + chrono::Duration::days(90))
            .unwrap();
        assert_eq!(cert.not_after, now + chrono::Duration::days(1));
    }

    #[test]
    fn test_certificate_respects_grant_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = issuer(dir.path(), 90);

        let now = Utc::now();
        let grant_expiry = now + chrono::Duration::hours(2);
        let cert = issuer
            .issue_certificate("alice", "default", "cn", now, grant_expiry)
            .unwrap();
        assert_eq!(cert.not_after, grant_expiry);
    }

    #[tokio::test]
    async fn test_issue_peer_returns_server_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(server_public_key_path(dir.path(), 0), SERVER_KEY).unwrap();
        let issuer = issuer(dir.path(), 90);

        let client_key = WireGuardPublicKey::parse(CLIENT_KEY).unwrap();
        let registration = issuer
            .issue_peer(
                &wireguard_profile(),
                &client_key,
                "10.44.44.2".parse().unwrap(),
                "fd44::2".parse().unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(registration.server_public_key.as_str(), SERVER_KEY);
        assert_eq!(registration.client_public_key, client_key);
        assert_eq!(registration.listen_port, 51820);
    }

    #[tokio::test]
    async fn test_issue_peer_without_server_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let issuer = issuer(dir.path(), 90);

        let client_key = WireGuardPublicKey::parse(CLIENT_KEY).unwrap();
        let result = issuer
            .issue_peer(
                &wireguard_profile(),
                &client_key,
                "10.44.44.2".parse().unwrap(),
                "fd44::2".parse().unwrap(),
            )
            .await;
        assert!(matches!(result, Err(CertError::Io { .. })));
    }
}
