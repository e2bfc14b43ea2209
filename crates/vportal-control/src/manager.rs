//! Connection Manager
//!
//! Runs connect and disconnect transactions. A connect walks through
//! [`ConnectPhase`]s; a failure in any phase aborts the transaction and
//! undoes what was acquired so far.
//!
//! Allocation, issuance, eviction and the session write of one (profile,
//! protocol) pair happen under a per-pair lock. Nothing is evicted until
//! the request has passed every check that can still reject it.
//! Programming the daemon happens after the lock is released: the session
//! row already claims the addresses.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vportal_cert::CredentialIssuer;
use vportal_config::{Profile, ProfileRegistry};
use vportal_daemon::VpnDaemon;
use vportal_db::{Session, SessionKey, SessionStore};
use vportal_proto::{AuthContext, VpnProtocol, WireGuardPublicKey, CONFIG_SCOPE};

use crate::allocator::{AddressAllocator, AllocatedAddresses};
use crate::client_config::{render_openvpn, render_wireguard, ClientConfig};
use crate::error::ConnectError;
use crate::selection::select_protocol;

/// Random bytes in an OpenVPN common name
const COMMON_NAME_BYTES: usize = 32;

/// Session display name when the client does not send one
pub const DEFAULT_DISPLAY_NAME: &str = "API Client";

/// Steps of a connect transaction, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Validating,
    Allocating,
    Issuing,
    Persisting,
    Programming,
    Completed,
    Aborting,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectPhase::Validating => "validating",
            ConnectPhase::Allocating => "allocating",
            ConnectPhase::Issuing => "issuing",
            ConnectPhase::Persisting => "persisting",
            ConnectPhase::Programming => "programming",
            ConnectPhase::Completed => "completed",
            ConnectPhase::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub profile_id: String,
    /// Client WireGuard public key, base64
    pub public_key: Option<String>,
    pub prefer_tcp: bool,
    /// Protocols the client can handle; empty means any
    pub accepted_protocols: Vec<VpnProtocol>,
    pub display_name: String,
}

impl ConnectRequest {
    pub fn new(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            public_key: None,
            prefer_tcp: false,
            accepted_protocols: Vec::new(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub session_expiry: chrono::Duration,
    /// Concurrent sessions per user and profile
    pub max_active_configurations: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            session_expiry: chrono::Duration::days(90),
            max_active_configurations: 3,
        }
    }
}

/// Differences repaired by [`ConnectionManager::reconcile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Sessions that were missing on the daemon and re-added
    pub added: Vec<String>,
    /// Daemon peers without a session, removed
    pub removed: Vec<String>,
    /// Peers that could not be repaired
    pub failed: Vec<String>,
}

/// Credential material produced in the issuing phase
enum Credential {
    OpenVpn {
        cert: vportal_cert::ClientCertificate,
        tls_crypt: String,
    },
    WireGuard(vportal_cert::PeerRegistration),
}

pub struct ConnectionManager {
    registry: Arc<ProfileRegistry>,
    store: Arc<dyn SessionStore>,
    daemon: Arc<dyn VpnDaemon>,
    issuer: Arc<CredentialIssuer>,
    allocator: AddressAllocator,
    settings: ManagerSettings,
    locks: DashMap<(String, VpnProtocol), Arc<Mutex<()>>>,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        store: Arc<dyn SessionStore>,
        daemon: Arc<dyn VpnDaemon>,
        issuer: Arc<CredentialIssuer>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            registry,
            allocator: AddressAllocator::new(store.clone()),
            store,
            daemon,
            issuer,
            settings,
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    fn lock_for(&self, profile_id: &str, protocol: VpnProtocol) -> Arc<Mutex<()>> {
        self.locks
            .entry((profile_id.to_string(), protocol))
            .or_default()
            .clone()
    }

    /// Create a session and return the client configuration for it
    pub async fn connect(
        &self,
        auth: &AuthContext,
        request: ConnectRequest,
    ) -> Result<ClientConfig, ConnectError> {
        let now = Utc::now();
        trace_phase(&request.profile_id, ConnectPhase::Validating);

        if !auth.has_scope(CONFIG_SCOPE) {
            return Err(ConnectError::NotAuthorized(format!(
                "scope '{}' not granted",
                CONFIG_SCOPE
            )));
        }
        if auth.is_expired(now) {
            return Err(ConnectError::NotAuthorized("authorization expired".to_string()));
        }

        let profile = self.registry.profile(&request.profile_id).ok_or_else(|| {
            ConnectError::InvalidRequest(format!("unknown profile '{}'", request.profile_id))
        })?;

        let public_key = request
            .public_key
            .as_deref()
            .map(WireGuardPublicKey::parse)
            .transpose()
            .map_err(|e| ConnectError::InvalidRequest(format!("public_key: {}", e)))?;

        let protocol = select_protocol(
            profile,
            &request.accepted_protocols,
            public_key.is_some(),
            request.prefer_tcp,
        )?;

        let credential_id = match (&public_key, protocol) {
            (Some(key), VpnProtocol::WireGuard) => key.to_string(),
            _ => generate_common_name(),
        };

        // Sessions never outlive the authorization they were created under
        let expires_at = (now + self.settings.session_expiry).min(auth.expires_at);

        let lock = self.lock_for(&profile.profile_id, protocol);
        let guard = lock.lock().await;

        self.check_credential_free(profile, &credential_id, now).await?;

        trace_phase(&profile.profile_id, ConnectPhase::Allocating);
        let addresses = self.allocator.allocate_pair(profile, protocol).await?;

        let claimed = self
            .issue_and_persist(
                auth,
                profile,
                protocol,
                &credential_id,
                public_key.as_ref(),
                addresses,
                &request.display_name,
                now,
                expires_at,
            )
            .await;

        // Either the session row now owns the addresses or nothing does
        self.allocator
            .release_pair(&profile.profile_id, protocol, addresses);
        drop(guard);

        let (session, credential) = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                trace_phase(&profile.profile_id, ConnectPhase::Aborting);
                warn!(
                    profile_id = %profile.profile_id,
                    user_id = %auth.user_id,
                    error = %e,
                    "Connect aborted before programming the daemon"
                );
                return Err(e);
            }
        };

        trace_phase(&profile.profile_id, ConnectPhase::Programming);
        if let Err(e) = self
            .daemon
            .add_peer(&profile.profile_id, &session.peer_descriptor())
            .await
        {
            trace_phase(&profile.profile_id, ConnectPhase::Aborting);
            self.compensate(&session).await;
            return Err(e.into());
        }

        let body = match &credential {
            Credential::OpenVpn { cert, tls_crypt } => render_openvpn(
                profile,
                &self.issuer.ca_info().pem,
                cert,
                tls_crypt,
                request.prefer_tcp,
            ),
            Credential::WireGuard(registration) => render_wireguard(profile, registration),
        };

        trace_phase(&profile.profile_id, ConnectPhase::Completed);
        info!(
            profile_id = %profile.profile_id,
            user_id = %auth.user_id,
            protocol = %protocol,
            ip_four = %session.ip_four,
            ip_six = %session.ip_six,
            expires_at = %session.expires_at,
            "VPN session created"
        );

        Ok(ClientConfig {
            protocol,
            body,
            expires_at: session.expires_at,
        })
    }

    /// Reject a credential that is still connected; retire it if it expired
    async fn check_credential_free(
        &self,
        profile: &Profile,
        credential_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ConnectError> {
        let key = SessionKey {
            profile_id: profile.profile_id.clone(),
            credential_id: credential_id.to_string(),
        };
        match self.store.get(&key).await? {
            None => Ok(()),
            Some(existing) if existing.is_expired(now) => {
                debug!(
                    profile_id = %existing.profile_id,
                    credential_id = %existing.credential_id,
                    "Retiring expired session before reconnect"
                );
                self.teardown(&existing).await
            }
            Some(_) => Err(ConnectError::ConflictingSession {
                profile_id: key.profile_id,
                credential_id: key.credential_id,
            }),
        }
    }

    /// Issuing, eviction and persisting, run under the pair lock
    ///
    /// Eviction comes last so a request that is still rejected never costs
    /// the user another session.
    #[allow(clippy::too_many_arguments)]
    async fn issue_and_persist(
        &self,
        auth: &AuthContext,
        profile: &Profile,
        protocol: VpnProtocol,
        credential_id: &str,
        public_key: Option<&WireGuardPublicKey>,
        addresses: AllocatedAddresses,
        display_name: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(Session, Credential), ConnectError> {
        trace_phase(&profile.profile_id, ConnectPhase::Issuing);
        let credential = match (protocol, public_key) {
            (VpnProtocol::WireGuard, Some(key)) => Credential::WireGuard(
                self.issuer
                    .issue_peer(profile, key, addresses.four, addresses.six)
                    .await?,
            ),
            (VpnProtocol::WireGuard, None) => {
                return Err(ConnectError::InvalidRequest(
                    "public_key is required for WireGuard".to_string(),
                ))
            }
            (VpnProtocol::OpenVpn, _) => Credential::OpenVpn {
                tls_crypt: self.issuer.tls_crypt(&profile.profile_id).await?,
                cert: self.issuer.issue_certificate(
                    &auth.user_id,
                    &profile.profile_id,
                    credential_id,
                    now,
                    expires_at,
                )?,
            },
        };

        // The certificate may end earlier than requested
        let expires_at = match &credential {
            Credential::OpenVpn { cert, .. } => cert.not_after,
            Credential::WireGuard(_) => expires_at,
        };

        self.enforce_limit(auth, profile, now).await?;

        trace_phase(&profile.profile_id, ConnectPhase::Persisting);
        let session = Session {
            id: Uuid::new_v4(),
            user_id: auth.user_id.clone(),
            profile_id: profile.profile_id.clone(),
            protocol,
            credential_id: credential_id.to_string(),
            ip_four: addresses.four,
            ip_six: addresses.six,
            display_name: display_name.to_string(),
            auth_key: auth.auth_key.clone(),
            created_at: now,
            expires_at,
        };
        self.store.add(&session).await?;

        Ok((session, credential))
    }

    /// Evict the oldest sessions of this user and profile until one more fits
    async fn enforce_limit(
        &self,
        auth: &AuthContext,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<(), ConnectError> {
        let active: Vec<Session> = self
            .store
            .list_by_user(&auth.user_id)
            .await?
            .into_iter()
            .filter(|s| s.profile_id == profile.profile_id && !s.is_expired(now))
            .collect();

        let max = self.settings.max_active_configurations.max(1);
        if active.len() < max {
            return Ok(());
        }

        // Lists are oldest first
        let excess = active.len() + 1 - max;
        for session in active.iter().take(excess) {
            warn!(
                profile_id = %session.profile_id,
                user_id = %session.user_id,
                credential_id = %session.credential_id,
                created_at = %session.created_at,
                "Session limit reached, evicting oldest session"
            );
            self.teardown(session).await?;
        }
        Ok(())
    }

    /// Revoke on the daemon, then delete the row
    ///
    /// The row stays when the daemon cannot be reached, so the teardown can
    /// be retried.
    async fn teardown(&self, session: &Session) -> Result<(), ConnectError> {
        self.daemon
            .remove_peer(&session.profile_id, &session.peer_descriptor())
            .await?;
        self.store.remove(&session.key()).await?;

        debug!(
            profile_id = %session.profile_id,
            credential_id = %session.credential_id,
            "Session torn down"
        );
        Ok(())
    }

    /// Undo a persisted session after programming failed
    async fn compensate(&self, session: &Session) {
        warn!(
            profile_id = %session.profile_id,
            user_id = %session.user_id,
            credential_id = %session.credential_id,
            "Daemon programming failed, rolling back session"
        );

        if let Err(e) = self.store.remove(&session.key()).await {
            error!(
                profile_id = %session.profile_id,
                credential_id = %session.credential_id,
                error = %e,
                "Failed to delete session during rollback"
            );
        }

        // The add may have reached the node before failing
        if let Err(e) = self
            .daemon
            .remove_peer(&session.profile_id, &session.peer_descriptor())
            .await
        {
            debug!(
                profile_id = %session.profile_id,
                error = %e,
                "Best effort peer removal during rollback failed"
            );
        }
    }

    /// Tear down every session created under the caller's authorization
    ///
    /// Returns the number of sessions removed; zero is not an error.
    pub async fn disconnect(&self, auth: &AuthContext) -> Result<usize, ConnectError> {
        let sessions = self.store.list_by_auth_key(&auth.auth_key).await?;
        if sessions.is_empty() {
            debug!(user_id = %auth.user_id, "Disconnect with no sessions");
            return Ok(0);
        }

        for session in &sessions {
            let lock = self.lock_for(&session.profile_id, session.protocol);
            let _guard = lock.lock().await;
            self.teardown(session).await?;
        }

        info!(
            user_id = %auth.user_id,
            count = sessions.len(),
            "VPN sessions disconnected"
        );
        Ok(sessions.len())
    }

    /// Active sessions of a user, oldest first
    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, ConnectError> {
        let now = Utc::now();
        Ok(self
            .store
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect())
    }

    /// Delete expired sessions and remove them from the daemons
    ///
    /// Daemon failures are logged; the next reconcile pass removes leftovers.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, ConnectError> {
        let purged = self.store.purge_expired(now).await?;

        for session in &purged {
            if let Err(e) = self
                .daemon
                .remove_peer(&session.profile_id, &session.peer_descriptor())
                .await
            {
                warn!(
                    profile_id = %session.profile_id,
                    credential_id = %session.credential_id,
                    error = %e,
                    "Failed to remove expired peer from daemon"
                );
            }
        }

        if !purged.is_empty() {
            info!(count = purged.len(), "Purged expired VPN sessions");
        }
        Ok(purged)
    }

    /// Bring the daemon of `profile_id` in line with the Session Store
    pub async fn reconcile(&self, profile_id: &str) -> Result<ReconcileReport, ConnectError> {
        if self.registry.profile(profile_id).is_none() {
            return Err(ConnectError::InvalidRequest(format!(
                "unknown profile '{}'",
                profile_id
            )));
        }

        let now = Utc::now();
        let sessions: Vec<Session> = self
            .store
            .list_by_profile(profile_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect();
        let peers = self.daemon.list_peers(profile_id).await?;

        let expected: HashSet<(VpnProtocol, &str)> = sessions
            .iter()
            .map(|s| (s.protocol, s.credential_id.as_str()))
            .collect();
        let programmed: HashSet<(VpnProtocol, &str)> = peers
            .iter()
            .map(|p| (p.protocol(), p.credential_id()))
            .collect();

        let mut report = ReconcileReport::default();

        for peer in &peers {
            if expected.contains(&(peer.protocol(), peer.credential_id())) {
                continue;
            }
            match self.daemon.remove_peer(profile_id, peer).await {
                Ok(()) => report.removed.push(peer.credential_id().to_string()),
                Err(e) => {
                    warn!(profile_id = %profile_id, error = %e, "Failed to remove stale peer");
                    report.failed.push(peer.credential_id().to_string());
                }
            }
        }

        for session in &sessions {
            if programmed.contains(&(session.protocol, session.credential_id.as_str())) {
                continue;
            }
            match self
                .daemon
                .add_peer(profile_id, &session.peer_descriptor())
                .await
            {
                Ok(()) => report.added.push(session.credential_id.clone()),
                Err(e) => {
                    warn!(profile_id = %profile_id, error = %e, "Failed to re-add missing peer");
                    report.failed.push(session.credential_id.clone());
                }
            }
        }

        if !report.added.is_empty() || !report.removed.is_empty() {
            info!(
                profile_id = %profile_id,
                added = report.added.len(),
                removed = report.removed.len(),
                "Reconciled daemon peers"
            );
        }
        Ok(report)
    }
}

fn trace_phase(profile_id: &str, phase: ConnectPhase) {
    debug!(profile_id = %profile_id, phase = %phase, "Connect phase");
}

/// 32 random bytes, base64url with padding
fn generate_common_name() -> String {
    let mut bytes = [0u8; COMMON_NAME_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}
