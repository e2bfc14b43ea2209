//! Session Store contract and its database implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use vportal_proto::{PeerDescriptor, VpnProtocol};

use crate::entities::vpn_session::{self, SessionProtocol};
use crate::entities::VpnSession;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session already exists for credential {credential_id} in profile {profile_id}")]
    Conflict {
        profile_id: String,
        credential_id: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Corrupt session row {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Natural key of a session: the credential is unique within a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub profile_id: String,
    pub credential_id: String,
}

/// An active VPN session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub profile_id: String,
    pub protocol: VpnProtocol,
    /// Certificate common name or WireGuard public key
    pub credential_id: String,
    pub ip_four: Ipv4Addr,
    pub ip_six: Ipv6Addr,
    pub display_name: String,
    pub auth_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            profile_id: self.profile_id.clone(),
            credential_id: self.credential_id.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// What the node daemon needs to program or remove this session
    pub fn peer_descriptor(&self) -> PeerDescriptor {
        match self.protocol {
            VpnProtocol::OpenVpn => PeerDescriptor::OpenVpn {
                common_name: self.credential_id.clone(),
                ip_four: Some(self.ip_four),
                ip_six: Some(self.ip_six),
            },
            VpnProtocol::WireGuard => PeerDescriptor::WireGuard {
                public_key: self.credential_id.clone(),
                ip_four: Some(self.ip_four),
                ip_six: Some(self.ip_six),
            },
        }
    }
}

impl From<VpnProtocol> for SessionProtocol {
    fn from(protocol: VpnProtocol) -> Self {
        match protocol {
            VpnProtocol::OpenVpn => SessionProtocol::OpenVpn,
            VpnProtocol::WireGuard => SessionProtocol::WireGuard,
        }
    }
}

impl From<SessionProtocol> for VpnProtocol {
    fn from(protocol: SessionProtocol) -> Self {
        match protocol {
            SessionProtocol::OpenVpn => VpnProtocol::OpenVpn,
            SessionProtocol::WireGuard => VpnProtocol::WireGuard,
        }
    }
}

impl TryFrom<vpn_session::Model> for Session {
    type Error = StoreError;

    fn try_from(model: vpn_session::Model) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: model.id,
            reason,
        };
        let ip_four = model
            .ip_four
            .parse()
            .map_err(|_| corrupt(format!("invalid ip_four '{}'", model.ip_four)))?;
        let ip_six = model
            .ip_six
            .parse()
            .map_err(|_| corrupt(format!("invalid ip_six '{}'", model.ip_six)))?;

        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            profile_id: model.profile_id,
            protocol: model.protocol.into(),
            credential_id: model.credential_id,
            ip_four,
            ip_six,
            display_name: model.display_name,
            auth_key: model.auth_key,
            created_at: model.created_at,
            expires_at: model.expires_at,
        })
    }
}

/// Durable session storage
///
/// Lists are ordered oldest first.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session; a second session with the same key is a conflict
    async fn add(&self, session: &Session) -> Result<(), StoreError>;

    /// Delete a session, returning whether it existed
    async fn remove(&self, key: &SessionKey) -> Result<bool, StoreError>;

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError>;

    async fn list_by_auth_key(&self, auth_key: &str) -> Result<Vec<Session>, StoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, StoreError>;

    async fn list_by_profile(&self, profile_id: &str) -> Result<Vec<Session>, StoreError>;

    /// Delete every session expired at `now` and return them
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError>;
}

/// [`SessionStore`] backed by a SeaORM connection
#[derive(Debug, Clone)]
pub struct DbSessionStore {
    db: DatabaseConnection,
}

impl DbSessionStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn list(&self, filter: sea_orm::Condition) -> Result<Vec<Session>, StoreError> {
        VpnSession::find()
            .filter(filter)
            .order_by_asc(vpn_session::Column::CreatedAt)
            .order_by_asc(vpn_session::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Session::try_from)
            .collect()
    }
}

fn key_condition(key: &SessionKey) -> sea_orm::Condition {
    sea_orm::Condition::all()
        .add(vpn_session::Column::ProfileId.eq(key.profile_id.as_str()))
        .add(vpn_session::Column::CredentialId.eq(key.credential_id.as_str()))
}

#[async_trait]
impl SessionStore for DbSessionStore {
    async fn add(&self, session: &Session) -> Result<(), StoreError> {
        let model = vpn_session::ActiveModel {
            id: Set(session.id),
            user_id: Set(session.user_id.clone()),
            profile_id: Set(session.profile_id.clone()),
            protocol: Set(session.protocol.into()),
            credential_id: Set(session.credential_id.clone()),
            ip_four: Set(session.ip_four.to_string()),
            ip_six: Set(session.ip_six.to_string()),
            display_name: Set(session.display_name.clone()),
            auth_key: Set(session.auth_key.clone()),
            created_at: Set(session.created_at),
            expires_at: Set(session.expires_at),
        };

        match model.insert(&self.db).await {
            Ok(_) => {
                debug!(
                    profile_id = %session.profile_id,
                    credential_id = %session.credential_id,
                    "Session stored"
                );
                Ok(())
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(StoreError::Conflict {
                    profile_id: session.profile_id.clone(),
                    credential_id: session.credential_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let result = VpnSession::delete_many()
            .filter(key_condition(key))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        VpnSession::find()
            .filter(key_condition(key))
            .one(&self.db)
            .await?
            .map(Session::try_from)
            .transpose()
    }

    async fn list_by_auth_key(&self, auth_key: &str) -> Result<Vec<Session>, StoreError> {
        self.list(sea_orm::Condition::all().add(vpn_session::Column::AuthKey.eq(auth_key)))
            .await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        self.list(sea_orm::Condition::all().add(vpn_session::Column::UserId.eq(user_id)))
            .await
    }

    async fn list_by_profile(&self, profile_id: &str) -> Result<Vec<Session>, StoreError> {
        self.list(sea_orm::Condition::all().add(vpn_session::Column::ProfileId.eq(profile_id)))
            .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        let txn = self.db.begin().await?;

        let expired = VpnSession::find()
            .filter(vpn_session::Column::ExpiresAt.lte(now))
            .order_by_asc(vpn_session::Column::CreatedAt)
            .all(&txn)
            .await?;

        if expired.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = expired.iter().map(|m| m.id).collect();

        // A corrupt row is still deleted; its peer is left to reconciliation
        let mut purged = Vec::with_capacity(expired.len());
        for model in expired {
            match Session::try_from(model) {
                Ok(session) => purged.push(session),
                Err(e) => warn!(error = %e, "Purging unreadable expired session"),
            }
        }

        VpnSession::delete_many()
            .filter(vpn_session::Column::Id.is_in(ids))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        debug!(count = purged.len(), "Purged expired sessions");
        Ok(purged)
    }
}
