//! Authorization context supplied by the OAuth layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized authorization for a single request
///
/// Every identity adapter (OAuth access token, session cookie, ...) must
/// reduce its credentials to this shape before calling into the connection
/// manager. `auth_key` identifies the authorization grant and is the key
/// used to find every session created under one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub auth_key: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn new(
        user_id: impl Into<String>,
        auth_key: impl Into<String>,
        scopes: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            auth_key: auth_key.into(),
            scopes,
            expires_at,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
