//! HTTP/JSON node daemon client
//!
//! Endpoints, relative to the profile's `node_url`:
//! - `POST peer/add` with a [`PeerRequest`] body
//! - `POST peer/remove` with a [`PeerRequest`] body
//! - `GET peer/list?profile_id=<id>` answering a [`PeerListResponse`]

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use vportal_config::{DaemonSettings, ProfileRegistry};
use vportal_proto::{
    DaemonErrorBody, PeerDescriptor, PeerListResponse, PeerRequest, DAEMON_API_VERSION,
};

use crate::error::DaemonError;
use crate::VpnDaemon;

const API_VERSION_HEADER: &str = "X-Daemon-Api-Version";

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DaemonSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.backoff(),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DaemonSettings::default())
    }
}

/// Outcome of a single attempt
enum AttemptError {
    Retryable(String),
    Fatal(DaemonError),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            AttemptError::Retryable(e.to_string())
        } else {
            AttemptError::Fatal(DaemonError::Client(e))
        }
    }
}

pub struct HttpDaemonClient {
    http: reqwest::Client,
    nodes: HashMap<String, Url>,
    retry: RetryPolicy,
}

impl HttpDaemonClient {
    /// Build a client for every profile of the registry
    pub fn new(registry: &ProfileRegistry, settings: &DaemonSettings) -> Result<Self, DaemonError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(settings.timeout())
            .build()?;

        let nodes = registry
            .list_profiles()
            .iter()
            .map(|p| (p.profile_id.clone(), p.node_url.clone()))
            .collect();

        Ok(Self::with_client(http, nodes, RetryPolicy::from_settings(settings)))
    }

    /// Create a client with a pre-built `reqwest::Client`
    pub fn with_client(http: reqwest::Client, nodes: HashMap<String, Url>, retry: RetryPolicy) -> Self {
        Self { http, nodes, retry }
    }

    fn url(&self, profile_id: &str, path: &str) -> Result<Url, DaemonError> {
        let base = self
            .nodes
            .get(profile_id)
            .ok_or_else(|| DaemonError::UnknownProfile(profile_id.to_string()))?;
        let base = base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// Run `attempt` until it succeeds, fails fatally or runs out of attempts
    async fn with_retry<T, F, Fut>(
        &self,
        profile_id: &str,
        operation: &'static str,
        attempt: F,
    ) -> Result<T, DaemonError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut last_error = String::new();

        for n in 1..=self.retry.max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(reason)) => {
                    warn!(
                        profile_id = %profile_id,
                        operation,
                        attempt = n,
                        max_attempts = self.retry.max_attempts,
                        "Daemon call failed: {}",
                        reason
                    );
                    last_error = reason;
                    if n < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff(n)).await;
                    }
                }
            }
        }

        Err(DaemonError::Unavailable {
            profile_id: profile_id.to_string(),
            attempts: self.retry.max_attempts,
            reason: last_error,
        })
    }

    async fn post_peer(
        &self,
        profile_id: &str,
        path: &'static str,
        peer: &PeerDescriptor,
        not_found_ok: bool,
    ) -> Result<(), DaemonError> {
        let url = &self.url(profile_id, path)?;
        let body = &PeerRequest {
            profile_id: profile_id.to_string(),
            peer: peer.clone(),
        };

        self.with_retry(profile_id, path, move || async move {
            debug!("POST {}", url);
            let response = self
                .http
                .post(url.clone())
                .header(API_VERSION_HEADER, DAEMON_API_VERSION)
                .json(body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || (not_found_ok && status == StatusCode::NOT_FOUND) {
                return Ok(());
            }
            Err(classify(response).await)
        })
        .await
    }
}

/// Map a non-success response to a retry decision
async fn classify(response: reqwest::Response) -> AttemptError {
    let status = response.status();
    let message = match response.json::<DaemonErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AttemptError::Retryable(format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        AttemptError::Fatal(DaemonError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl VpnDaemon for HttpDaemonClient {
    async fn add_peer(&self, profile_id: &str, peer: &PeerDescriptor) -> Result<(), DaemonError> {
        self.post_peer(profile_id, "peer/add", peer, false).await
    }

    async fn remove_peer(
        &self,
        profile_id: &str,
        peer: &PeerDescriptor,
    ) -> Result<(), DaemonError> {
        // Removing an unknown peer is a successful revocation
        self.post_peer(profile_id, "peer/remove", peer, true).await
    }

    async fn list_peers(&self, profile_id: &str) -> Result<Vec<PeerDescriptor>, DaemonError> {
        let mut url = self.url(profile_id, "peer/list")?;
        url.query_pairs_mut().append_pair("profile_id", profile_id);
        let url = &url;

        self.with_retry(profile_id, "peer/list", move || async move {
            debug!("GET {}", url);
            let response = self
                .http
                .get(url.clone())
                .header(API_VERSION_HEADER, DAEMON_API_VERSION)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(classify(response).await);
            }

            let list: PeerListResponse = response.json().await.map_err(|e| {
                AttemptError::Fatal(DaemonError::InvalidResponse(e.to_string()))
            })?;
            Ok(list.peers)
        })
        .await
    }
}
