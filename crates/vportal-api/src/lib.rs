//! HTTP surface of the portal
//!
//! `GET /info`, `POST /connect` and `POST /disconnect` require a bearer
//! access token with the `config` scope. `GET /health` and the OpenAPI
//! document are public.

pub mod handlers;
pub mod middleware;
pub mod models;

use axum::{
    http::{header, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use vportal_control::ConnectionManager;

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub version: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "VPN Portal API",
        version = "0.1.0",
        description = "Obtain and revoke OpenVPN and WireGuard client configurations"
    ),
    paths(
        handlers::info,
        handlers::connect,
        handlers::disconnect,
        handlers::health_check,
    ),
    components(
        schemas(
            models::ProfileInfo,
            models::ProfileList,
            models::InfoResponse,
            models::ConnectForm,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "vpn", description = "VPN session endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// HMAC secret access tokens are signed with
    pub jwt_secret: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            jwt_secret: String::new(),
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, manager: Arc<ConnectionManager>) -> Self {
        let state = Arc::new(AppState {
            manager,
            version: env!("CARGO_PKG_VERSION").to_string(),
        });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let jwt_state = Arc::new(middleware::JwtState::new(
            self.config.jwt_secret.as_bytes(),
        ));

        let public_router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
            .with_state(self.state.clone());

        let protected_router = Router::new()
            .route("/info", get(handlers::info))
            .route("/connect", post(handlers::connect))
            .route("/disconnect", post(handlers::disconnect))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                jwt_state,
                middleware::require_auth,
            ));

        let mut router = public_router
            .merge(protected_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
                    .expose_headers([header::EXPIRES])
                    .allow_origin(Any),
            );
        }

        router
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("Starting API server on {}", self.config.bind_addr);
        info!("OpenAPI document: http://{}/openapi.json", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
