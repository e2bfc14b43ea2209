//! VPN portal server
//!
//! Hands out OpenVPN and WireGuard client configurations over HTTP and keeps
//! the VPN node daemons in line with the active sessions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vportal_api::{ApiServer, ApiServerConfig};
use vportal_auth::{JwtClaims, JwtValidator};
use vportal_cert::{CertificateAuthority, CredentialIssuer};
use vportal_config::{PortalConfig, ProfileRegistry};
use vportal_control::{ConnectionManager, ManagerSettings};
use vportal_daemon::{HttpDaemonClient, MemoryDaemon, VpnDaemon};
use vportal_db::DbSessionStore;
use vportal_proto::CONFIG_SCOPE;

/// VPN portal - OpenVPN and WireGuard session lifecycle
#[derive(Parser, Debug)]
#[command(name = "vportal")]
#[command(about = "Run the VPN portal server", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    server_args: ServerArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an access token for the portal API
    GenerateToken {
        /// JWT secret (must match the server's --jwt-secret)
        #[arg(long, env = "VPORTAL_JWT_SECRET")]
        secret: String,

        /// User the token is issued to
        #[arg(long)]
        user_id: String,

        /// Authorization grant identifier (random if not given)
        #[arg(long)]
        auth_key: Option<String>,

        /// Token validity in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Print an example configuration file
    ConfigTemplate,
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Portal configuration file (YAML)
    #[arg(long, env = "VPORTAL_CONFIG", default_value = "vportal.yaml")]
    config: PathBuf,

    /// Database URL (sqlite://./vportal.db?mode=rwc, postgres://...)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,

    /// API server bind address
    #[arg(long, default_value = "127.0.0.1:8080")]
    api_addr: SocketAddr,

    /// Directory holding the CA, tls-crypt and WireGuard server keys
    #[arg(long, env = "VPORTAL_KEY_DIR", default_value = "./keys")]
    key_dir: PathBuf,

    /// Secret access tokens are signed with
    #[arg(long, env = "VPORTAL_JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seconds between expired session sweeps
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Keep peers in memory instead of calling the node daemons (development only)
    #[arg(long)]
    memory_daemon: bool,
}

fn generate_token(secret: &str, user_id: &str, auth_key: Option<String>, hours: i64) -> Result<()> {
    let mut claims = JwtClaims::new(user_id.to_string(), chrono::Duration::hours(hours))
        .with_scopes(&[CONFIG_SCOPE]);
    if let Some(auth_key) = auth_key {
        claims = claims.with_auth_key(auth_key);
    }

    let token = JwtValidator::encode(secret.as_bytes(), &claims)
        .map_err(|e| anyhow::anyhow!("Failed to generate token: {}", e))?;

    println!("User:      {}", claims.sub);
    println!("Auth key:  {}", claims.auth_key);
    println!("Expires:   {}", claims.expires_at().to_rfc3339());
    println!();
    println!("{}", token);

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        return match command {
            Commands::GenerateToken {
                secret,
                user_id,
                auth_key,
                hours,
            } => generate_token(&secret, &user_id, auth_key, hours),
            Commands::ConfigTemplate => {
                print!("{}", PortalConfig::template());
                Ok(())
            }
        };
    }

    let args = cli.server_args;
    init_logging(&args.log_level)?;

    info!("Starting VPN portal {}", env!("GIT_TAG"));

    let jwt_secret = match args.jwt_secret {
        Some(secret) => secret,
        None => anyhow::bail!("--jwt-secret (VPORTAL_JWT_SECRET) is required to serve the API"),
    };

    // Configuration errors are fatal
    let config = PortalConfig::load(&args.config)
        .with_context(|| format!("Invalid configuration {}", args.config.display()))?;
    let registry = Arc::new(ProfileRegistry::from_config(&config)?);
    info!(profiles = registry.len(), "Loaded profile registry");

    info!("Connecting to database: {}", vportal_db::redact_url(&args.database_url));
    let db = vportal_db::connect(&args.database_url).await?;
    vportal_db::migrate(&db).await?;
    let store = Arc::new(DbSessionStore::new(db));

    let ca = CertificateAuthority::load_or_generate(&args.key_dir).await?;
    info!(
        valid_to = %ca.info().valid_to,
        fingerprint = %ca.info().fingerprint(true),
        "Certificate authority ready"
    );
    let issuer = Arc::new(CredentialIssuer::new(
        ca,
        &args.key_dir,
        config.wireguard.listen_port,
        config.certificate_max_lifetime(),
    ));

    let daemon: Arc<dyn VpnDaemon> = if args.memory_daemon {
        warn!("Using in-memory daemon, no VPN node will be programmed");
        Arc::new(MemoryDaemon::new())
    } else {
        Arc::new(HttpDaemonClient::new(&registry, &config.daemon)?)
    };

    let manager = Arc::new(ConnectionManager::new(
        registry.clone(),
        store,
        daemon,
        issuer,
        ManagerSettings {
            session_expiry: config.session_expiry(),
            max_active_configurations: config.max_active_configurations,
        },
    ));

    // Bring nodes in line with the store before serving
    for profile in registry.list_profiles() {
        if let Err(e) = manager.reconcile(&profile.profile_id).await {
            warn!(profile_id = %profile.profile_id, error = %e, "Startup reconcile failed");
        }
    }

    let sweep_manager = manager.clone();
    let sweep_interval = std::time::Duration::from_secs(args.sweep_interval_secs.max(1));
    let sweep_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_manager.purge_expired(chrono::Utc::now()).await {
                error!("Expired session sweep failed: {}", e);
            }
        }
    });
    info!("Expired session sweep every {}s", sweep_interval.as_secs());

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: args.api_addr,
            enable_cors: true,
            jwt_secret,
        },
        manager,
    );
    let api_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("API server error: {}", e);
        }
    });

    info!("Press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping server...");
        }
        Err(err) => {
            error!("Error listening for shutdown signal: {}", err);
        }
    }

    api_handle.abort();
    sweep_handle.abort();
    info!("VPN portal stopped");

    Ok(())
}
