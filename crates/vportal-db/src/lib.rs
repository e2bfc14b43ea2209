//! Session Store
//!
//! Durable record of VPN sessions, the single source of truth for which
//! credentials are currently connected. Backends:
//! - **PostgreSQL** (production portals)
//! - **SQLite3** (single node deployments: `"sqlite://./vportal.db?mode=rwc"`)
//! - **SQLite3 in-memory** (development and tests: `"sqlite::memory:"`)

pub mod entities;
pub mod migrator;
pub mod store;

pub use store::{DbSessionStore, Session, SessionKey, SessionStore, StoreError};

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

/// Initialize database connection
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);

    // An in-memory SQLite database lives as long as its last connection
    if database_url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    }

    let db = Database::connect(options).await?;

    let backend = db.get_database_backend();
    info!("Connected to database backend: {:?}", backend);

    Ok(db)
}

/// `database_url` with any password masked, for logging
pub fn redact_url(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("***")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        }
        Ok(_) => database_url.to_string(),
        Err(_) => "<redacted>".to_string(),
    }
}

/// Run migrations
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm_migration::MigratorTrait;

    info!("Running database migrations...");
    migrator::Migrator::up(db, None).await?;
    info!("Database migrations completed");

    Ok(())
}
