//! Database migration command.
//!
//! # Environment Variables
//!
//! - `CHATOPS_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`)
//!
//! Migrations live in `crates/server/migrations/`.

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Apply all pending migrations.
///
/// # Errors
///
/// Returns an error if no database URL is set, the database is unreachable
/// or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("CHATOPS_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| MigrationError::MissingEnvVar("CHATOPS_DATABASE_URL"))?;

    tracing::info!("Connecting to chatops database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    tracing::info!("Running chatops migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Chatops migrations complete!");
    Ok(())
}
