//! SQLite adapters for the slot registry and the admin directory.

use std::{str::FromStr, time::Duration};

use otbor_core::{slots::RegistryError, Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{error, info};

pub mod directory;
pub mod slots;

pub use directory::SqlDirectory;
pub use slots::SqlSlotRepository;

const MAX_CONNECTIONS: u32 = 5;

/// Opens (creating if needed) the database and applies pending migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| Error::Config(format!("invalid DATABASE_URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to open database");
            db_err("connect", e)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("migrations failed: {e}")))?;

    info!("database ready");
    Ok(pool)
}

pub(crate) fn db_err(context: &str, e: sqlx::Error) -> Error {
    Error::StoreUnavailable(format!("{context}: {e}"))
}

pub(crate) fn registry_err(context: &str, e: sqlx::Error) -> RegistryError {
    RegistryError::StoreUnavailable(format!("{context}: {e}"))
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_the_file_and_migrates_twice() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("otbor.db").display());

        let pool = connect(&url).await.unwrap();
        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'interviewer_slots'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 1);
        pool.close().await;

        // Re-opening an up-to-date database is a no-op.
        connect(&url).await.unwrap();
    }
}
