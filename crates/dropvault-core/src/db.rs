//! SQLite pool setup via sqlx.
//!
//! WAL journal mode and foreign keys are configured at connection time, not
//! inside a migration: SQLite forbids changing `journal_mode` inside a
//! transaction and sqlx wraps every migration in one.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::time::Duration;

use crate::error::VaultError;

pub async fn open_pool(db_path: &Path) -> Result<SqlitePool, VaultError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(opts).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| VaultError::Internal(format!("migration: {e}")))?;

    Ok(pool)
}
