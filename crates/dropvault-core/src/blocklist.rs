//! IP block list, consulted before accepting an upload and managed by the
//! admin surface.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::VaultError;
use crate::models::BlockedIpRow;

#[derive(Clone)]
pub struct AccessGuard {
    pool: SqlitePool,
}

impl AccessGuard {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn is_blocked(&self, ip: &str) -> Result<bool, VaultError> {
        let blocked: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM blocked_ips WHERE ip = ?)")
            .bind(ip)
            .fetch_one(&self.pool)
            .await?;
        Ok(blocked)
    }

    /// Idempotent: re-blocking an already-blocked IP is not an error.
    /// Returns `true` when a new block record was created.
    pub async fn block(&self, ip: &str, purged: bool) -> Result<bool, VaultError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO blocked_ips (ip, blocked_at, purged) VALUES (?, ?, ?)",
        )
        .bind(ip)
        .bind(Utc::now())
        .bind(purged)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` only when every requested IP was removed.
    pub async fn unblock_many(&self, ips: &[String]) -> Result<bool, VaultError> {
        if ips.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; ips.len()].join(", ");
        let sql = format!("DELETE FROM blocked_ips WHERE ip IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for ip in ips {
            query = query.bind(ip);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() as usize == ips.len())
    }

    pub async fn list(&self) -> Result<Vec<BlockedIpRow>, VaultError> {
        let rows = sqlx::query_as::<_, BlockedIpRow>(
            "SELECT ip, blocked_at, purged FROM blocked_ips ORDER BY blocked_at ASC, ip ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_pool;
    use tempfile::tempdir;

    #[tokio::test]
    async fn block_is_idempotent() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let guard = AccessGuard::new(pool);

        assert!(!guard.is_blocked("5.6.7.8").await.unwrap());
        assert!(guard.block("5.6.7.8", false).await.unwrap());
        assert!(!guard.block("5.6.7.8", false).await.unwrap());
        assert!(guard.is_blocked("5.6.7.8").await.unwrap());
        assert_eq!(guard.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unblock_many_reports_partial_removal() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let guard = AccessGuard::new(pool);

        guard.block("1.1.1.1", false).await.unwrap();
        guard.block("2.2.2.2", true).await.unwrap();

        assert!(!guard
            .unblock_many(&["1.1.1.1".into(), "9.9.9.9".into()])
            .await
            .unwrap());
        assert!(guard.unblock_many(&["2.2.2.2".into()]).await.unwrap());
        assert!(!guard.unblock_many(&[]).await.unwrap());
        assert!(guard.list().await.unwrap().is_empty());
    }
}
