//! The durable record store of vault entries. Single writer: every entry
//! mutation in the system goes through this type.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::VaultError;
use crate::models::{EntryRow, Protection, ScanStatus, SourceKind, VaultEntry};

/// An entry about to be persisted. Token uniqueness is enforced by the
/// database at write time; see [`InsertOutcome`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub token: String,
    pub storage_key: String,
    pub source_kind: SourceKind,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub protection: Protection,
    pub uploader_ip: String,
    pub scan_status: ScanStatus,
    pub scan_reason: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another live entry already holds this token.
    TokenCollision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    CreatedAt,
    FileName,
    SizeBytes,
    UploaderIp,
    ExpiresAt,
    Token,
}

impl SortColumn {
    fn as_sql(self) -> &'static str {
        match self {
            SortColumn::CreatedAt => "created_at",
            SortColumn::FileName => "file_name",
            SortColumn::SizeBytes => "size_bytes",
            SortColumn::UploaderIp => "uploader_ip",
            SortColumn::ExpiresAt => "expires_at",
            SortColumn::Token => "token",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub offset: u32,
    pub limit: u32,
    pub sort: SortColumn,
    pub direction: SortDirection,
    pub search: Option<String>,
}

/// A row removal that has not been committed yet. The caller deletes the
/// backing blob between `begin_delete_*` and [`PendingDelete::commit`]; on
/// blob failure it calls [`PendingDelete::abort`] and the entry stays intact
/// for retry. Of two racing deletions of the same row, exactly one obtains a
/// `PendingDelete`.
pub struct PendingDelete {
    tx: Transaction<'static, Sqlite>,
    pub token: String,
    pub storage_key: String,
    pub source_kind: SourceKind,
}

impl PendingDelete {
    pub async fn commit(self) -> Result<(), VaultError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn abort(self) -> Result<(), VaultError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

const ENTRY_COLUMNS: &str = "id, token, storage_key, source_kind, file_name, created_at, \
     expires_at, size_bytes, password_hash, encrypted, uploader_ip, scan_status, scan_reason";

#[derive(Clone)]
pub struct EntryRegistry {
    pool: SqlitePool,
}

impl EntryRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, entry: &NewEntry) -> Result<InsertOutcome, VaultError> {
        let result = sqlx::query(
            "INSERT INTO entries (token, storage_key, source_kind, file_name, created_at, \
             expires_at, size_bytes, password_hash, encrypted, uploader_ip, scan_status, scan_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.token)
        .bind(&entry.storage_key)
        .bind(entry.source_kind.as_str())
        .bind(&entry.file_name)
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .bind(entry.size_bytes as i64)
        .bind(entry.protection.password_hash())
        .bind(entry.protection.is_encrypted())
        .bind(&entry.uploader_ip)
        .bind(entry.scan_status.as_str())
        .bind(&entry.scan_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(InsertOutcome::TokenCollision)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<VaultEntry>, VaultError> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(VaultEntry::from_row).transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<VaultEntry>, VaultError> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY created_at ASC, token ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VaultEntry::from_row).collect()
    }

    /// Paged listing for the admin surface. Ties are broken by token so
    /// paging is deterministic under any sort column.
    pub async fn paged(&self, query: &PageQuery) -> Result<Vec<VaultEntry>, VaultError> {
        let order = format!(
            "ORDER BY {} {}, token ASC",
            query.sort.as_sql(),
            query.direction.as_sql()
        );
        let rows = match &query.search {
            Some(term) => {
                let pattern = format!("%{term}%");
                sqlx::query_as::<_, EntryRow>(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries \
                     WHERE token LIKE ?1 OR uploader_ip LIKE ?1 OR file_name LIKE ?1 \
                     {order} LIMIT ?2 OFFSET ?3"
                ))
                .bind(pattern)
                .bind(query.limit as i64)
                .bind(query.offset as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, EntryRow>(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries {order} LIMIT ?1 OFFSET ?2"
                ))
                .bind(query.limit as i64)
                .bind(query.offset as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(VaultEntry::from_row).collect()
    }

    pub async fn count(&self, search: Option<&str>) -> Result<u64, VaultError> {
        let count: i64 = match search {
            Some(term) => {
                let pattern = format!("%{term}%");
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM entries \
                     WHERE token LIKE ?1 OR uploader_ip LIKE ?1 OR file_name LIKE ?1",
                )
                .bind(pattern)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM entries")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    pub async fn ids_for_ip(&self, ip: &str) -> Result<Vec<i64>, VaultError> {
        let ids = sqlx::query_scalar("SELECT id FROM entries WHERE uploader_ip = ?")
            .bind(ip)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn expired_tokens(&self, now: DateTime<Utc>) -> Result<Vec<String>, VaultError> {
        let tokens =
            sqlx::query_scalar("SELECT token FROM entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now)
                .fetch_all(&self.pool)
                .await?;
        Ok(tokens)
    }

    pub async fn begin_delete_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PendingDelete>, VaultError> {
        self.begin_delete("DELETE FROM entries WHERE token = ? RETURNING token, storage_key, source_kind", Bind::Text(token))
            .await
    }

    pub async fn begin_delete_by_id(&self, id: i64) -> Result<Option<PendingDelete>, VaultError> {
        self.begin_delete("DELETE FROM entries WHERE id = ? RETURNING token, storage_key, source_kind", Bind::Id(id))
            .await
    }

    async fn begin_delete(&self, sql: &str, bind: Bind<'_>) -> Result<Option<PendingDelete>, VaultError> {
        let mut tx = self.pool.begin().await?;
        let query = sqlx::query_as::<_, (String, String, String)>(sql);
        let query = match bind {
            Bind::Text(t) => query.bind(t.to_string()),
            Bind::Id(id) => query.bind(id),
        };
        match query.fetch_optional(&mut *tx).await? {
            Some((token, storage_key, kind)) => Ok(Some(PendingDelete {
                tx,
                token,
                storage_key,
                source_kind: SourceKind::parse(&kind)?,
            })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }
}

enum Bind<'a> {
    Text(&'a str),
    Id(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_pool;
    use tempfile::tempdir;

    fn entry(token: &str, ip: &str, name: &str, size: u64) -> NewEntry {
        NewEntry {
            token: token.to_string(),
            storage_key: format!("key-{token}"),
            source_kind: SourceKind::UploadedFile,
            file_name: Some(name.to_string()),
            created_at: Utc::now(),
            expires_at: None,
            size_bytes: size,
            protection: Protection::None,
            uploader_ip: ip.to_string(),
            scan_status: ScanStatus::Passed,
            scan_reason: None,
        }
    }

    #[tokio::test]
    async fn duplicate_token_reports_collision() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let reg = EntryRegistry::new(pool);

        assert_eq!(
            reg.insert(&entry("tok", "1.1.1.1", "a.txt", 1)).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            reg.insert(&entry("tok", "2.2.2.2", "b.txt", 2)).await.unwrap(),
            InsertOutcome::TokenCollision
        );
        assert_eq!(reg.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn paging_is_deterministic_with_tied_sort_keys() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let reg = EntryRegistry::new(pool);

        // identical sizes, so a size sort must fall back to the token
        for token in ["c", "a", "b"] {
            reg.insert(&entry(token, "1.1.1.1", "same.txt", 7)).await.unwrap();
        }
        let query = PageQuery {
            offset: 0,
            limit: 10,
            sort: SortColumn::SizeBytes,
            direction: SortDirection::Ascending,
            search: None,
        };
        let tokens: Vec<String> = reg
            .paged(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.token)
            .collect();
        assert_eq!(tokens, vec!["a", "b", "c"]);

        let second_page = PageQuery { offset: 1, limit: 1, ..query };
        let tokens: Vec<String> = reg
            .paged(&second_page)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.token)
            .collect();
        assert_eq!(tokens, vec!["b"]);
    }

    #[tokio::test]
    async fn search_matches_token_ip_and_file_name() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let reg = EntryRegistry::new(pool);

        reg.insert(&entry("alpha", "10.0.0.1", "report.pdf", 1)).await.unwrap();
        reg.insert(&entry("beta", "10.0.99.2", "notes.txt", 2)).await.unwrap();

        assert_eq!(reg.count(Some("alp")).await.unwrap(), 1);
        assert_eq!(reg.count(Some("10.0")).await.unwrap(), 2);
        assert_eq!(reg.count(Some("notes")).await.unwrap(), 1);
        assert_eq!(reg.count(Some("zzz")).await.unwrap(), 0);

        let query = PageQuery {
            offset: 0,
            limit: 10,
            search: Some("report".into()),
            ..Default::default()
        };
        let found = reg.paged(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].token, "alpha");
    }

    #[tokio::test]
    async fn expired_tokens_only_lists_past_deadlines() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let reg = EntryRegistry::new(pool);
        let now = Utc::now();

        let mut old = entry("old", "1.1.1.1", "old.txt", 1);
        old.expires_at = Some(now - chrono::Duration::hours(1));
        let mut fresh = entry("fresh", "1.1.1.1", "fresh.txt", 1);
        fresh.expires_at = Some(now + chrono::Duration::hours(1));
        let forever = entry("forever", "1.1.1.1", "keep.txt", 1);

        reg.insert(&old).await.unwrap();
        reg.insert(&fresh).await.unwrap();
        reg.insert(&forever).await.unwrap();

        assert_eq!(reg.expired_tokens(now).await.unwrap(), vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn second_delete_observes_already_gone() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let reg = EntryRegistry::new(pool);

        reg.insert(&entry("tok", "1.1.1.1", "a.txt", 1)).await.unwrap();

        let pending = reg.begin_delete_by_token("tok").await.unwrap().unwrap();
        assert_eq!(pending.storage_key, "key-tok");
        pending.commit().await.unwrap();

        assert!(reg.begin_delete_by_token("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn aborted_delete_leaves_the_entry_intact() {
        let dir = tempdir().unwrap();
        let pool = open_pool(&dir.path().join("v.db")).await.unwrap();
        let reg = EntryRegistry::new(pool);

        reg.insert(&entry("tok", "1.1.1.1", "a.txt", 1)).await.unwrap();
        let pending = reg.begin_delete_by_token("tok").await.unwrap().unwrap();
        pending.abort().await.unwrap();

        assert!(reg.find_by_token("tok").await.unwrap().is_some());
    }
}
