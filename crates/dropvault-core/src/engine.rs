//! The vault engine: orchestrates the blob store, scan gate, crypto
//! service, entry registry and access guard into the public upload,
//! fetch, delete and admin operations.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::blocklist::AccessGuard;
use crate::config::VaultConfig;
use crate::crypto::CryptoService;
use crate::db::open_pool;
use crate::error::VaultError;
use crate::models::{BlockedIpRow, EntryMetadata, Protection, ScanStatus, SourceKind, VaultEntry};
use crate::registry::{EntryRegistry, InsertOutcome, NewEntry, PageQuery, PendingDelete};
use crate::scan::{AvScanner, ClamAvScanner, DisabledScanner, ScanVerdict};

pub const MAX_TOKEN_ATTEMPTS: u32 = 5;

/// Exactly one of file or url, made structural.
#[derive(Debug, Clone)]
pub enum UploadSource {
    File { name: String, bytes: Vec<u8> },
    Url(String),
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedContent {
    Bytes(Vec<u8>),
    /// Remote-url entries carry no bytes; the boundary layer redirects.
    Url(String),
}

/// Size-based lifetime: small files live longest, the largest allowed
/// upload lives `min_secs`. Without a configured maximum size entries
/// never expire.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub min_secs: i64,
    pub max_secs: i64,
    pub max_size_bytes: Option<u64>,
}

impl RetentionPolicy {
    pub fn expires_at(&self, created_at: DateTime<Utc>, size_bytes: u64) -> Option<DateTime<Utc>> {
        let max_size = self.max_size_bytes?;
        let clamped = size_bytes.min(max_size);
        let ratio = 1.0 - clamped as f64 / max_size as f64;
        let span = (self.max_secs - self.min_secs) as f64;
        let secs = self.min_secs as f64 + span * ratio.powi(3);
        Some(created_at + chrono::Duration::seconds(secs.round() as i64))
    }
}

pub struct VaultEngine {
    registry: EntryRegistry,
    guard: AccessGuard,
    blobs: BlobStore,
    crypto: CryptoService,
    scanner: Arc<dyn AvScanner>,
    retention: RetentionPolicy,
    max_upload_bytes: Option<u64>,
}

/// Wire concrete implementations from deployment configuration. Components
/// can also be constructed individually and handed to [`VaultEngine::new`],
/// which is how the tests substitute a stub scanner.
pub async fn assemble(config: &VaultConfig) -> Result<VaultEngine, VaultError> {
    config.validate()?;
    let pool = open_pool(&config.db_path()).await?;
    let scanner: Arc<dyn AvScanner> = match &config.clamscan_path {
        Some(path) => Arc::new(ClamAvScanner::new(
            path,
            Duration::from_secs(config.scan_timeout_secs),
        )),
        None => Arc::new(DisabledScanner),
    };
    Ok(VaultEngine::new(
        EntryRegistry::new(pool.clone()),
        AccessGuard::new(pool),
        BlobStore::new(config.files_dir()),
        CryptoService::new(config.salt.as_deref())?,
        scanner,
        RetentionPolicy {
            min_secs: config.min_retention_secs,
            max_secs: config.max_retention_secs,
            max_size_bytes: config.max_upload_bytes,
        },
        config.max_upload_bytes,
    ))
}

impl VaultEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: EntryRegistry,
        guard: AccessGuard,
        blobs: BlobStore,
        crypto: CryptoService,
        scanner: Arc<dyn AvScanner>,
        retention: RetentionPolicy,
        max_upload_bytes: Option<u64>,
    ) -> Self {
        Self {
            registry,
            guard,
            blobs,
            crypto,
            scanner,
            retention,
            max_upload_bytes,
        }
    }

    // ── Upload ───────────────────────────────────────────────────────────

    pub async fn upload(
        &self,
        source: UploadSource,
        ip: &str,
        password: Option<&str>,
        encrypt: bool,
    ) -> Result<UploadOutcome, VaultError> {
        self.validate_upload(&source, password, encrypt)?;
        if self.guard.is_blocked(ip).await? {
            return Err(VaultError::Forbidden);
        }
        match source {
            UploadSource::Url(url) => self.upload_url(url, ip, password).await,
            UploadSource::File { name, bytes } => {
                self.upload_file(name, bytes, ip, password, encrypt).await
            }
        }
    }

    fn validate_upload(
        &self,
        source: &UploadSource,
        password: Option<&str>,
        encrypt: bool,
    ) -> Result<(), VaultError> {
        if encrypt && password.is_none() {
            return Err(VaultError::InvalidRequest(
                "encryption requires a password".into(),
            ));
        }
        if encrypt && !self.crypto.encryption_available() {
            return Err(VaultError::InvalidRequest(
                "encryption is not enabled on this deployment".into(),
            ));
        }
        match source {
            UploadSource::File { name, bytes } => {
                if name.is_empty() {
                    return Err(VaultError::InvalidRequest("file name must not be empty".into()));
                }
                if let Some(max) = self.max_upload_bytes {
                    if bytes.len() as u64 > max {
                        return Err(VaultError::InvalidRequest(format!(
                            "upload of {} bytes exceeds the {max} byte limit",
                            bytes.len()
                        )));
                    }
                }
            }
            UploadSource::Url(url) => {
                if url.is_empty() {
                    return Err(VaultError::InvalidRequest("please supply a file or url".into()));
                }
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(VaultError::InvalidRequest(format!("not a fetchable url: {url}")));
                }
                if encrypt {
                    return Err(VaultError::InvalidRequest(
                        "a remote url has no stored bytes to encrypt".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn upload_url(
        &self,
        url: String,
        ip: &str,
        password: Option<&str>,
    ) -> Result<UploadOutcome, VaultError> {
        let created_at = Utc::now();
        let protection = match password {
            None => Protection::None,
            Some(pw) => Protection::PasswordOnly {
                hash: self
                    .crypto
                    .hash_password(pw)
                    .map_err(|e| VaultError::Internal(e.to_string()))?,
            },
        };
        let entry = NewEntry {
            token: String::new(),
            storage_key: url,
            source_kind: SourceKind::RemoteUrl,
            file_name: None,
            created_at,
            expires_at: self.retention.expires_at(created_at, 0),
            size_bytes: 0,
            protection,
            uploader_ip: ip.to_string(),
            scan_status: ScanStatus::Passed,
            scan_reason: None,
        };
        self.insert_with_fresh_token(entry).await
    }

    async fn upload_file(
        &self,
        name: String,
        bytes: Vec<u8>,
        ip: &str,
        password: Option<&str>,
        encrypt: bool,
    ) -> Result<UploadOutcome, VaultError> {
        let created_at = Utc::now();
        let storage_key = BlobStore::fresh_key();
        let size_bytes = bytes.len() as u64;
        self.blobs.write(&storage_key, &bytes).await?;

        // scan-then-encrypt: the gate always sees plaintext
        if self.scanner.enabled() {
            match self.scanner.scan(&self.blobs.path_for(&storage_key)).await {
                Ok(ScanVerdict::Passed) => {}
                Ok(ScanVerdict::Failed { reason }) => {
                    self.discard_blob(&storage_key).await;
                    info!(ip, reason = %reason, "upload rejected by scan gate");
                    return Err(VaultError::ScanRejected(reason));
                }
                Err(err) => {
                    self.discard_blob(&storage_key).await;
                    warn!(error = %err, "scan gate unavailable");
                    return Err(VaultError::ScanUnavailable);
                }
            }
        }

        let protection = match self.protect(&storage_key, &bytes, password, encrypt).await {
            Ok(p) => p,
            Err(e) => {
                self.discard_blob(&storage_key).await;
                return Err(e);
            }
        };

        let entry = NewEntry {
            token: String::new(),
            storage_key,
            source_kind: SourceKind::UploadedFile,
            file_name: Some(name),
            created_at,
            expires_at: self.retention.expires_at(created_at, size_bytes),
            size_bytes,
            protection,
            uploader_ip: ip.to_string(),
            scan_status: ScanStatus::Passed,
            scan_reason: None,
        };
        self.insert_with_fresh_token(entry).await
    }

    async fn protect(
        &self,
        storage_key: &str,
        bytes: &[u8],
        password: Option<&str>,
        encrypt: bool,
    ) -> Result<Protection, VaultError> {
        let pw = match password {
            None => return Ok(Protection::None),
            Some(pw) => pw,
        };
        let hash = self
            .crypto
            .hash_password(pw)
            .map_err(|e| VaultError::Internal(e.to_string()))?;
        if !encrypt {
            return Ok(Protection::PasswordOnly { hash });
        }
        let key = self
            .crypto
            .derive_key(pw)
            .map_err(|e| VaultError::Internal(e.to_string()))?;
        let ciphertext = self.crypto.encrypt(bytes, &key);
        self.blobs.write(storage_key, &ciphertext).await?;
        Ok(Protection::PasswordAndEncrypted { hash })
    }

    /// Insert under freshly generated tokens until the registry accepts one.
    /// Collisions are resolved at write time by the unique constraint, never
    /// assumed away.
    async fn insert_with_fresh_token(&self, mut entry: NewEntry) -> Result<UploadOutcome, VaultError> {
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            entry.token = Uuid::new_v4().to_string();
            match self.registry.insert(&entry).await? {
                InsertOutcome::Inserted => {
                    info!(token = %entry.token, kind = entry.source_kind.as_str(), "entry created");
                    return Ok(UploadOutcome {
                        token: entry.token,
                        expires_at: entry.expires_at,
                    });
                }
                InsertOutcome::TokenCollision => {
                    warn!(token = %entry.token, "token collision, regenerating");
                }
            }
        }
        if entry.source_kind == SourceKind::UploadedFile {
            self.discard_blob(&entry.storage_key).await;
        }
        Err(VaultError::Internal(format!(
            "token space exhausted after {MAX_TOKEN_ATTEMPTS} attempts"
        )))
    }

    async fn discard_blob(&self, storage_key: &str) {
        if let Err(e) = self.blobs.delete(storage_key).await {
            warn!(storage_key, error = %e, "failed to clean up blob");
        }
    }

    // ── Fetch / info ─────────────────────────────────────────────────────

    pub async fn info(&self, token: &str) -> Result<EntryMetadata, VaultError> {
        let entry = self.live_entry(token).await?;
        Ok(entry.metadata(Utc::now()))
    }

    pub async fn fetch(
        &self,
        token: &str,
        password: Option<&str>,
    ) -> Result<FetchedContent, VaultError> {
        let entry = self.live_entry(token).await?;

        let verified_password = match entry.protection.password_hash() {
            Some(hash) => {
                let pw = password.ok_or(VaultError::PasswordRequired)?;
                let matches = self
                    .crypto
                    .verify_password(hash, pw)
                    .map_err(|e| VaultError::Internal(e.to_string()))?;
                if !matches {
                    return Err(VaultError::IncorrectPassword);
                }
                Some(pw)
            }
            None => None,
        };

        match entry.source_kind {
            SourceKind::RemoteUrl => Ok(FetchedContent::Url(entry.storage_key)),
            SourceKind::UploadedFile => {
                let stored = self.blobs.read(&entry.storage_key).await?;
                if !entry.protection.is_encrypted() {
                    return Ok(FetchedContent::Bytes(stored));
                }
                // encrypted entries always carry a hash, so the gate above ran
                let pw = verified_password.ok_or_else(|| {
                    VaultError::Internal("encrypted entry without password gate".into())
                })?;
                let key = self
                    .crypto
                    .derive_key(pw)
                    .map_err(|e| VaultError::Internal(e.to_string()))?;
                let plaintext = self
                    .crypto
                    .decrypt(&stored, &key)
                    .map_err(|e| VaultError::Internal(e.to_string()))?;
                Ok(FetchedContent::Bytes(plaintext))
            }
        }
    }

    /// Lookup treating expired or unscanned entries as absent.
    async fn live_entry(&self, token: &str) -> Result<VaultEntry, VaultError> {
        let entry = self
            .registry
            .find_by_token(token)
            .await?
            .ok_or(VaultError::NotFound)?;
        if entry.is_expired(Utc::now()) || entry.scan_status != ScanStatus::Passed {
            return Err(VaultError::NotFound);
        }
        Ok(entry)
    }

    // ── Delete ───────────────────────────────────────────────────────────

    /// Token possession is the sole authorization. Idempotent: a second
    /// delete of the same token returns `false`.
    pub async fn delete(&self, token: &str) -> Result<bool, VaultError> {
        match self.registry.begin_delete_by_token(token).await? {
            None => Ok(false),
            Some(pending) => {
                self.finish_delete(pending).await?;
                Ok(true)
            }
        }
    }

    /// Blob and row removal succeed together or the entry is left intact.
    async fn finish_delete(&self, pending: PendingDelete) -> Result<(), VaultError> {
        if pending.source_kind == SourceKind::UploadedFile {
            if let Err(e) = self.blobs.delete(&pending.storage_key).await {
                let token = pending.token.clone();
                let _ = pending.abort().await;
                return Err(VaultError::Internal(format!(
                    "blob removal for {token} failed: {e}"
                )));
            }
        }
        let token = pending.token.clone();
        pending.commit().await?;
        info!(token = %token, "entry deleted");
        Ok(())
    }

    // ── Expiry sweep ─────────────────────────────────────────────────────

    /// Remove entries whose deadline has passed, through the same delete
    /// path as token-based deletion. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64, VaultError> {
        let tokens = self.registry.expired_tokens(Utc::now()).await?;
        let mut removed = 0u64;
        for token in tokens {
            match self.registry.begin_delete_by_token(&token).await? {
                None => {} // a racing delete got there first
                Some(pending) => match self.finish_delete(pending).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(token = %token, error = %e, "sweep could not remove entry"),
                },
            }
        }
        Ok(removed)
    }

    // ── Admin surface ────────────────────────────────────────────────────

    pub async fn list_all(&self) -> Result<Vec<VaultEntry>, VaultError> {
        self.registry.list_all().await
    }

    pub async fn list_paged(&self, query: &PageQuery) -> Result<Vec<VaultEntry>, VaultError> {
        self.registry.paged(query).await
    }

    pub async fn entry_count(&self, search: Option<&str>) -> Result<u64, VaultError> {
        self.registry.count(search).await
    }

    /// Bulk delete by registry id. Missing ids are skipped; `NotFound` only
    /// when nothing at all was deleted.
    pub async fn delete_entries(&self, ids: &[i64]) -> Result<u64, VaultError> {
        let mut deleted = 0u64;
        for &id in ids {
            match self.registry.begin_delete_by_id(id).await? {
                None => {}
                Some(pending) => match self.finish_delete(pending).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!(id, error = %e, "bulk delete skipped entry"),
                },
            }
        }
        if deleted == 0 {
            return Err(VaultError::NotFound);
        }
        Ok(deleted)
    }

    pub async fn blocked_ips(&self) -> Result<Vec<BlockedIpRow>, VaultError> {
        self.guard.list().await
    }

    /// Block an IP, optionally purging its entries. The block record is
    /// committed before the purge starts and survives purge failures.
    /// Returns the number of entries purged.
    pub async fn block_ip(&self, ip: &str, purge_related: bool) -> Result<u64, VaultError> {
        self.guard.block(ip, purge_related).await?;
        info!(ip, purge_related, "ip blocked");
        if !purge_related {
            return Ok(0);
        }
        let ids = self.registry.ids_for_ip(ip).await?;
        let mut purged = 0u64;
        for id in ids {
            match self.registry.begin_delete_by_id(id).await {
                Ok(None) => {}
                Ok(Some(pending)) => match self.finish_delete(pending).await {
                    Ok(()) => purged += 1,
                    Err(e) => warn!(ip, id, error = %e, "purge skipped entry"),
                },
                Err(e) => warn!(ip, id, error = %e, "purge lookup failed"),
            }
        }
        Ok(purged)
    }

    pub async fn unblock_ips(&self, ips: &[String]) -> Result<bool, VaultError> {
        self.guard.unblock_many(ips).await
    }
}
