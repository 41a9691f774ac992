//! Database row models and the domain types they decode into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    UploadedFile,
    RemoteUrl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::UploadedFile => "file",
            SourceKind::RemoteUrl => "url",
        }
    }

    pub fn parse(s: &str) -> Result<Self, VaultError> {
        match s {
            "file" => Ok(SourceKind::UploadedFile),
            "url" => Ok(SourceKind::RemoteUrl),
            other => Err(VaultError::Internal(format!("unknown source kind {other:?}"))),
        }
    }
}

/// Protection level as a tagged union: a password hash is present iff the
/// entry is protected, ciphertext exists iff it is encrypted. The invalid
/// flag combinations cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protection {
    None,
    PasswordOnly { hash: String },
    PasswordAndEncrypted { hash: String },
}

impl Protection {
    /// Validating constructor from the storage representation.
    pub fn from_parts(hash: Option<String>, encrypted: bool) -> Result<Self, VaultError> {
        match (hash, encrypted) {
            (None, false) => Ok(Protection::None),
            (Some(hash), false) => Ok(Protection::PasswordOnly { hash }),
            (Some(hash), true) => Ok(Protection::PasswordAndEncrypted { hash }),
            (None, true) => Err(VaultError::Internal(
                "entry marked encrypted without a password hash".into(),
            )),
        }
    }

    pub fn password_hash(&self) -> Option<&str> {
        match self {
            Protection::None => None,
            Protection::PasswordOnly { hash } | Protection::PasswordAndEncrypted { hash } => {
                Some(hash)
            }
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Protection::PasswordAndEncrypted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protection::None => "none",
            Protection::PasswordOnly { .. } => "password",
            Protection::PasswordAndEncrypted { .. } => "encrypted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Passed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Passed => "passed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, VaultError> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "passed" => Ok(ScanStatus::Passed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(VaultError::Internal(format!("unknown scan status {other:?}"))),
        }
    }
}

/// Raw `entries` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryRow {
    pub id: i64,
    pub token: String,
    pub storage_key: String,
    pub source_kind: String,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub password_hash: Option<String>,
    pub encrypted: bool,
    pub uploader_ip: String,
    pub scan_status: String,
    pub scan_reason: Option<String>,
}

/// Decoded vault entry with the protection invariant enforced.
#[derive(Debug, Clone)]
pub struct VaultEntry {
    pub id: i64,
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

impl VaultEntry {
    pub fn from_row(row: EntryRow) -> Result<Self, VaultError> {
        Ok(Self {
            id: row.id,
            token: row.token,
            storage_key: row.storage_key,
            source_kind: SourceKind::parse(&row.source_kind)?,
            file_name: row.file_name,
            created_at: row.created_at,
            expires_at: row.expires_at,
            size_bytes: row.size_bytes.max(0) as u64,
            protection: Protection::from_parts(row.password_hash, row.encrypted)?,
            uploader_ip: row.uploader_ip,
            scan_status: ScanStatus::parse(&row.scan_status)?,
            scan_reason: row.scan_reason,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    pub fn metadata(&self, now: DateTime<Utc>) -> EntryMetadata {
        let time_remaining_secs = self
            .expires_at
            .map(|at| (at - now).num_seconds().max(0));
        EntryMetadata {
            token: self.token.clone(),
            source_kind: self.source_kind,
            file_name: self.file_name.clone(),
            url: match self.source_kind {
                SourceKind::RemoteUrl => Some(self.storage_key.clone()),
                SourceKind::UploadedFile => None,
            },
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            expires_at: self.expires_at,
            time_remaining_secs,
            protection: self.protection.as_str(),
            scan_status: self.scan_status,
        }
    }
}

/// Client-visible metadata. Never carries bytes or the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct EntryMetadata {
    pub token: String,
    pub source_kind: SourceKind,
    pub file_name: Option<String>,
    pub url: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds until expiry, clamped to zero; `None` means never expires.
    pub time_remaining_secs: Option<i64>,
    pub protection: &'static str,
    pub scan_status: ScanStatus,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BlockedIpRow {
    pub ip: String,
    pub blocked_at: DateTime<Utc>,
    /// Whether related entries were purged when the block was created.
    pub purged: bool,
}

/// Strip a trailing port from a client address. `"1.2.3.4:443"` becomes
/// `"1.2.3.4"`, `"[::1]:8080"` becomes `"::1"`; bare IPv6 addresses are
/// left alone.
pub fn normalize_ip(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }
    if raw.matches(':').count() == 1 {
        if let Some((host, port)) = raw.rsplit_once(':') {
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                return host.to_string();
            }
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_forbids_encryption_without_hash() {
        assert!(Protection::from_parts(None, true).is_err());
        assert_eq!(Protection::from_parts(None, false).unwrap(), Protection::None);
        assert!(Protection::from_parts(Some("h".into()), false)
            .unwrap()
            .password_hash()
            .is_some());
        assert!(Protection::from_parts(Some("h".into()), true)
            .unwrap()
            .is_encrypted());
    }

    #[test]
    fn normalize_ip_strips_ports() {
        assert_eq!(normalize_ip("1.2.3.4:443"), "1.2.3.4");
        assert_eq!(normalize_ip("1.2.3.4"), "1.2.3.4");
        assert_eq!(normalize_ip("[::1]:8080"), "::1");
        assert_eq!(normalize_ip("::1"), "::1");
        assert_eq!(normalize_ip("2001:db8::7334"), "2001:db8::7334");
    }

    fn sample_entry(now: chrono::DateTime<Utc>) -> VaultEntry {
        VaultEntry {
            id: 1,
            token: "t".into(),
            storage_key: "k".into(),
            source_kind: SourceKind::UploadedFile,
            file_name: Some("a.txt".into()),
            created_at: now - chrono::Duration::hours(2),
            expires_at: Some(now),
            size_bytes: 10,
            protection: Protection::None,
            uploader_ip: "1.2.3.4".into(),
            scan_status: ScanStatus::Passed,
            scan_reason: None,
        }
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let now = Utc::now();
        let entry = sample_entry(now);
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - chrono::Duration::seconds(1)));
        let meta = entry.metadata(now + chrono::Duration::hours(1));
        assert_eq!(meta.time_remaining_secs, Some(0));
    }

    #[test]
    fn metadata_never_exposes_the_password_hash() {
        let now = Utc::now();
        let mut entry = sample_entry(now);
        entry.protection = Protection::PasswordAndEncrypted {
            hash: "$argon2id$secret".into(),
        };
        let json = serde_json::to_value(entry.metadata(now)).unwrap();
        assert_eq!(json["protection"], "encrypted");
        assert_eq!(json["scan_status"], "passed");
        assert!(json.to_string().find("argon2id").is_none());
    }
}
