use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::crypto::SALT_LEN;

pub const DEFAULT_MIN_RETENTION_SECS: i64 = 30 * 24 * 3600;
pub const DEFAULT_MAX_RETENTION_SECS: i64 = 365 * 24 * 3600;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Deployment configuration for the vault engine.
///
/// Populated from environment variables (`DROPVAULT_*`) with the data
/// directory supplied by the caller; the service binary layers CLI flags on
/// top. `validate` is called once at startup and failures are fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    /// Fixed deployment-wide salt for content-key derivation. Must be
    /// exactly 8 bytes.
    pub salt: Option<String>,
    /// Path to the clamdscan binary. Unset disables the scan gate.
    pub clamscan_path: Option<PathBuf>,
    pub scan_timeout_secs: u64,
    pub min_retention_secs: i64,
    pub max_retention_secs: i64,
    /// Upper bound on upload size. Unset means unlimited uploads that
    /// never expire.
    pub max_upload_bytes: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl VaultConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            salt: None,
            clamscan_path: None,
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            min_retention_secs: DEFAULT_MIN_RETENTION_SECS,
            max_retention_secs: DEFAULT_MAX_RETENTION_SECS,
            max_upload_bytes: None,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }

    /// Build a config from `DROPVAULT_*` environment variables.
    pub fn from_env(data_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut cfg = Self::new(data_dir);
        if let Ok(salt) = std::env::var("DROPVAULT_SALT") {
            if !salt.is_empty() {
                cfg.salt = Some(salt);
            }
        }
        if let Ok(path) = std::env::var("DROPVAULT_CLAMSCAN") {
            if !path.is_empty() {
                cfg.clamscan_path = Some(PathBuf::from(path));
            }
        }
        if let Some(v) = env_parse::<u64>("DROPVAULT_SCAN_TIMEOUT_SECS")? {
            cfg.scan_timeout_secs = v;
        }
        if let Some(v) = env_parse::<i64>("DROPVAULT_MIN_RETENTION_SECS")? {
            cfg.min_retention_secs = v;
        }
        if let Some(v) = env_parse::<i64>("DROPVAULT_MAX_RETENTION_SECS")? {
            cfg.max_retention_secs = v;
        }
        if let Some(v) = env_parse::<u64>("DROPVAULT_MAX_UPLOAD_BYTES")? {
            cfg.max_upload_bytes = Some(v);
        }
        if let Some(v) = env_parse::<u64>("DROPVAULT_SWEEP_INTERVAL_SECS")? {
            cfg.sweep_interval_secs = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(salt) = &self.salt {
            if salt.as_bytes().len() != SALT_LEN {
                return Err(ConfigError::BadSaltLength {
                    expected: SALT_LEN,
                    actual: salt.as_bytes().len(),
                });
            }
        }
        if self.min_retention_secs <= 0 || self.max_retention_secs < self.min_retention_secs {
            return Err(ConfigError::Invalid(format!(
                "retention window {}..{} is not a valid range",
                self.min_retention_secs, self.max_retention_secs
            )));
        }
        if self.max_upload_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "max upload size of zero would reject every upload".into(),
            ));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("dropvault.db")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name}={raw} is not a valid value"))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_length_is_enforced() {
        let mut cfg = VaultConfig::new(PathBuf::from("/tmp/x"));
        cfg.salt = Some("tooshort!".into());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BadSaltLength { actual: 9, .. })
        ));
        cfg.salt = Some("8bytes!!".into());
        cfg.validate().unwrap();
    }

    #[test]
    fn retention_window_must_be_ordered() {
        let mut cfg = VaultConfig::new(PathBuf::from("/tmp/x"));
        cfg.min_retention_secs = 100;
        cfg.max_retention_secs = 10;
        assert!(cfg.validate().is_err());
    }
}
