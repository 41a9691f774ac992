//! Antivirus scan gate.
//!
//! The engine talks to a capability trait so tests can inject a stub; the
//! real implementation shells out to clamdscan and owns the process spawn
//! and timeout. The external tool's exit status and output are carried
//! verbatim in the failure reason.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Passed,
    Failed { reason: String },
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scanner spawn failed: {0}")]
    Spawn(String),

    #[error("scan timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait AvScanner: Send + Sync {
    /// Capability query. When `false` the engine must not call `scan`.
    fn enabled(&self) -> bool;

    async fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError>;
}

/// Shells out to `clamdscan <path>`.
pub struct ClamAvScanner {
    binary: PathBuf,
    timeout: Duration,
}

impl ClamAvScanner {
    pub fn new<P: AsRef<Path>>(binary: P, timeout: Duration) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            timeout,
        }
    }
}

#[async_trait]
impl AvScanner for ClamAvScanner {
    fn enabled(&self) -> bool {
        true
    }

    async fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError> {
        debug!(path = %path.display(), binary = %self.binary.display(), "scanning upload");
        let run = Command::new(&self.binary).arg(path).output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => return Err(ScanError::TimedOut(self.timeout)),
            Ok(Err(e)) => return Err(ScanError::Spawn(e.to_string())),
            Ok(Ok(out)) => out,
        };
        if output.status.success() {
            return Ok(ScanVerdict::Passed);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        Ok(ScanVerdict::Failed {
            reason: format!("{}: {}", output.status, message.trim()),
        })
    }
}

/// Stand-in when no scanner binary is configured. The engine checks
/// `enabled()` and skips the gate; calling `scan` anyway is a wiring bug.
pub struct DisabledScanner;

#[async_trait]
impl AvScanner for DisabledScanner {
    fn enabled(&self) -> bool {
        false
    }

    async fn scan(&self, _path: &Path) -> Result<ScanVerdict, ScanError> {
        Err(ScanError::Spawn("no scanner configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clean_exit_passes() {
        let scanner = ClamAvScanner::new("true", Duration::from_secs(5));
        let verdict = scanner.scan(Path::new("/nonexistent")).await.unwrap();
        assert_eq!(verdict, ScanVerdict::Passed);
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_status() {
        let scanner = ClamAvScanner::new("false", Duration::from_secs(5));
        match scanner.scan(Path::new("/nonexistent")).await.unwrap() {
            ScanVerdict::Failed { reason } => assert!(reason.contains("exit status: 1"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let scanner = ClamAvScanner::new("/no/such/clamdscan", Duration::from_secs(5));
        assert!(matches!(
            scanner.scan(Path::new("/nonexistent")).await,
            Err(ScanError::Spawn(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_scanner_times_out() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slowscan.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scanner = ClamAvScanner::new(&script, Duration::from_millis(100));
        assert!(matches!(
            scanner.scan(Path::new("/nonexistent")).await,
            Err(ScanError::TimedOut(_))
        ));
    }

    #[test]
    fn disabled_scanner_reports_disabled() {
        assert!(!DisabledScanner.enabled());
    }
}
