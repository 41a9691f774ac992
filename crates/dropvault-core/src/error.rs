use thiserror::Error;

/// Engine-facing error taxonomy. Everything the boundary layer can observe
/// is one of these variants; raw sqlx/io/crypto errors never escape.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("ip address is blocked")]
    Forbidden,

    #[error("unknown or expired token")]
    NotFound,

    #[error("resource requires a password")]
    PasswordRequired,

    #[error("password is incorrect")]
    IncorrectPassword,

    #[error("antivirus scan rejected the upload: {0}")]
    ScanRejected(String),

    #[error("antivirus scanner unavailable")]
    ScanUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Deployment configuration problems. These abort startup; they are never
/// returned on a request path.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("encryption salt must be exactly {expected} bytes, got {actual}")]
    BadSaltLength { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Internal(format!("database: {e}"))
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::Internal(format!("io: {e}"))
    }
}

impl From<ConfigError> for VaultError {
    fn from(e: ConfigError) -> Self {
        VaultError::Internal(e.to_string())
    }
}
