use std::fmt;

/// Error kinds surfaced across analyze/execute steps and the orchestrator.
///
/// These map directly onto the kinds named by the reconciliation contract;
/// callers match on the variant, not on message text.
#[derive(Debug)]
pub enum CoreError {
    NotFound(String),
    Conflict(String),
    RemoteUnavailable(String),
    RemoteRateLimited { message: String, retry_after_secs: Option<u64> },
    RemoteAuthFailed(String),
    IntegrityFailed(String),
    Cancelled(String),
    Timeout(String),
    InvalidRequest(String),
    Unexpected(anyhow::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotFound(m) => write!(f, "not found: {m}"),
            CoreError::Conflict(m) => write!(f, "conflict: {m}"),
            CoreError::RemoteUnavailable(m) => write!(f, "remote unavailable: {m}"),
            CoreError::RemoteRateLimited { message, retry_after_secs } => {
                write!(f, "rate limited: {message}")?;
                if let Some(s) = retry_after_secs {
                    write!(f, " (retry after {s}s)")?;
                }
                Ok(())
            }
            CoreError::RemoteAuthFailed(m) => write!(f, "remote auth failed: {m}"),
            CoreError::IntegrityFailed(m) => write!(f, "integrity check failed: {m}"),
            CoreError::Cancelled(m) => write!(f, "cancelled: {m}"),
            CoreError::Timeout(m) => write!(f, "timed out: {m}"),
            CoreError::InvalidRequest(m) => write!(f, "invalid request: {m}"),
            CoreError::Unexpected(e) => write!(f, "unexpected error: {e}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Unexpected(e) => e.source(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        CoreError::Unexpected(e)
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Unexpected(anyhow::Error::new(e))
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(e: r2d2::Error) -> Self {
        CoreError::Timeout(format!("connection pool: {e}"))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Unexpected(anyhow::Error::new(e))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::InvalidRequest(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
