use thiserror::Error;
use warden_cache::CacheError;

#[derive(Error, Debug)]
pub enum CsrfError {
    #[error("CSRF tokens may not be generated or verified unless session management is enabled")]
    NoSessionContext,

    #[error("Token storage unavailable: {0}")]
    Backend(#[from] CacheError),

    #[error("Malformed token record under '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("Gave up writing token map '{key}' after {attempts} conflicting attempts")]
    Contention { key: String, attempts: u32 },

    #[error("The inbound CSRF token in the header [{header}] is not valid")]
    TokenInvalid { header: String },

    #[error("Invalid CSRF configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CsrfError {
    /// Whether the failure came from the storage layer rather than the request.
    pub fn is_backend(&self) -> bool {
        matches!(self, CsrfError::Backend(_) | CsrfError::Contention { .. })
    }
}

pub type Result<T> = std::result::Result<T, CsrfError>;
