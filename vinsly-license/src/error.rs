//! Error types for license validation.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Transport-level failure (DNS, connect, reset, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt exceeded its deadline.
    #[error("license request timed out")]
    Timeout,

    /// The service answered with a non-success HTTP status.
    #[error("license request failed with status {status}: {reason}")]
    RequestFailed { status: u16, reason: String },

    /// The service says the credential itself is bad.
    #[error("license rejected: {0}")]
    Rejected(String),

    /// Locally stored license data fails basic shape validation.
    #[error("malformed license record: {0}")]
    MalformedRecord(String),

    /// Activation did not complete.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// No license record is stored.
    #[error("license not activated")]
    NotActivated,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The owning context cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Bootstrap runs at most once per process.
    #[error("license bootstrap already started")]
    AlreadyBootstrapped,
}

impl LicenseError {
    /// Returns true if the request client would retry this error.
    ///
    /// Network failures, timeouts, 5xx responses and undecodable bodies are
    /// transient. Every 4xx is a problem with the request itself.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Serialization(_) => true,
            Self::RequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
