//! Error types and failure classification for Tether

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Errors related to user and item identifiers
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("Invalid identifier format: {0}")]
    InvalidFormat(String),
}

/// Errors reported by the remote backend
///
/// The processor never inspects these beyond [`RemoteError::class`], so
/// backend implementations are free to map their transport errors onto
/// whichever variant carries the most information.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Payload rejected: {0}")]
    Rejected(String),

    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Classify this error into the sync error taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => ErrorClass::Network,
            RemoteError::Unauthenticated(_) => ErrorClass::Auth,
            RemoteError::Rejected(_) => ErrorClass::Validation,
            RemoteError::Status { code, message } => match code {
                401 | 403 => ErrorClass::Auth,
                408 => ErrorClass::Network,
                400 | 413 | 422 => ErrorClass::Validation,
                429 | 507 => ErrorClass::Quota,
                500..=599 => ErrorClass::Network,
                _ => classify_message(message),
            },
            RemoteError::Other(message) => classify_message(message),
        }
    }
}

/// Failure classes used to drive retry and dead-letter decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient connectivity failure, always retryable
    Network,
    /// Session expired or rejected; needs re-authentication
    Auth,
    /// Rate limit or storage quota; retryable after backoff
    Quota,
    /// Malformed payload; retrying the same payload cannot succeed
    Validation,
    /// Anything we could not classify
    Unknown,
}

impl ErrorClass {
    /// Whether a dead-lettered item with this failure may be retried automatically
    pub fn can_retry(self) -> bool {
        !matches!(self, ErrorClass::Auth | ErrorClass::Validation)
    }

    /// Whether this failure counts towards the user notification threshold
    pub fn is_high_severity(self) -> bool {
        matches!(self, ErrorClass::Auth | ErrorClass::Validation | ErrorClass::Quota)
    }

    /// Stable lowercase name for logs and diagnostics
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::Auth => "auth",
            ErrorClass::Quota => "quota",
            ErrorClass::Validation => "validation",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a free-form failure message by keyword
///
/// Used for backend errors that carry no structured status. Matching is
/// case-insensitive; the first matching class in the order network, auth,
/// quota, validation wins.
pub fn classify_message(message: &str) -> ErrorClass {
    const NETWORK: &[&str] = &[
        "network",
        "timeout",
        "timed out",
        "connection",
        "offline",
        "unreachable",
        "dns",
    ];
    const AUTH: &[&str] = &[
        "unauthorized",
        "unauthenticated",
        "forbidden",
        "jwt",
        "token expired",
        "session",
    ];
    const QUOTA: &[&str] = &["quota", "rate limit", "too many requests", "throttl"];
    const VALIDATION: &[&str] = &[
        "invalid",
        "validation",
        "malformed",
        "schema",
        "constraint",
        "format",
    ];

    let lower = message.to_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if matches(NETWORK) {
        ErrorClass::Network
    } else if matches(AUTH) {
        ErrorClass::Auth
    } else if matches(QUOTA) {
        ErrorClass::Quota
    } else if matches(VALIDATION) {
        ErrorClass::Validation
    } else {
        ErrorClass::Unknown
    }
}
