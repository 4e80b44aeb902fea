//! Error types and result alias for the platform surface.
use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenient result type used throughout this crate.
pub type Result<T> = StdResult<T, PlatformError>;

/// Classified failure of a platform operation.
///
/// Backends never surface raw OS codes; they map them onto one of these
/// variants so upper layers can reason uniformly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The OS refused the operation for lack of rights.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The operation or value has no implementation on this backend.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// The resource is claimed elsewhere (e.g. a hotkey held by another process).
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    /// A temporary failure; retrying may succeed.
    #[error("transient failure: {0}")]
    Transient(String),
    /// An unrecoverable failure.
    #[error("fatal platform failure: {0}")]
    Fatal(String),
}

/// Payload-free classification of a [`PlatformError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformErrorKind {
    /// See [`PlatformError::PermissionDenied`].
    PermissionDenied,
    /// See [`PlatformError::NotSupported`].
    NotSupported,
    /// See [`PlatformError::ResourceBusy`].
    ResourceBusy,
    /// See [`PlatformError::Transient`].
    Transient,
    /// See [`PlatformError::Fatal`].
    Fatal,
}

impl PlatformError {
    /// Classification without the message.
    pub fn kind(&self) -> PlatformErrorKind {
        match self {
            Self::PermissionDenied(_) => PlatformErrorKind::PermissionDenied,
            Self::NotSupported(_) => PlatformErrorKind::NotSupported,
            Self::ResourceBusy(_) => PlatformErrorKind::ResourceBusy,
            Self::Transient(_) => PlatformErrorKind::Transient,
            Self::Fatal(_) => PlatformErrorKind::Fatal,
        }
    }

    /// True only for failures worth an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Human-readable detail without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::PermissionDenied(m)
            | Self::NotSupported(m)
            | Self::ResourceBusy(m)
            | Self::Transient(m)
            | Self::Fatal(m) => m,
        }
    }
}

impl PlatformErrorKind {
    /// Stable code string used in logs and control-channel responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PermissionDenied",
            Self::NotSupported => "NotSupported",
            Self::ResourceBusy => "ResourceBusy",
            Self::Transient => "Transient",
            Self::Fatal => "Fatal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(PlatformError::Transient("x".into()).is_retryable());
        for e in [
            PlatformError::PermissionDenied("x".into()),
            PlatformError::NotSupported("x".into()),
            PlatformError::ResourceBusy("x".into()),
            PlatformError::Fatal("x".into()),
        ] {
            assert!(!e.is_retryable(), "{e}");
        }
    }

    #[test]
    fn kind_codes_are_stable() {
        let e = PlatformError::ResourceBusy("ctrl+t".into());
        assert_eq!(e.kind().as_str(), "ResourceBusy");
        assert_eq!(e.message(), "ctrl+t");
        assert_eq!(e.to_string(), "resource busy: ctrl+t");
    }
}
