use std::{io::Error as IoError, result::Result as StdResult};

use thiserror::Error;
use umbra_config::ConfigError;
use umbra_engine::HotkeyError;
use umbra_platform::PlatformError;

/// Service-level failures: startup, client transport, protocol.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or written.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backend selection or a backend call failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The hotkey thread could not start.
    #[error(transparent)]
    Hotkey(#[from] HotkeyError),

    /// Socket or file IO.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error frame.
    #[error("{code}: {message}")]
    Remote {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// A background task ended abnormally.
    #[error("task failed: {0}")]
    Task(String),
}

impl Error {
    /// Remote error code, if this is an error frame from the server.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = StdResult<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors originating in the control server itself.
///
/// Use [`IpcError::code`] for the stable wire code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Frame was not valid JSON, named an unknown command, or lacked arguments.
    #[error("malformed command: {0}")]
    MalformedCommand(String),
    /// Token missing or wrong.
    #[error("unauthorized")]
    Unauthorized,
    /// Every connection slot is taken.
    #[error("server busy: {0} connections in use")]
    Busy(usize),
    /// Unexpected server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IpcError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedCommand(_) => "MalformedCommand",
            Self::Unauthorized => "Unauthorized",
            Self::Busy(_) => "Busy",
            Self::Internal(_) => "Internal",
        }
    }
}
