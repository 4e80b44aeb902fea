//! Error types for the engine crate.
use std::{io, path::PathBuf};

use thiserror::Error;
use umbra_platform::PlatformError;
use win_keycode::Chord;

/// Failure of the durable state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Filesystem failure.
    #[error("state I/O error at {}: {source}", path.display())]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The state could not be serialized.
    #[error("state encode error: {0}")]
    Encode(String),
    /// A save attempted to go back in time.
    #[error("stale state: generation {attempted} is not newer than {last}")]
    Stale {
        /// Generation offered to `save`.
        attempted: u64,
        /// Last generation written.
        last: u64,
    },
}

/// Failure of a theme request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The backend refused or failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
    /// The store rejected the new state as stale.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The originating hotkey was disabled after repeated failures.
    #[error("hotkey {0} is disabled for this session")]
    Disabled(Chord),
    /// The theme was applied but could not be recorded; it has been reverted.
    #[error("could not persist state: {0}")]
    Persist(String),
    /// The orchestrator is shutting down or gone.
    #[error("orchestrator unavailable")]
    Unavailable,
}

impl OrchestratorError {
    /// Stable code used on the control channel.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Platform(e) => e.kind().as_str(),
            Self::Conflict(_) => "Conflict",
            Self::Disabled(_) => "Disabled",
            Self::Persist(_) => "Persist",
            Self::Unavailable => "Unavailable",
        }
    }
}

/// Failure of a hotkey operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HotkeyError {
    /// The chord is already active, or listed twice in one apply.
    #[error("hotkey {0} is already registered")]
    Conflict(Chord),
    /// The backend refused the registration.
    #[error("hotkey {chord}: {source}")]
    Platform {
        /// Chord being registered.
        chord: Chord,
        /// Backend error.
        #[source]
        source: PlatformError,
    },
    /// The event surface could not be bound.
    #[error("hotkey event surface: {0}")]
    Surface(PlatformError),
    /// The hotkey thread has exited.
    #[error("hotkey thread stopped")]
    Stopped,
}
