//! Durable service state.
//!
//! The store writes one JSON document carrying a SHA-256 checksum of its
//! body. Before each save the current file is copied to `<name>.prev`, and
//! the new document replaces the primary atomically. Loading never fails: a
//! corrupt primary falls back to the previous snapshot, then to defaults.

use std::{
    collections::VecDeque,
    ffi::OsString,
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use atomic_write_file::AtomicWriteFile;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use umbra_platform::Theme;
use win_keycode::Chord;

use crate::StateError;

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Where a theme request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A global hotkey fired.
    Hotkey(Chord),
    /// A control-channel command.
    Ipc,
    /// The configured startup theme.
    ConfigDefault,
}

impl Origin {
    /// Chord for hotkey origins.
    pub fn chord(&self) -> Option<Chord> {
        match self {
            Self::Hotkey(c) => Some(*c),
            Self::Ipc | Self::ConfigDefault => None,
        }
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Theme applied.
    pub theme: Theme,
    /// Requester.
    pub origin: Origin,
    /// Wall clock time in milliseconds since the Unix epoch.
    pub at_ms: u64,
    /// Generation the transition produced.
    pub generation: u64,
}

/// The service's durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Last applied theme; always `Light` or `Dark`.
    pub theme: Theme,
    /// Time of the last transition in milliseconds since the Unix epoch.
    pub last_transition_ms: u64,
    /// Incremented by exactly one per successful transition.
    pub generation: u64,
    /// Recent transitions, oldest first.
    pub history: VecDeque<HistoryEntry>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            last_transition_ms: 0,
            generation: 0,
            history: VecDeque::new(),
        }
    }
}

impl ServiceState {
    /// State after applying `theme`, with at most `cap` history entries.
    pub fn transition(&self, theme: Theme, origin: Origin, at_ms: u64, cap: usize) -> Self {
        let generation = self.generation + 1;
        let mut next = self.clone();
        next.theme = theme;
        next.last_transition_ms = at_ms;
        next.generation = generation;
        next.history.push_back(HistoryEntry {
            theme,
            origin,
            at_ms,
            generation,
        });
        next.trim_history(cap);
        next
    }

    /// Drop the oldest entries until at most `cap` remain.
    pub fn trim_history(&mut self, cap: usize) {
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    /// Internal consistency: concrete theme, no entry newer than the state.
    fn is_consistent(&self) -> bool {
        self.theme.is_concrete()
            && self
                .history
                .iter()
                .all(|h| h.generation <= self.generation && h.theme.is_concrete())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Checksummed part of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Body {
    /// Format version.
    version: u32,
    /// See [`ServiceState::generation`].
    generation: u64,
    /// See [`ServiceState::theme`].
    theme: Theme,
    /// See [`ServiceState::last_transition_ms`].
    last_transition_ms: u64,
    /// See [`ServiceState::history`].
    history: VecDeque<HistoryEntry>,
}

/// Document as written to disk.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    /// Checksummed fields.
    #[serde(flatten)]
    body: Body,
    /// Lowercase hex SHA-256 of the JSON-encoded body.
    checksum: String,
}

/// Lowercase hex SHA-256 of `body`'s JSON encoding.
fn checksum(body: &Body) -> Result<String, StateError> {
    let bytes = serde_json::to_vec(body).map_err(|e| StateError::Encode(e.to_string()))?;
    Ok(Sha256::digest(&bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Serialize `state` into document bytes.
fn encode(state: &ServiceState) -> Result<Vec<u8>, StateError> {
    let body = Body {
        version: STATE_VERSION,
        generation: state.generation,
        theme: state.theme,
        last_transition_ms: state.last_transition_ms,
        history: state.history.clone(),
    };
    let doc = Document {
        checksum: checksum(&body)?,
        body,
    };
    serde_json::to_vec_pretty(&doc).map_err(|e| StateError::Encode(e.to_string()))
}

/// Parse and verify document bytes. The error string explains the rejection.
fn decode(bytes: &[u8]) -> Result<ServiceState, String> {
    let doc: Document = serde_json::from_slice(bytes).map_err(|e| format!("parse: {e}"))?;
    if doc.body.version != STATE_VERSION {
        return Err(format!("unknown version {}", doc.body.version));
    }
    let want = checksum(&doc.body).map_err(|e| e.to_string())?;
    if want != doc.checksum {
        return Err("checksum mismatch".into());
    }
    let state = ServiceState {
        theme: doc.body.theme,
        last_transition_ms: doc.body.last_transition_ms,
        generation: doc.body.generation,
        history: doc.body.history,
    };
    if !state.is_consistent() {
        return Err("inconsistent generation or theme".into());
    }
    Ok(state)
}

/// Durable store for [`ServiceState`]. Owned by its single writer.
#[derive(Debug)]
pub struct StateStore {
    /// Primary document.
    path: PathBuf,
    /// Previous snapshot.
    prev: PathBuf,
    /// Generation of the last document written or loaded.
    last_saved: Option<u64>,
}

impl StateStore {
    /// Store backed by `path`; the previous snapshot lives next to it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut prev_name = path.file_name().map(OsString::from).unwrap_or_default();
        prev_name.push(".prev");
        let prev = path.with_file_name(prev_name);
        Self {
            path,
            prev,
            last_saved: None,
        }
    }

    /// Primary document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous-snapshot path.
    pub fn prev_path(&self) -> &Path {
        &self.prev
    }

    /// Generation of the last document written or loaded.
    pub fn last_saved(&self) -> Option<u64> {
        self.last_saved
    }

    /// Read and verify one file; `None` if absent or invalid.
    fn read_valid(&self, path: &Path) -> Option<ServiceState> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state_read_failed");
                return None;
            }
        };
        match decode(&bytes) {
            Ok(s) => Some(s),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "state_file_rejected");
                None
            }
        }
    }

    /// Load the durable state. Never fails.
    pub fn load(&mut self) -> ServiceState {
        if let Some(state) = self.read_valid(&self.path) {
            debug!(generation = state.generation, theme = %state.theme, "state_loaded");
            self.last_saved = Some(state.generation);
            return state;
        }
        match self.rollback() {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!(path = %self.path.display(), "state_defaults");
                ServiceState::default()
            }
            Err(e) => {
                warn!(error = %e, "state_rollback_failed");
                ServiceState::default()
            }
        }
    }

    /// Reinstate the previous snapshot as current when it is valid.
    pub fn rollback(&mut self) -> Result<Option<ServiceState>, StateError> {
        let Some(state) = self.read_valid(&self.prev) else {
            return Ok(None);
        };
        let bytes = fs::read(&self.prev).map_err(|source| StateError::Io {
            path: self.prev.clone(),
            source,
        })?;
        self.write_primary(&bytes)?;
        self.last_saved = Some(state.generation);
        warn!(generation = state.generation, "state_rolled_back");
        Ok(Some(state))
    }

    /// Persist `state`. Rejects generations not newer than the last save.
    pub fn save(&mut self, state: &ServiceState) -> Result<(), StateError> {
        if let Some(last) = self.last_saved
            && state.generation <= last
        {
            return Err(StateError::Stale {
                attempted: state.generation,
                last,
            });
        }
        let bytes = encode(state)?;
        if self.path.exists() {
            fs::copy(&self.path, &self.prev).map_err(|source| StateError::Io {
                path: self.prev.clone(),
                source,
            })?;
        }
        self.write_primary(&bytes)?;
        self.last_saved = Some(state.generation);
        debug!(generation = state.generation, "state_saved");
        Ok(())
    }

    /// Atomically replace the primary document.
    fn write_primary(&self, bytes: &[u8]) -> Result<(), StateError> {
        let io_err = |source: io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let mut file = AtomicWriteFile::options().open(&self.path).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.commit().map_err(io_err)
    }
}
