//! Error types for configuration loading, validation and saving.

use std::{
    cmp::{max, min},
    fmt::Write as _,
    path::{Path, PathBuf},
    result::Result as StdResult,
};

use thiserror::Error;

/// Convenient result type for this crate.
pub type Result<T> = StdResult<T, ConfigError>;

/// Errors produced while loading, parsing, validating or writing a configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },
    /// I/O error while reading.
    #[error("{message}")]
    Read {
        /// Optional path associated with the read error.
        path: Option<PathBuf>,
        /// Human-readable error message.
        message: String,
    },
    /// YAML syntax or shape error.
    #[error("{message}")]
    Parse {
        /// Optional path associated with the parse error.
        path: Option<PathBuf>,
        /// 1-based line number, when the parser reported one.
        line: Option<usize>,
        /// 1-based column number, when the parser reported one.
        col: Option<usize>,
        /// Human-readable error message.
        message: String,
        /// Rendered excerpt including a caret at the error location.
        excerpt: Option<String>,
    },
    /// A value is out of range or otherwise invalid.
    #[error("{field}: {message}")]
    Validation {
        /// Optional path associated with the validation error.
        path: Option<PathBuf>,
        /// Offending field, e.g. `hotkeys[1].keys`.
        field: String,
        /// Human-readable error message.
        message: String,
    },
    /// Two enabled bindings share a chord.
    #[error("{field}: {message}")]
    Conflict {
        /// Optional path associated with the conflict.
        path: Option<PathBuf>,
        /// Offending field, e.g. `hotkeys[2].keys`.
        field: String,
        /// Human-readable error message.
        message: String,
    },
    /// Serialization or atomic replace failed.
    #[error("{message}")]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

impl ConfigError {
    /// Validation error for `field`.
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: None,
            field: field.into(),
            message: message.into(),
        }
    }

    /// Attach `path` to errors that carry an optional path and lack one.
    pub(crate) fn with_path(mut self, p: &Path) -> Self {
        match &mut self {
            Self::Read { path, .. }
            | Self::Parse { path, .. }
            | Self::Validation { path, .. }
            | Self::Conflict { path, .. } => {
                if path.is_none() {
                    *path = Some(p.to_path_buf());
                }
            }
            Self::NotFound { .. } | Self::Write { .. } => {}
        }
        self
    }

    /// Access the path attached to this error, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound { path } | Self::Write { path, .. } => Some(path),
            Self::Read { path, .. }
            | Self::Parse { path, .. }
            | Self::Validation { path, .. }
            | Self::Conflict { path, .. } => path.as_deref(),
        }
    }

    /// Stable code used on the control channel.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ConfigNotFound",
            Self::Read { .. } => "ConfigRead",
            Self::Parse { .. } => "ConfigParse",
            Self::Validation { .. } => "ConfigValidation",
            Self::Conflict { .. } => "Conflict",
            Self::Write { .. } => "ConfigWrite",
        }
    }

    /// Render a human-friendly message including location and excerpt when available.
    pub fn pretty(&self) -> String {
        let at = |path: &Option<PathBuf>| match path {
            Some(p) => format!(" in {}", p.display()),
            None => String::new(),
        };
        match self {
            Self::NotFound { path } => format!("Config not found at {}", path.display()),
            Self::Read { path, message } => format!("Read error{}: {message}", at(path)),
            Self::Parse {
                path,
                line,
                col,
                message,
                excerpt,
            } => {
                let loc = match (line, col) {
                    (Some(l), Some(c)) => format!(" at {l}:{c}"),
                    (Some(l), None) => format!(" at line {l}"),
                    _ => String::new(),
                };
                match excerpt {
                    Some(ex) => format!("Config parse error{}{loc}\n{message}\n{ex}", at(path)),
                    None => format!("Config parse error{}{loc}\n{message}", at(path)),
                }
            }
            Self::Validation {
                path,
                field,
                message,
            } => format!("Config validation error{}\n{field}: {message}", at(path)),
            Self::Conflict {
                path,
                field,
                message,
            } => format!("Config conflict{}\n{field}: {message}", at(path)),
            Self::Write { path, message } => {
                format!("Could not write {}: {message}", path.display())
            }
        }
    }
}

/// Build a small 2-3 line excerpt with a caret at `(line_no, col_no)`.
pub fn excerpt_at(source: &str, line_no: usize, col_no: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len();
    let start = max(1usize, line_no.saturating_sub(2));
    let end = min(total, line_no + 1);

    let mut out = String::new();
    for n in start..=end {
        let text = lines.get(n - 1).copied().unwrap_or("");
        let _ignored = writeln!(out, " {:>4} | {}", n, text);
        if n == line_no {
            let prefix = format!(" {:>4} | ", n);
            let _ignored = writeln!(
                out,
                "{}{}^",
                " ".repeat(prefix.len()),
                " ".repeat(col_no.saturating_sub(1))
            );
        }
    }
    out
}
