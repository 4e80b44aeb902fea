#![warn(missing_docs)]

//! Shared logging CLI arguments and tracing filter helpers for the umbra workspace.
//!
//! The binary installs the subscriber; this crate only decides which filter
//! it gets. Precedence, highest first:
//! - `--log-filter` (verbatim directive)
//! - `--trace` / `--debug` / `--log-level` (scoped to our crates)
//! - `RUST_LOG`
//! - `info` for our crates

use std::env;

use clap::Args;
use tracing_subscriber::EnvFilter;

/// Logging controls for CLI apps.
#[derive(Debug, Clone, Default, Args)]
pub struct LogArgs {
    /// Set global log level to trace (our crates only)
    #[arg(long, global = true, conflicts_with_all = ["debug", "log_level", "log_filter"])]
    pub trace: bool,

    /// Set global log level to debug (our crates only)
    #[arg(long, global = true, conflicts_with_all = ["trace", "log_level", "log_filter"])]
    pub debug: bool,

    /// Set a single global log level for our crates (error|warn|info|debug|trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Set an explicit tracing filter directive (overrides other flags)
    /// e.g. "umbra_engine=trace,umbra_server=debug"
    #[arg(long, global = true)]
    pub log_filter: Option<String>,
}

impl LogArgs {
    /// Final filter spec for these flags and the current environment.
    pub fn spec(&self) -> String {
        compute_spec(
            self.trace,
            self.debug,
            self.log_level.as_deref(),
            self.log_filter.as_deref(),
        )
    }
}

/// List of crate targets that constitute "our" logs.
pub fn our_crates() -> &'static [&'static str] {
    &[
        "umbra",
        "umbra_server",
        "umbra_engine",
        "umbra_config",
        "umbra_platform",
        "win_keycode",
        "logging",
    ]
}

/// Build a filter directive string that sets the same `level` for all of our crates.
pub fn level_spec_for(level: &str) -> String {
    let lvl = level.to_ascii_lowercase();
    our_crates()
        .iter()
        .map(|t| format!("{t}={lvl}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Precedence rules with the environment passed in.
fn resolve_spec(
    trace: bool,
    debug: bool,
    log_level: Option<&str>,
    log_filter: Option<&str>,
    rust_log: Option<String>,
) -> String {
    if let Some(spec) = log_filter {
        return spec.to_string();
    }
    if trace {
        return level_spec_for("trace");
    }
    if debug {
        return level_spec_for("debug");
    }
    if let Some(lvl) = log_level {
        return level_spec_for(lvl);
    }
    match rust_log {
        Some(spec) if !spec.trim().is_empty() => spec,
        _ => level_spec_for("info"),
    }
}

/// Compute the final filter spec string with precedence:
/// - `log_filter`
/// - `trace`/`debug`/`log_level` (crate-scoped)
/// - `RUST_LOG` env
/// - default to crate-scoped `info`
pub fn compute_spec(
    trace: bool,
    debug: bool,
    log_level: Option<&str>,
    log_filter: Option<&str>,
) -> String {
    resolve_spec(
        trace,
        debug,
        log_level,
        log_filter,
        env::var("RUST_LOG").ok(),
    )
}

/// Create an `EnvFilter` from a spec string.
pub fn env_filter_from_spec(spec: &str) -> EnvFilter {
    EnvFilter::new(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let spec = resolve_spec(
            true,
            false,
            Some("warn"),
            Some("umbra_engine=trace"),
            Some("debug".into()),
        );
        assert_eq!(spec, "umbra_engine=trace");
    }

    #[test]
    fn flags_scope_to_our_crates() {
        let spec = resolve_spec(false, true, None, None, Some("trace".into()));
        assert!(spec.contains("umbra_server=debug"));
        assert!(spec.contains("win_keycode=debug"));
        assert!(!spec.contains("trace"));

        let spec = resolve_spec(false, false, Some("WARN"), None, None);
        assert!(spec.split(',').all(|d| d.ends_with("=warn")));
    }

    #[test]
    fn env_then_default() {
        assert_eq!(
            resolve_spec(false, false, None, None, Some("umbra=trace".into())),
            "umbra=trace"
        );
        assert_eq!(
            resolve_spec(false, false, None, None, Some("  ".into())),
            level_spec_for("info")
        );
        assert_eq!(
            resolve_spec(false, false, None, None, None),
            level_spec_for("info")
        );
    }
}
