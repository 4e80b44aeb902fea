//! Configuration for the umbra service.
//!
//! A YAML file with `general`, `hotkeys`, `service`, `advanced` and
//! `windows` sections is parsed into an immutable [`Config`] snapshot. Loads
//! fail closed: a document that does not validate is never partially applied.
//! [`ConfigWatcher`] reloads the file after edits and reports a
//! [`ConfigDiff`] so dependents re-initialize only what changed.

mod diff;
mod error;
mod loader;
mod types;
mod validate;
mod watcher;

#[cfg(test)]
mod test_load;

pub use diff::ConfigDiff;
pub use error::{ConfigError, Result, excerpt_at};
pub use loader::{
    DEFAULT_YAML, default_config, default_config_path, default_state_path, digest, load,
    load_or_init, parse_str, resolve_config_path, save, write_default,
};
pub use types::{
    Action, Advanced, Config, DEFAULT_BIND, General, HotkeyBinding, Service, StartupTheme,
    WindowsOptions,
};
pub use watcher::{ConfigCell, ConfigWatcher, OnChange};

