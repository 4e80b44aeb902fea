//! Read, write and locate configuration files.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    str,
};

use atomic_write_file::AtomicWriteFile;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::{
    Config, ConfigError, Result, error::excerpt_at, types::RawConfig, validate::validate,
};

/// Document written on first run.
pub const DEFAULT_YAML: &str = "\
# umbra configuration
general:
  startup_theme: restore      # restore | light | dark | auto
  history_size: 20
  watch_config: true
hotkeys:
  - keys: ctrl+shift+t
    action: toggle            # toggle | light | dark
    enabled: true
service:
  enabled: true
  bind: 127.0.0.1:47613
  max_connections: 4
advanced:
  retry_backoff_ms: 250
  max_consecutive_failures: 3
  pump_interval_ms: 100
  reload_debounce_ms: 300
  platform_timeout_ms: 2000
  backup_before_change: true
windows:
  apply_apps: true
  apply_system: true
  broadcast_setting_change: true
";

/// SHA-256 of file contents, used to ignore touches that change nothing.
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Parse and validate a YAML document.
pub fn parse_str(source: &str) -> Result<Config> {
    let raw: RawConfig = serde_yaml::from_str(source).map_err(|e| {
        let loc = e.location();
        let line = loc.as_ref().map(|l| l.line());
        let col = loc.as_ref().map(|l| l.column());
        ConfigError::Parse {
            path: None,
            line,
            col,
            message: e.to_string(),
            excerpt: line.map(|l| excerpt_at(source, l, col.unwrap_or(1))),
        }
    })?;
    validate(raw)
}

/// Read `path`, returning the raw bytes.
fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Read {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        },
    })
}

/// Decode and validate bytes read from `path`.
pub(crate) fn parse_bytes(path: &Path, bytes: &[u8]) -> Result<Config> {
    let text = str::from_utf8(bytes).map_err(|e| ConfigError::Read {
        path: Some(path.to_path_buf()),
        message: format!("not valid UTF-8: {e}"),
    })?;
    Ok(parse_str(text)
        .map_err(|e| e.with_path(path))?
        .with_digest(digest(bytes)))
}

/// Load and validate the configuration at `path`. Fails closed.
pub fn load(path: &Path) -> Result<Config> {
    let bytes = read(path)?;
    let cfg = parse_bytes(path, &bytes)?.with_revision(1);
    debug!(path = %path.display(), hotkeys = cfg.hotkeys.len(), "config_loaded");
    Ok(cfg)
}

/// Atomically replace `path` with `contents`, creating parent directories.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let fail = |e: io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(fail)?;
    }
    let mut file = AtomicWriteFile::options().open(path).map_err(fail)?;
    file.write_all(contents).map_err(fail)?;
    file.commit().map_err(fail)
}

/// Serialize `cfg` to YAML and atomically replace `path`.
pub fn save(path: &Path, cfg: &Config) -> Result<()> {
    let text = serde_yaml::to_string(cfg).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    write_atomic(path, text.as_bytes())
}

/// Built-in configuration: `ctrl+shift+t` toggles, everything else default.
pub fn default_config() -> Result<Config> {
    parse_str(DEFAULT_YAML)
}

/// Write the default document to `path` and return its parsed form.
pub fn write_default(path: &Path) -> Result<Config> {
    write_atomic(path, DEFAULT_YAML.as_bytes())?;
    info!(path = %path.display(), "default_config_written");
    Ok(default_config()?
        .with_revision(1)
        .with_digest(digest(DEFAULT_YAML.as_bytes())))
}

/// Preferred config location: `<config dir>/umbra/config.yaml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("umbra")
        .join("config.yaml")
}

/// Preferred state location: `<local data dir>/umbra/state.json`.
pub fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("umbra")
        .join("state.json")
}

/// Resolve the effective config path: `explicit` when given, else the default.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(default_config_path, Path::to_path_buf)
}

/// Load `path`, writing the default document first when it does not exist.
pub fn load_or_init(path: &Path) -> Result<Config> {
    match load(path) {
        Err(ConfigError::NotFound { .. }) => write_default(path),
        other => other,
    }
}
