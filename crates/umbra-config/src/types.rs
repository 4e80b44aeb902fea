//! Configuration schema.
//!
//! `Config` is the validated, immutable snapshot shared across the service as
//! `Arc<Config>`. The `Raw*` types mirror the YAML shape before chords are
//! parsed and ranges checked; `validate` turns one into the other.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use umbra_platform::{PlatformOptions, Theme};
use win_keycode::Chord;

use crate::default_state_path;

/// Default loopback endpoint for the control server.
pub const DEFAULT_BIND: &str = "127.0.0.1:47613";

/// Theme applied when the service starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupTheme {
    /// Re-apply the recorded theme.
    #[default]
    Restore,
    /// Force light.
    Light,
    /// Force dark.
    Dark,
    /// Flip relative to the recorded theme.
    #[serde(alias = "follow_system", alias = "toggle")]
    Auto,
}

impl StartupTheme {
    /// Theme request for startup; `None` means restore the recorded theme.
    pub fn request(self) -> Option<Theme> {
        match self {
            Self::Restore => None,
            Self::Light => Some(Theme::Light),
            Self::Dark => Some(Theme::Dark),
            Self::Auto => Some(Theme::FollowSystem),
        }
    }
}

/// What a hotkey does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Flip between light and dark.
    Toggle,
    /// Switch to light.
    Light,
    /// Switch to dark.
    Dark,
}

impl Action {
    /// Theme request issued when the binding fires.
    pub fn theme(self) -> Theme {
        match self {
            Self::Toggle => Theme::FollowSystem,
            Self::Light => Theme::Light,
            Self::Dark => Theme::Dark,
        }
    }
}

/// `general` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct General {
    /// Theme applied at startup.
    pub startup_theme: StartupTheme,
    /// Number of transitions kept in the state history.
    pub history_size: usize,
    /// Reload the file when it changes on disk.
    pub watch_config: bool,
    /// Override for the state file location.
    pub state_path: Option<PathBuf>,
}

impl Default for General {
    fn default() -> Self {
        Self {
            startup_theme: StartupTheme::Restore,
            history_size: 20,
            watch_config: true,
            state_path: None,
        }
    }
}

/// A validated hotkey entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HotkeyBinding {
    /// Key chord.
    pub keys: Chord,
    /// Action taken on press.
    pub action: Action,
    /// Disabled bindings are kept in the file but never registered.
    pub enabled: bool,
}

/// A hotkey entry as written in YAML, before the chord is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct RawBinding {
    /// Chord spec.
    pub keys: String,
    /// Action taken on press.
    pub action: Action,
    /// Defaults to true.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// Serde default for `RawBinding::enabled`.
fn enabled_default() -> bool {
    true
}

/// `service` section: the control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    /// Run the control server.
    pub enabled: bool,
    /// Loopback address to listen on.
    pub bind: SocketAddr,
    /// Concurrent connection limit.
    pub max_connections: usize,
    /// Shared secret clients must present.
    pub token: Option<String>,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 47613)),
            max_connections: 4,
            token: None,
        }
    }
}

/// `advanced` section: timing and failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advanced {
    /// Delay before the single retry of a transient failure.
    pub retry_backoff_ms: u64,
    /// Consecutive hotkey failures before the binding is disabled.
    pub max_consecutive_failures: u32,
    /// Upper bound on one hotkey pump wait.
    pub pump_interval_ms: u64,
    /// Quiet period before a file change is reloaded.
    pub reload_debounce_ms: u64,
    /// Upper bound for blocking platform calls.
    pub platform_timeout_ms: u64,
    /// Snapshot platform flags before each change.
    pub backup_before_change: bool,
}

impl Default for Advanced {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 250,
            max_consecutive_failures: 3,
            pump_interval_ms: 100,
            reload_debounce_ms: 300,
            platform_timeout_ms: 2000,
            backup_before_change: true,
        }
    }
}

impl Advanced {
    /// `retry_backoff_ms` as a duration.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `pump_interval_ms` as a duration.
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    /// `reload_debounce_ms` as a duration.
    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }
}

/// `windows` section: platform extension block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsOptions {
    /// Write `AppsUseLightTheme`.
    pub apply_apps: bool,
    /// Write `SystemUsesLightTheme`.
    pub apply_system: bool,
    /// Broadcast `WM_SETTINGCHANGE` after writing.
    pub broadcast_setting_change: bool,
}

impl Default for WindowsOptions {
    fn default() -> Self {
        Self {
            apply_apps: true,
            apply_system: true,
            broadcast_setting_change: true,
        }
    }
}

/// Document shape as deserialized from YAML.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawConfig {
    /// Required.
    pub general: General,
    /// Required, may be empty.
    pub hotkeys: Vec<RawBinding>,
    /// Optional sections.
    #[serde(default)]
    pub service: Service,
    /// Optional.
    #[serde(default)]
    pub advanced: Advanced,
    /// Optional.
    #[serde(default)]
    pub windows: WindowsOptions,
}

/// Validated configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// `general` section.
    pub general: General,
    /// Hotkey bindings in file order.
    pub hotkeys: Vec<HotkeyBinding>,
    /// `service` section.
    pub service: Service,
    /// `advanced` section.
    pub advanced: Advanced,
    /// `windows` section.
    pub windows: WindowsOptions,
    /// Load counter assigned by the loader or watcher; not part of the file.
    #[serde(skip)]
    pub revision: u64,
    /// SHA-256 of the bytes this snapshot was parsed from, when it came from a file.
    #[serde(skip)]
    pub digest: Option<[u8; 32]>,
}

impl Config {
    /// Bindings that should be registered.
    pub fn enabled_hotkeys(&self) -> impl Iterator<Item = &HotkeyBinding> {
        self.hotkeys.iter().filter(|b| b.enabled)
    }

    /// Backend options derived from `windows` and `advanced`.
    pub fn platform_options(&self) -> PlatformOptions {
        PlatformOptions {
            apply_apps: self.windows.apply_apps,
            apply_system: self.windows.apply_system,
            broadcast_setting_change: self.windows.broadcast_setting_change,
            call_timeout: Duration::from_millis(self.advanced.platform_timeout_ms),
        }
    }

    /// State file location: `general.state_path`, else the platform default.
    pub fn state_path(&self) -> PathBuf {
        self.general
            .state_path
            .clone()
            .unwrap_or_else(default_state_path)
    }

    /// Same snapshot with a different revision.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Same snapshot tagged with the digest of its source bytes.
    pub fn with_digest(mut self, digest: [u8; 32]) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Equality ignoring `revision` and `digest`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.general == other.general
            && self.hotkeys == other.hotkeys
            && self.service == other.service
            && self.advanced == other.advanced
            && self.windows == other.windows
    }
}
