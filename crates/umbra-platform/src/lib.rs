//! Platform surface for umbra.
//!
//! Everything above this crate is OS-agnostic: it talks to a [`Platform`]
//! trait object selected once at startup via [`native`]. The trait covers
//! exactly what the service needs from the OS:
//! - read and write the light/dark theme flag
//! - register and unregister global hotkeys
//! - pump OS events (hotkey presses, session end) with a bounded wait
//! - bind/unbind the event-receiving surface to the pumping thread
//!
//! Threading contract
//! - Hotkey registration and `pump_events` must be issued from a single
//!   thread for the lifetime of the service (Windows delivers `WM_HOTKEY` to
//!   the thread that registered the hotkey). That thread calls
//!   `start_service` first.
//! - `stop_service` may be called from any thread; it wakes a blocked pump.
//! - Theme operations may be called from any thread, but callers are expected
//!   to serialize them (the orchestrator is the only caller).
#![warn(unsafe_op_in_unsafe_fn)]

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    result::Result as StdResult,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
pub use win_keycode::Chord;

mod error;
pub use error::{PlatformError, PlatformErrorKind, Result};

#[cfg(windows)]
mod win;
#[cfg(windows)]
pub use win::WindowsPlatform;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

/// Appearance mode.
///
/// `FollowSystem` is a request-only value: the orchestrator resolves it to
/// the complement of the last recorded theme before anything reaches a
/// backend. Recorded and applied themes are always `Light` or `Dark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Light appearance.
    Light,
    /// Dark appearance.
    Dark,
    /// Flip relative to the recorded theme.
    #[serde(alias = "auto", alias = "toggle")]
    FollowSystem,
}

impl Theme {
    /// The opposite concrete theme. `FollowSystem` has no complement of its own.
    pub fn complement(self) -> Option<Self> {
        match self {
            Self::Light => Some(Self::Dark),
            Self::Dark => Some(Self::Light),
            Self::FollowSystem => None,
        }
    }

    /// True for `Light` and `Dark`.
    pub fn is_concrete(self) -> bool {
        !matches!(self, Self::FollowSystem)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::FollowSystem => "follow_system",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a theme name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown theme '{0}' (expected light, dark or auto)")]
pub struct UnknownTheme(pub String);

impl FromStr for Theme {
    type Err = UnknownTheme;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "auto" | "toggle" | "follow_system" | "follow-system" => Ok(Self::FollowSystem),
            other => Err(UnknownTheme(other.to_string())),
        }
    }
}

/// Opaque token for a registered hotkey.
///
/// Unique for the life of the process; a handle is never handed out again
/// after it has been unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HotkeyHandle(u32);

impl HotkeyHandle {
    /// Raw identifier (the `id` passed to `RegisterHotKey` on Windows).
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HotkeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic allocator for [`HotkeyHandle`]s, shared by all backends.
#[derive(Debug)]
pub struct HandleAllocator {
    /// Next id to hand out.
    next: AtomicU32,
    /// Exclusive upper bound on ids.
    limit: u32,
}

impl HandleAllocator {
    /// Allocator handing out ids in `first..limit`.
    pub const fn new(first: u32, limit: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
            limit,
        }
    }

    /// Next unused handle, or `ResourceBusy` once the id space is exhausted.
    pub fn allocate(&self) -> Result<HotkeyHandle> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        if id >= self.limit {
            return Err(PlatformError::ResourceBusy(
                "hotkey id space exhausted".to_string(),
            ));
        }
        Ok(HotkeyHandle(id))
    }
}

/// Event produced by the OS event pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// A registered hotkey was pressed.
    HotkeyFired(HotkeyHandle),
    /// The OS (or `stop_service`) asked the service to exit.
    ShutdownRequested,
}

/// One batch of events returned by a single `pump_events` call.
///
/// Iterating drains the batch; call `pump_events` again for the next one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlatformEvents {
    /// Pending events in delivery order.
    queue: VecDeque<PlatformEvent>,
}

impl PlatformEvents {
    /// Empty batch (the pump timed out).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append an event to the batch.
    pub fn push(&mut self, ev: PlatformEvent) {
        self.queue.push_back(ev);
    }

    /// Number of undelivered events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when no events remain.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Iterator for PlatformEvents {
    type Item = PlatformEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.queue.pop_front()
    }
}

impl FromIterator<PlatformEvent> for PlatformEvents {
    fn from_iter<I: IntoIterator<Item = PlatformEvent>>(iter: I) -> Self {
        Self {
            queue: iter.into_iter().collect(),
        }
    }
}

/// In-memory copy of the backend's underlying theme flags.
///
/// Captured immediately before a mutation and restored if the mutation
/// only partially applied. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThemeBackup {
    /// Raw flag values keyed by backend-specific name.
    pub values: BTreeMap<String, u32>,
}

impl ThemeBackup {
    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Backend tuning taken from the platform extension block of the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformOptions {
    /// Write the per-application theme flag.
    pub apply_apps: bool,
    /// Write the shell/taskbar theme flag.
    pub apply_system: bool,
    /// Notify running applications after a change.
    pub broadcast_setting_change: bool,
    /// Upper bound for any single blocking OS call.
    pub call_timeout: Duration,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            apply_apps: true,
            apply_system: true,
            broadcast_setting_change: true,
            call_timeout: Duration::from_millis(2000),
        }
    }
}

/// Capability set every OS backend implements.
pub trait Platform: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Apply a concrete theme. Applying the current theme again succeeds.
    fn set_theme(&self, theme: Theme) -> Result<()>;

    /// Read the applied theme. Missing values default to `Light` with a warning.
    fn current_theme(&self) -> Result<Theme>;

    /// Register a global hotkey on the calling (pump) thread.
    fn register_hotkey(&self, chord: &Chord) -> Result<HotkeyHandle>;

    /// Unregister a hotkey. Unknown or already-invalid handles are a no-op.
    fn unregister_hotkey(&self, handle: HotkeyHandle) -> Result<()>;

    /// Wait up to `timeout` for OS events and return them as one batch.
    fn pump_events(&self, timeout: Duration) -> Result<PlatformEvents>;

    /// Bind the event-receiving surface to the calling thread.
    fn start_service(&self) -> Result<()>;

    /// Ask a running pump to report `ShutdownRequested`. Callable from any thread.
    fn stop_service(&self) -> Result<()>;

    /// Snapshot the underlying flags before a mutation.
    fn capture_backup(&self) -> Result<ThemeBackup> {
        Ok(ThemeBackup::default())
    }

    /// Restore a snapshot taken by `capture_backup`.
    fn restore_backup(&self, _backup: &ThemeBackup) -> Result<()> {
        Ok(())
    }
}

/// Select the backend for the running OS. Called once at startup.
#[cfg(windows)]
pub fn native(opts: &PlatformOptions) -> Result<Arc<dyn Platform>> {
    Ok(Arc::new(WindowsPlatform::new(opts.clone())))
}

/// Select the backend for the running OS. Called once at startup.
#[cfg(not(windows))]
pub fn native(_opts: &PlatformOptions) -> Result<Arc<dyn Platform>> {
    use std::env::consts::OS;

    Err(PlatformError::NotSupported(format!("no theme backend for {OS}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_names_and_aliases() {
        assert_eq!("Dark".parse::<Theme>(), Ok(Theme::Dark));
        assert_eq!("auto".parse::<Theme>(), Ok(Theme::FollowSystem));
        assert_eq!("toggle".parse::<Theme>(), Ok(Theme::FollowSystem));
        assert!("sepia".parse::<Theme>().is_err());
        assert_eq!(Theme::Light.complement(), Some(Theme::Dark));
        assert_eq!(Theme::FollowSystem.complement(), None);
    }

    #[test]
    fn allocator_never_reuses_and_exhausts() {
        let a = HandleAllocator::new(1, 3);
        let h1 = a.allocate().expect("first");
        let h2 = a.allocate().expect("second");
        assert_ne!(h1, h2);
        assert!(matches!(a.allocate(), Err(PlatformError::ResourceBusy(_))));
    }

    #[test]
    fn events_batch_drains_in_order() {
        let mut batch = PlatformEvents::empty();
        batch.push(PlatformEvent::HotkeyFired(HotkeyHandle(7)));
        batch.push(PlatformEvent::ShutdownRequested);
        assert_eq!(batch.len(), 2);
        let drained: Vec<_> = batch.by_ref().collect();
        assert_eq!(drained[1], PlatformEvent::ShutdownRequested);
        assert!(batch.is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn native_backend_unsupported_off_windows() {
        let err = native(&PlatformOptions::default()).err();
        assert!(matches!(err, Some(PlatformError::NotSupported(_))));
    }
}
