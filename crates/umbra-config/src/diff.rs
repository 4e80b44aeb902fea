//! Section-level differences between two snapshots.

use std::fmt;

use crate::Config;

/// Which sections changed between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// `general` changed.
    pub general: bool,
    /// Hotkey bindings changed (re-registration needed).
    pub hotkeys: bool,
    /// `service` changed (control server restart needed).
    pub service: bool,
    /// `advanced` changed (orchestrator and pump parameters).
    pub advanced: bool,
    /// `windows` changed (backend options).
    pub platform: bool,
}

impl ConfigDiff {
    /// Compare `old` against `new`.
    pub fn between(old: &Config, new: &Config) -> Self {
        Self {
            general: old.general != new.general,
            hotkeys: old.hotkeys != new.hotkeys,
            service: old.service != new.service,
            advanced: old.advanced != new.advanced,
            platform: old.windows != new.windows,
        }
    }

    /// Diff with every flag set, used when there is no previous snapshot.
    pub fn all() -> Self {
        Self {
            general: true,
            hotkeys: true,
            service: true,
            advanced: true,
            platform: true,
        }
    }

    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of changed sections, in schema order.
    pub fn sections(&self) -> Vec<&'static str> {
        [
            (self.general, "general"),
            (self.hotkeys, "hotkeys"),
            (self.service, "service"),
            (self.advanced, "advanced"),
            (self.platform, "windows"),
        ]
        .into_iter()
        .filter_map(|(changed, name)| changed.then_some(name))
        .collect()
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.sections().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_config;

    #[test]
    fn diff_flags_only_changed_sections() {
        let a = default_config().expect("default");
        let mut b = a.clone();
        b.advanced.retry_backoff_ms = 10;
        b.hotkeys[0].enabled = false;
        let d = ConfigDiff::between(&a, &b);
        assert!(d.hotkeys && d.advanced);
        assert!(!d.general && !d.service && !d.platform);
        assert_eq!(d.to_string(), "hotkeys,advanced");
        assert!(ConfigDiff::between(&a, &a.clone().with_revision(9)).is_empty());
    }
}
