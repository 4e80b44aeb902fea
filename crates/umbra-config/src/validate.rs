//! Turn a raw document into a validated `Config`.

use std::{collections::HashMap, fmt::Display, ops::RangeInclusive};

use win_keycode::Chord;

use crate::{
    ConfigError, Result,
    types::{Config, HotkeyBinding, RawConfig},
};

/// Check that `value` lies in `range`, naming `field` otherwise.
fn in_range<T>(field: &str, value: T, range: RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!(
                "{value} is out of range ({}..={})",
                range.start(),
                range.end()
            ),
        ))
    }
}

/// Validate `raw`, failing on the first offending field.
pub(crate) fn validate(raw: RawConfig) -> Result<Config> {
    in_range("general.history_size", raw.general.history_size, 1..=1000)?;

    if !raw.service.bind.ip().is_loopback() {
        return Err(ConfigError::invalid(
            "service.bind",
            format!("{} is not a loopback address", raw.service.bind),
        ));
    }
    in_range("service.max_connections", raw.service.max_connections, 1..=64)?;
    if raw.service.token.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::invalid("service.token", "must not be empty"));
    }

    let adv = &raw.advanced;
    in_range("advanced.retry_backoff_ms", adv.retry_backoff_ms, 0..=10_000)?;
    in_range(
        "advanced.max_consecutive_failures",
        adv.max_consecutive_failures,
        1..=100,
    )?;
    in_range("advanced.pump_interval_ms", adv.pump_interval_ms, 10..=1000)?;
    in_range(
        "advanced.reload_debounce_ms",
        adv.reload_debounce_ms,
        50..=60_000,
    )?;
    in_range(
        "advanced.platform_timeout_ms",
        adv.platform_timeout_ms,
        100..=30_000,
    )?;

    let mut hotkeys = Vec::with_capacity(raw.hotkeys.len());
    let mut seen: HashMap<Chord, usize> = HashMap::new();
    for (i, b) in raw.hotkeys.into_iter().enumerate() {
        let field = format!("hotkeys[{i}].keys");
        let keys = Chord::parse(&b.keys).map_err(|e| ConfigError::invalid(&field, e.to_string()))?;
        if !keys.has_modifiers() {
            return Err(ConfigError::invalid(
                &field,
                format!("'{keys}' needs at least one modifier"),
            ));
        }
        if b.enabled {
            if let Some(prev) = seen.get(&keys) {
                return Err(ConfigError::Conflict {
                    path: None,
                    field,
                    message: format!("'{keys}' is already bound by hotkeys[{prev}]"),
                });
            }
            seen.insert(keys, i);
        }
        hotkeys.push(HotkeyBinding {
            keys,
            action: b.action,
            enabled: b.enabled,
        });
    }

    Ok(Config {
        general: raw.general,
        hotkeys,
        service: raw.service,
        advanced: raw.advanced,
        windows: raw.windows,
        revision: 0,
        digest: None,
    })
}
