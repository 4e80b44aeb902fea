use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

use crate::{Key, Modifiers};

/// Reasons a chord spec can be rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The spec was empty or whitespace only.
    #[error("empty key chord")]
    Empty,
    /// A `+`-separated component was empty (e.g. `ctrl++t`).
    #[error("empty component in key chord '{0}'")]
    EmptyComponent(String),
    /// A leading component was not a modifier.
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
    /// The final component was not a bindable key.
    #[error("unknown key '{0}'")]
    UnknownKey(String),
    /// The same modifier appeared twice.
    #[error("duplicate modifier '{0}'")]
    DuplicateModifier(String),
}

/// A key chord: a set of modifiers plus a single non-modifier key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Chord {
    /// Modifier keys held down for this chord.
    pub modifiers: Modifiers,
    /// The non-modifier key for this chord.
    pub key: Key,
}

impl Chord {
    /// Construct a chord from parts.
    pub fn new(modifiers: Modifiers, key: Key) -> Self {
        Self { modifiers, key }
    }

    /// Parses a chord specification of the form "ctrl+shift+t".
    ///
    /// - Case-insensitive for both modifiers and the key.
    /// - Components are separated by "+"; the last component is always the key.
    /// - Modifiers accept the aliases handled by `Modifiers::from_spec`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        // A trailing "+" names the plus key itself, which maps onto "=".
        let key_raw = match parts.pop() {
            Some("") if parts.last() == Some(&"") => {
                parts.pop();
                "plus"
            }
            Some(k) => k,
            None => return Err(ParseError::Empty),
        };
        if key_raw.is_empty() {
            return Err(ParseError::EmptyComponent(s.to_string()));
        }
        let key = Key::from_spec(key_raw).ok_or_else(|| ParseError::UnknownKey(key_raw.into()))?;
        let mut modifiers = Modifiers::empty();
        for m in parts {
            if m.is_empty() {
                return Err(ParseError::EmptyComponent(s.to_string()));
            }
            let flag = Modifiers::from_spec(m).ok_or_else(|| ParseError::UnknownModifier(m.into()))?;
            if modifiers.contains(flag) {
                return Err(ParseError::DuplicateModifier(m.into()));
            }
            modifiers |= flag;
        }
        Ok(Self { modifiers, key })
    }

    /// True when at least one modifier is part of the chord.
    pub fn has_modifiers(&self) -> bool {
        !self.modifiers.is_empty()
    }
}

impl fmt::Display for Chord {
    /// Canonical form: `ctrl+alt+shift+win+key`, lowercase.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in Modifiers::ORDER {
            if self.modifiers.contains(m)
                && let Some(spec) = m.to_spec()
            {
                write!(f, "{spec}+")?;
            }
        }
        f.write_str(self.key.to_spec())
    }
}

impl FromStr for Chord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Chord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Chord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}
