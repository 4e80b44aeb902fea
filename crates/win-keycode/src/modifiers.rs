use bitflags::bitflags;

bitflags! {
    /// Modifier keys held down for a chord.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
    pub struct Modifiers: u8 {
        /// Either Control key.
        const CONTROL = 1 << 0;
        /// Either Alt key.
        const ALT = 1 << 1;
        /// Either Shift key.
        const SHIFT = 1 << 2;
        /// Either Windows (logo) key.
        const META = 1 << 3;
    }
}

/// `MOD_ALT` from `WinUser.h`.
const MOD_ALT: u32 = 0x0001;
/// `MOD_CONTROL` from `WinUser.h`.
const MOD_CONTROL: u32 = 0x0002;
/// `MOD_SHIFT` from `WinUser.h`.
const MOD_SHIFT: u32 = 0x0004;
/// `MOD_WIN` from `WinUser.h`.
const MOD_WIN: u32 = 0x0008;

impl Modifiers {
    /// Canonical display order used by `Chord::to_string`.
    pub const ORDER: [Self; 4] = [Self::CONTROL, Self::ALT, Self::SHIFT, Self::META];

    /// Parses a single modifier word, accepting common aliases.
    ///
    /// `ctrl`/`control`, `alt`/`opt`/`option`, `shift`, and
    /// `win`/`meta`/`super`/`cmd`. Case-insensitive.
    pub fn from_spec(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Self::CONTROL),
            "alt" | "opt" | "option" => Some(Self::ALT),
            "shift" => Some(Self::SHIFT),
            "win" | "meta" | "super" | "cmd" | "logo" => Some(Self::META),
            _ => None,
        }
    }

    /// Canonical spec word for a single-flag value; `None` for combinations.
    pub fn to_spec(self) -> Option<&'static str> {
        match self {
            Self::CONTROL => Some("ctrl"),
            Self::ALT => Some("alt"),
            Self::SHIFT => Some("shift"),
            Self::META => Some("win"),
            _ => None,
        }
    }

    /// Convert to the `fsModifiers` mask accepted by `RegisterHotKey`.
    pub fn to_win32(self) -> u32 {
        let mut out = 0;
        if self.contains(Self::ALT) {
            out |= MOD_ALT;
        }
        if self.contains(Self::CONTROL) {
            out |= MOD_CONTROL;
        }
        if self.contains(Self::SHIFT) {
            out |= MOD_SHIFT;
        }
        if self.contains(Self::META) {
            out |= MOD_WIN;
        }
        out
    }

    /// Build from a Win32 `MOD_*` mask; unknown bits (e.g. `MOD_NOREPEAT`) are ignored.
    pub fn from_win32(mask: u32) -> Self {
        let mut out = Self::empty();
        if mask & MOD_ALT != 0 {
            out |= Self::ALT;
        }
        if mask & MOD_CONTROL != 0 {
            out |= Self::CONTROL;
        }
        if mask & MOD_SHIFT != 0 {
            out |= Self::SHIFT;
        }
        if mask & MOD_WIN != 0 {
            out |= Self::META;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifier_specs() {
        assert_eq!(Modifiers::from_spec("Ctrl"), Some(Modifiers::CONTROL));
        assert_eq!(Modifiers::from_spec("option"), Some(Modifiers::ALT));
        assert_eq!(Modifiers::from_spec("super"), Some(Modifiers::META));
        assert_eq!(Modifiers::from_spec("t"), None);

        assert_eq!(Modifiers::META.to_spec(), Some("win"));
        assert_eq!((Modifiers::CONTROL | Modifiers::ALT).to_spec(), None);
    }

    #[test]
    fn win32_mask_roundtrip() {
        let all = Modifiers::all();
        assert_eq!(all.to_win32(), 0x000F);
        assert_eq!(Modifiers::from_win32(all.to_win32()), all);
        // MOD_NOREPEAT is not a modifier.
        assert_eq!(Modifiers::from_win32(0x4000 | 0x0002), Modifiers::CONTROL);
    }
}
