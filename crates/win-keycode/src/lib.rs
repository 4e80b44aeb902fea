//! win-keycode: Virtual key codes and chord specs for Windows hotkeys.
//!
//! - `Key`: the non-modifier keys a global hotkey can bind, `repr(u16)` with
//!   the Win32 `VK_*` value as discriminant.
//! - `Modifiers`: bitmask of Ctrl/Shift/Alt/Meta, convertible to the
//!   `MOD_*` flags accepted by `RegisterHotKey`.
//! - `Chord`: a modifier set plus one key, parsed from specs such as
//!   `ctrl+shift+t` and rendered in a canonical order.

mod key;
pub use key::Key;

mod modifiers;
pub use modifiers::Modifiers;

mod chord;
pub use chord::{Chord, ParseError};
