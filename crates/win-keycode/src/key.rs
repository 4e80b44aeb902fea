use std::fmt;

// Central table: variant, Win32 virtual key code, canonical spec string.
// Aliases accepted only while parsing live in `from_spec`.
macro_rules! keys {
    ( $( $k:ident = $vk:expr => $spec:expr, )* ) => {
        /// Non-modifier keys that can anchor a global hotkey.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Key {
            $(
                #[allow(missing_docs)]
                $k = $vk,
            )*
        }

        impl Key {
            /// Every key known to this crate, in virtual key code order.
            pub const ALL: &'static [Key] = &[ $( Key::$k, )* ];

            /// Canonical lowercase spec string for this key.
            pub fn to_spec(self) -> &'static str {
                match self {
                    $( Key::$k => $spec, )*
                }
            }

            /// Look up a key from its Win32 virtual key code.
            pub fn from_vk(vk: u16) -> Option<Self> {
                match vk {
                    $( v if v == $vk => Some(Key::$k), )*
                    _ => None,
                }
            }

            /// Exact match on the canonical spec string.
            fn from_canonical(s: &str) -> Option<Self> {
                match s {
                    $( $spec => Some(Key::$k), )*
                    _ => None,
                }
            }
        }
    };
}

keys! {
    Backspace = 0x08 => "backspace",
    Tab = 0x09 => "tab",
    Enter = 0x0D => "enter",
    Pause = 0x13 => "pause",
    Escape = 0x1B => "esc",
    Space = 0x20 => "space",
    PageUp = 0x21 => "pageup",
    PageDown = 0x22 => "pagedown",
    End = 0x23 => "end",
    Home = 0x24 => "home",
    Left = 0x25 => "left",
    Up = 0x26 => "up",
    Right = 0x27 => "right",
    Down = 0x28 => "down",
    PrintScreen = 0x2C => "printscreen",
    Insert = 0x2D => "insert",
    Delete = 0x2E => "delete",
    Digit0 = 0x30 => "0",
    Digit1 = 0x31 => "1",
    Digit2 = 0x32 => "2",
    Digit3 = 0x33 => "3",
    Digit4 = 0x34 => "4",
    Digit5 = 0x35 => "5",
    Digit6 = 0x36 => "6",
    Digit7 = 0x37 => "7",
    Digit8 = 0x38 => "8",
    Digit9 = 0x39 => "9",
    A = 0x41 => "a",
    B = 0x42 => "b",
    C = 0x43 => "c",
    D = 0x44 => "d",
    E = 0x45 => "e",
    F = 0x46 => "f",
    G = 0x47 => "g",
    H = 0x48 => "h",
    I = 0x49 => "i",
    J = 0x4A => "j",
    K = 0x4B => "k",
    L = 0x4C => "l",
    M = 0x4D => "m",
    N = 0x4E => "n",
    O = 0x4F => "o",
    P = 0x50 => "p",
    Q = 0x51 => "q",
    R = 0x52 => "r",
    S = 0x53 => "s",
    T = 0x54 => "t",
    U = 0x55 => "u",
    V = 0x56 => "v",
    W = 0x57 => "w",
    X = 0x58 => "x",
    Y = 0x59 => "y",
    Z = 0x5A => "z",
    Numpad0 = 0x60 => "num0",
    Numpad1 = 0x61 => "num1",
    Numpad2 = 0x62 => "num2",
    Numpad3 = 0x63 => "num3",
    Numpad4 = 0x64 => "num4",
    Numpad5 = 0x65 => "num5",
    Numpad6 = 0x66 => "num6",
    Numpad7 = 0x67 => "num7",
    Numpad8 = 0x68 => "num8",
    Numpad9 = 0x69 => "num9",
    F1 = 0x70 => "f1",
    F2 = 0x71 => "f2",
    F3 = 0x72 => "f3",
    F4 = 0x73 => "f4",
    F5 = 0x74 => "f5",
    F6 = 0x75 => "f6",
    F7 = 0x76 => "f7",
    F8 = 0x77 => "f8",
    F9 = 0x78 => "f9",
    F10 = 0x79 => "f10",
    F11 = 0x7A => "f11",
    F12 = 0x7B => "f12",
    F13 = 0x7C => "f13",
    F14 = 0x7D => "f14",
    F15 = 0x7E => "f15",
    F16 = 0x7F => "f16",
    F17 = 0x80 => "f17",
    F18 = 0x81 => "f18",
    F19 = 0x82 => "f19",
    F20 = 0x83 => "f20",
    F21 = 0x84 => "f21",
    F22 = 0x85 => "f22",
    F23 = 0x86 => "f23",
    F24 = 0x87 => "f24",
    Semicolon = 0xBA => ";",
    Equal = 0xBB => "=",
    Comma = 0xBC => ",",
    Minus = 0xBD => "-",
    Period = 0xBE => ".",
    Slash = 0xBF => "/",
    Grave = 0xC0 => "`",
    LeftBracket = 0xDB => "[",
    Backslash = 0xDC => "\\",
    RightBracket = 0xDD => "]",
    Quote = 0xDE => "'",
}

impl Key {
    /// Parse a key spec, case-insensitively.
    ///
    /// Accepts the canonical spec (`t`, `f5`, `space`, `,`) and a handful of
    /// spelled-out aliases (`return`, `escape`, `del`, `comma`, `pgup`, ...).
    pub fn from_spec(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(k) = Self::from_canonical(&lower) {
            return Some(k);
        }
        let alias = match lower.as_str() {
            "return" | "ret" => Self::Enter,
            "escape" => Self::Escape,
            "del" => Self::Delete,
            "ins" => Self::Insert,
            "pgup" => Self::PageUp,
            "pgdn" => Self::PageDown,
            "prtsc" | "print" => Self::PrintScreen,
            "comma" => Self::Comma,
            "period" => Self::Period,
            "slash" => Self::Slash,
            "backslash" => Self::Backslash,
            "minus" => Self::Minus,
            "equal" | "plus" => Self::Equal,
            "semicolon" => Self::Semicolon,
            "quote" => Self::Quote,
            "grave" | "backtick" => Self::Grave,
            "leftbracket" => Self::LeftBracket,
            "rightbracket" => Self::RightBracket,
            "arrowleft" => Self::Left,
            "arrowright" => Self::Right,
            "arrowup" => Self::Up,
            "arrowdown" => Self::Down,
            _ => return None,
        };
        Some(alias)
    }

    /// Win32 virtual key code for this key.
    pub fn vk(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_spec())
    }
}
