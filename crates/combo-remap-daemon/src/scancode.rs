//! PC Set 1 scancodes and the keystroke record exchanged with the session
//!
//! Every code the remap policy touches is listed here. The evdev backend
//! converts between Linux key codes and `(code, extended)` pairs with
//! [`to_evdev_key`] / [`from_evdev_key`].

use std::fmt;

use evdev::Key;

pub const SC_F13: u16 = 0x64;
pub const SC_LCTRL: u16 = 0x1D;
pub const SC_LSHIFT: u16 = 0x2A;
pub const SC_LALT: u16 = 0x38;
pub const SC_CAPSLOCK: u16 = 0x3A;
pub const SC_ENTER: u16 = 0x1C;
pub const SC_OPEN_BRACKET: u16 = 0x1A;
pub const SC_SLASH: u16 = 0x35;
pub const SC_SEMICOLON: u16 = 0x27;
pub const SC_QUOTE: u16 = 0x28;
pub const SC_1: u16 = 0x02;
pub const SC_2: u16 = 0x03;
pub const SC_3: u16 = 0x04;
pub const SC_4: u16 = 0x05;
pub const SC_5: u16 = 0x06;
pub const SC_6: u16 = 0x07;
pub const SC_7: u16 = 0x08;
pub const SC_8: u16 = 0x09;
pub const SC_9: u16 = 0x0A;
pub const SC_0: u16 = 0x0B;
pub const SC_MINUS: u16 = 0x0C;
pub const SC_EQUAL: u16 = 0x0D;
pub const SC_F: u16 = 0x21;
pub const SC_J: u16 = 0x24;
pub const SC_K: u16 = 0x25;
pub const SC_L: u16 = 0x26;
pub const SC_COMMA: u16 = 0x33;
pub const SC_PERIOD: u16 = 0x34;
pub const SC_A: u16 = 0x1E;

pub const SC_F1: u16 = 0x3B;
pub const SC_F2: u16 = 0x3C;
pub const SC_F3: u16 = 0x3D;
pub const SC_F4: u16 = 0x3E;
pub const SC_F5: u16 = 0x3F;
pub const SC_F6: u16 = 0x40;
pub const SC_F7: u16 = 0x41;
pub const SC_F8: u16 = 0x42;
pub const SC_F9: u16 = 0x43;
pub const SC_F10: u16 = 0x44;
pub const SC_F11: u16 = 0x57;
pub const SC_F12: u16 = 0x58;

// Extended (E0) navigation cluster
pub const SC_UP: u16 = 0x48;
pub const SC_DOWN: u16 = 0x50;
pub const SC_LEFT: u16 = 0x4B;
pub const SC_RIGHT: u16 = 0x4D;
pub const SC_HOME: u16 = 0x47;
pub const SC_END: u16 = 0x4F;
pub const SC_PGUP: u16 = 0x49;
pub const SC_PGDN: u16 = 0x51;

// JIS conversion keys
pub const SC_CONVERT: u16 = 0x79;
pub const SC_NONCONVERT: u16 = 0x7B;

/// Direction of a key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    Down,
    Up,
}

impl KeyState {
    pub fn is_up(self) -> bool {
        self == KeyState::Up
    }
}

/// Index of an input device within an interception session.
///
/// Keyboards are numbered from 1 in the order the session discovered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One physical (or synthetic) key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    /// Set 1 scancode without the E0 prefix
    pub code: u16,
    pub state: KeyState,
    /// E0 prefix present
    pub extended: bool,
    /// Driver-supplied auxiliary word, forwarded untouched on passthrough
    pub information: u32,
}

impl KeyStroke {
    pub fn new(code: u16, state: KeyState) -> Self {
        Self {
            code,
            state,
            extended: false,
            information: 0,
        }
    }

    pub fn extended(code: u16, state: KeyState) -> Self {
        Self {
            extended: true,
            ..Self::new(code, state)
        }
    }

    pub fn down(code: u16) -> Self {
        Self::new(code, KeyState::Down)
    }

    pub fn up(code: u16) -> Self {
        Self::new(code, KeyState::Up)
    }
}

impl fmt::Display for KeyStroke {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.extended { "E0 " } else { "" };
        let dir = match self.state {
            KeyState::Down => "down",
            KeyState::Up => "up",
        };
        write!(f, "{}0x{:02X} {}", prefix, self.code, dir)
    }
}

/// (extended Set 1 code, Linux key) pairs outside the identity range
const EXTENDED_KEYS: &[(u16, Key)] = &[
    (0x1C, Key::KEY_KPENTER),
    (0x1D, Key::KEY_RIGHTCTRL),
    (0x35, Key::KEY_KPSLASH),
    (0x37, Key::KEY_SYSRQ),
    (0x38, Key::KEY_RIGHTALT),
    (0x47, Key::KEY_HOME),
    (0x48, Key::KEY_UP),
    (0x49, Key::KEY_PAGEUP),
    (0x4B, Key::KEY_LEFT),
    (0x4D, Key::KEY_RIGHT),
    (0x4F, Key::KEY_END),
    (0x50, Key::KEY_DOWN),
    (0x51, Key::KEY_PAGEDOWN),
    (0x52, Key::KEY_INSERT),
    (0x53, Key::KEY_DELETE),
    (0x5B, Key::KEY_LEFTMETA),
    (0x5C, Key::KEY_RIGHTMETA),
    (0x5D, Key::KEY_COMPOSE),
];

/// (plain Set 1 code, Linux key) pairs above the identity range
const HIGH_KEYS: &[(u16, Key)] = &[
    (0x64, Key::KEY_F13),
    (0x65, Key::KEY_F14),
    (0x66, Key::KEY_F15),
    (0x67, Key::KEY_F16),
    (0x68, Key::KEY_F17),
    (0x69, Key::KEY_F18),
    (0x6A, Key::KEY_F19),
    (0x6B, Key::KEY_F20),
    (0x6C, Key::KEY_F21),
    (0x6D, Key::KEY_F22),
    (0x6E, Key::KEY_F23),
    (0x70, Key::KEY_KATAKANAHIRAGANA),
    (0x73, Key::KEY_RO),
    (0x76, Key::KEY_F24),
    (0x79, Key::KEY_HENKAN),
    (0x7B, Key::KEY_MUHENKAN),
    (0x7D, Key::KEY_YEN),
];

/// Linux codes 1..=88 are numerically equal to their plain Set 1 scancodes.
const IDENTITY_MAX: u16 = 0x58;

/// Convert a Set 1 `(code, extended)` pair into a Linux key.
pub fn to_evdev_key(code: u16, extended: bool) -> Option<Key> {
    if extended {
        return EXTENDED_KEYS
            .iter()
            .find(|(sc, _)| *sc == code)
            .map(|(_, key)| *key);
    }
    if (1..=IDENTITY_MAX).contains(&code) {
        return Some(Key::new(code));
    }
    HIGH_KEYS
        .iter()
        .find(|(sc, _)| *sc == code)
        .map(|(_, key)| *key)
}

/// Convert a Linux key into a Set 1 `(code, extended)` pair.
pub fn from_evdev_key(key: Key) -> Option<(u16, bool)> {
    let code = key.code();
    if (1..=IDENTITY_MAX).contains(&code) {
        return Some((code, false));
    }
    if let Some((sc, _)) = EXTENDED_KEYS.iter().find(|(_, k)| *k == key) {
        return Some((*sc, true));
    }
    HIGH_KEYS
        .iter()
        .find(|(_, k)| *k == key)
        .map(|(sc, _)| (*sc, false))
}
