//! Virtual keyboards and the secondary injection path
//!
//! [`VirtualKeyboard`] wraps a uinput device and is the output half of the
//! evdev session. The IME toggles do not go through the session at all: they
//! are sent by a process-wide [`KeyInjector`] that tags every event with
//! [`INJECTED_MARKER`] so downstream tooling can tell them from hardware input.

use std::sync::Mutex;

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, BusType, InputEvent, InputId, Key};

use crate::scancode::{to_evdev_key, KeyState, SC_CONVERT, SC_NONCONVERT};

/// Marker attached to everything the secondary path injects.
pub const INJECTED_MARKER: usize = 0x11;

/// Prefix shared by every uinput device this daemon creates.
///
/// Sessions skip devices with this prefix so output is never re-intercepted.
pub const DEVICE_NAME_PREFIX: &str = "combo-remap";

/// A virtual input device for injecting events
pub struct VirtualKeyboard {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualKeyboard {
    /// Create a new virtual keyboard device
    pub fn new(name: &str, id: Option<InputId>) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();

        // Add all standard keys
        for code in 0..256u16 {
            keys.insert(Key::new(code));
        }

        let mut builder = VirtualDeviceBuilder::new()?.name(name);
        if let Some(id) = id {
            builder = builder.input_id(id);
        }
        let device = builder.with_keys(&keys)?.build()?;

        Ok(Self { device })
    }

    /// Emit an input event batch in a single write
    pub fn emit(&mut self, events: &[InputEvent]) -> Result<()> {
        self.device.emit(events)?;
        Ok(())
    }

    /// Send a single key transition
    pub fn send_key(&mut self, key: Key, value: i32) -> Result<()> {
        let event = InputEvent::new(evdev::EventType::KEY, key.code(), value);
        let syn = InputEvent::new(evdev::EventType::SYNCHRONIZATION, 0, 0);
        self.emit(&[event, syn])
    }
}

/// The two fixed targets of the secondary injection path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKey {
    ImeOn,
    ImeOff,
}

impl VirtualKey {
    /// Windows virtual-key code, kept for diagnostics
    pub fn code(self) -> u8 {
        match self {
            VirtualKey::ImeOn => 0x16,
            VirtualKey::ImeOff => 0x1A,
        }
    }

    /// Scancode used when layout resolution has no entry for this key.
    ///
    /// These values come from a US layout where the IME keys have no
    /// physical scancode; other layouts may need different constants.
    pub fn fallback_scancode(self) -> u16 {
        match self {
            VirtualKey::ImeOn => SC_CONVERT,
            VirtualKey::ImeOff => SC_NONCONVERT,
        }
    }
}

/// A fully resolved event for the injection facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedKey {
    pub key: VirtualKey,
    pub state: KeyState,
    pub scancode: u16,
    pub extra_info: usize,
}

/// Process-wide input injection facility.
pub trait KeyInjector: Send + Sync {
    /// Resolve a virtual key to a physical scancode, if the layout knows one.
    fn map_virtual_key(&self, key: VirtualKey) -> Option<u16>;

    /// Inject one event and return how many events were accepted.
    fn send_input(&self, input: &InjectedKey) -> usize;
}

/// Inject `key` through the secondary path.
///
/// Failures are logged when `debug_keys` is set and otherwise ignored; a
/// single missed IME toggle does not justify disturbing the session.
pub fn send_virtual_key(
    injector: &dyn KeyInjector,
    key: VirtualKey,
    state: KeyState,
    debug_keys: bool,
) -> bool {
    let scancode = injector
        .map_virtual_key(key)
        .unwrap_or_else(|| key.fallback_scancode());

    let input = InjectedKey {
        key,
        state,
        scancode,
        extra_info: INJECTED_MARKER,
    };

    let sent = injector.send_input(&input);
    if sent != 1 {
        if debug_keys {
            tracing::warn!(
                target: "combo_remap::keys",
                "Injection failed: sent={} vk=0x{:02X} scancode=0x{:02X} up={}",
                sent,
                key.code(),
                scancode,
                state.is_up()
            );
        }
        return false;
    }
    true
}

/// Injection facility backed by a dedicated uinput keyboard.
///
/// The device's input id carries [`INJECTED_MARKER`] as its version so the
/// daemon's signature is visible to anything that inspects input devices.
pub struct UinputInjector {
    keyboard: Mutex<VirtualKeyboard>,
}

impl UinputInjector {
    pub fn new() -> Result<Self> {
        let id = InputId::new(BusType::BUS_VIRTUAL, 0, 0, INJECTED_MARKER as u16);
        let name = format!("{} injector", DEVICE_NAME_PREFIX);
        let keyboard = VirtualKeyboard::new(&name, Some(id))?;
        tracing::info!("Created injection device '{}'", name);
        Ok(Self {
            keyboard: Mutex::new(keyboard),
        })
    }
}

impl KeyInjector for UinputInjector {
    fn map_virtual_key(&self, _key: VirtualKey) -> Option<u16> {
        // The uinput keymap has no scancode for the IME virtual keys
        None
    }

    fn send_input(&self, input: &InjectedKey) -> usize {
        let Some(key) = to_evdev_key(input.scancode, false) else {
            return 0;
        };
        let value = if input.state.is_up() { 0 } else { 1 };

        let Ok(mut keyboard) = self.keyboard.lock() else {
            return 0;
        };
        match keyboard.send_key(key, value) {
            Ok(()) => 1,
            Err(e) => {
                tracing::debug!("uinput injection failed: {:#}", e);
                0
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records every injected key; optionally resolves scancodes or fails.
    #[derive(Default)]
    pub struct RecordingInjector {
        pub sent: Mutex<Vec<InjectedKey>>,
        pub layout: Option<u16>,
        pub fail: bool,
    }

    impl RecordingInjector {
        pub fn sent(&self) -> Vec<InjectedKey> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl KeyInjector for RecordingInjector {
        fn map_virtual_key(&self, _key: VirtualKey) -> Option<u16> {
            self.layout
        }

        fn send_input(&self, input: &InjectedKey) -> usize {
            if self.fail {
                return 0;
            }
            self.sent.lock().unwrap().push(*input);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingInjector;
    use super::*;

    #[test]
    fn test_fallback_scancodes() {
        assert_eq!(VirtualKey::ImeOn.fallback_scancode(), SC_CONVERT);
        assert_eq!(VirtualKey::ImeOff.fallback_scancode(), SC_NONCONVERT);
    }

    #[test]
    fn test_send_uses_fallback_when_unresolved() {
        let injector = RecordingInjector::default();
        assert!(send_virtual_key(&injector, VirtualKey::ImeOff, KeyState::Down, true));

        let sent = injector.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, VirtualKey::ImeOff);
        assert_eq!(sent[0].scancode, 0x7B);
        assert_eq!(sent[0].state, KeyState::Down);
    }

    #[test]
    fn test_send_prefers_resolved_scancode() {
        let injector = RecordingInjector {
            layout: Some(0x70),
            ..Default::default()
        };
        send_virtual_key(&injector, VirtualKey::ImeOn, KeyState::Up, false);
        assert_eq!(injector.sent()[0].scancode, 0x70);
    }

    #[test]
    fn test_send_tags_marker() {
        let injector = RecordingInjector::default();
        send_virtual_key(&injector, VirtualKey::ImeOn, KeyState::Down, false);
        assert_eq!(injector.sent()[0].extra_info, 0x11);
    }

    #[test]
    fn test_send_failure_is_reported_not_raised() {
        let injector = RecordingInjector {
            fail: true,
            ..Default::default()
        };
        assert!(!send_virtual_key(&injector, VirtualKey::ImeOn, KeyState::Down, true));
        assert!(!send_virtual_key(&injector, VirtualKey::ImeOn, KeyState::Up, false));
        assert!(injector.sent().is_empty());
    }

    #[test]
    fn test_virtual_key_codes() {
        assert_eq!(VirtualKey::ImeOn.code(), 0x16);
        assert_eq!(VirtualKey::ImeOff.code(), 0x1A);
    }
}
