//! Latched modifier state for the tracked keyboard
//!
//! A [`ModifierState`] lives exactly as long as one interception session. It
//! is never persisted: after a reload the physical keys' real state is
//! unknown, and the next down/up the keyboard delivers brings it back in sync.
//! Strokes forwarded while mapping is disabled are still observed, so a
//! trigger released in that window is not left latched.

use crate::scancode::{KeyState, SC_LALT, SC_LCTRL, SC_LSHIFT};

/// Held/released state of the combo trigger and the physical modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    /// Virtual combo modifier, latched by physical Ctrl or F13
    pub combo_down: bool,
    pub ctrl_down: bool,
    pub shift_down: bool,
    pub alt_down: bool,
}

impl ModifierState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition of a combo-trigger key.
    pub fn observe_combo(&mut self, state: KeyState) {
        self.combo_down = !state.is_up();
    }

    /// Record a transition of any key; only Ctrl, Shift and Alt codes matter.
    ///
    /// Returns `true` if `code` was one of the tracked modifiers.
    pub fn observe(&mut self, code: u16, state: KeyState) -> bool {
        let held = !state.is_up();
        match code {
            SC_LCTRL => self.ctrl_down = held,
            SC_LSHIFT => self.shift_down = held,
            SC_LALT => self.alt_down = held,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scancode::{SC_A, SC_CAPSLOCK};

    #[test]
    fn test_starts_released() {
        let state = ModifierState::new();
        assert!(!state.combo_down);
        assert!(!state.ctrl_down);
        assert!(!state.shift_down);
        assert!(!state.alt_down);
    }

    #[test]
    fn test_observe_press_and_release() {
        let mut state = ModifierState::new();

        assert!(state.observe(SC_LSHIFT, KeyState::Down));
        assert!(state.shift_down);
        assert!(state.observe(SC_LALT, KeyState::Down));
        assert!(state.alt_down);

        state.observe(SC_LSHIFT, KeyState::Up);
        assert!(!state.shift_down);
        assert!(state.alt_down, "other modifiers are untouched");
    }

    #[test]
    fn test_repeat_down_is_idempotent() {
        let mut state = ModifierState::new();
        state.observe(SC_LCTRL, KeyState::Down);
        state.observe(SC_LCTRL, KeyState::Down);
        assert!(state.ctrl_down);
        state.observe(SC_LCTRL, KeyState::Up);
        assert!(!state.ctrl_down);
    }

    #[test]
    fn test_non_modifiers_ignored() {
        let mut state = ModifierState::new();
        assert!(!state.observe(SC_A, KeyState::Down));
        assert!(!state.observe(SC_CAPSLOCK, KeyState::Down));
        assert_eq!(state, ModifierState::default());
    }

    #[test]
    fn test_combo_latch_is_independent_of_ctrl() {
        let mut state = ModifierState::new();
        state.observe_combo(KeyState::Down);
        assert!(state.combo_down);
        assert!(!state.ctrl_down);
        state.observe_combo(KeyState::Up);
        assert!(!state.combo_down);
    }
}
