//! Synthetic key sequences for word motion and the compound selection macro
//!
//! Sequences are returned as one ordered batch so the caller can hand them to
//! the session in a single `send`; no physical event can land in the middle.
//!
//! Modifiers the user is already physically holding are never pressed or
//! released synthetically. Emitting a redundant down/up pair for them would
//! release the key underneath the user's finger.

use crate::modifiers::ModifierState;
use crate::scancode::{KeyState, KeyStroke, SC_LCTRL, SC_LEFT, SC_LSHIFT, SC_RIGHT};

/// Horizontal direction of a word motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    fn arrow(self) -> u16 {
        match self {
            Direction::Left => SC_LEFT,
            Direction::Right => SC_RIGHT,
        }
    }
}

/// An arrow tap wrapped in optional Ctrl and Shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordMotion {
    pub ctrl: bool,
    pub shift: bool,
    pub direction: Direction,
}

impl WordMotion {
    /// Ctrl+Arrow: move one word.
    pub fn jump(direction: Direction) -> Self {
        Self {
            ctrl: true,
            shift: false,
            direction,
        }
    }

    /// Ctrl+Shift+Arrow: extend the selection by one word.
    pub fn select(direction: Direction) -> Self {
        Self {
            ctrl: true,
            shift: true,
            direction,
        }
    }

    /// Append this motion's strokes to `out`.
    ///
    /// Presses go Ctrl then Shift, releases go in reverse, and the arrow is
    /// always sent with the extended flag.
    pub fn append_to(&self, out: &mut Vec<KeyStroke>, held: &ModifierState) {
        let press_ctrl = self.ctrl && !held.ctrl_down;
        let press_shift = self.shift && !held.shift_down;

        if press_ctrl {
            out.push(KeyStroke::down(SC_LCTRL));
        }
        if press_shift {
            out.push(KeyStroke::down(SC_LSHIFT));
        }

        let arrow = self.direction.arrow();
        out.push(KeyStroke::extended(arrow, KeyState::Down));
        out.push(KeyStroke::extended(arrow, KeyState::Up));

        if press_shift {
            out.push(KeyStroke::up(SC_LSHIFT));
        }
        if press_ctrl {
            out.push(KeyStroke::up(SC_LCTRL));
        }
    }

    pub fn strokes(&self, held: &ModifierState) -> Vec<KeyStroke> {
        let mut out = Vec::with_capacity(6);
        self.append_to(&mut out, held);
        out
    }
}

/// Select the word under the caret: jump left, then select right.
pub fn select_word(held: &ModifierState) -> Vec<KeyStroke> {
    let mut out = Vec::with_capacity(10);
    WordMotion::jump(Direction::Left).append_to(&mut out, held);
    WordMotion::select(Direction::Right).append_to(&mut out, held);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(ctrl: bool, shift: bool) -> ModifierState {
        ModifierState {
            ctrl_down: ctrl,
            shift_down: shift,
            ..ModifierState::default()
        }
    }

    #[test]
    fn test_ctrl_motion_nothing_held() {
        let strokes = WordMotion::jump(Direction::Left).strokes(&held(false, false));
        assert_eq!(
            strokes,
            vec![
                KeyStroke::down(SC_LCTRL),
                KeyStroke::extended(SC_LEFT, KeyState::Down),
                KeyStroke::extended(SC_LEFT, KeyState::Up),
                KeyStroke::up(SC_LCTRL),
            ]
        );
    }

    #[test]
    fn test_ctrl_motion_with_ctrl_held_skips_ctrl_pair() {
        let strokes = WordMotion::jump(Direction::Right).strokes(&held(true, false));
        assert_eq!(
            strokes,
            vec![
                KeyStroke::extended(SC_RIGHT, KeyState::Down),
                KeyStroke::extended(SC_RIGHT, KeyState::Up),
            ]
        );
    }

    #[test]
    fn test_select_motion_nothing_held() {
        let strokes = WordMotion::select(Direction::Left).strokes(&held(false, false));
        assert_eq!(
            strokes,
            vec![
                KeyStroke::down(SC_LCTRL),
                KeyStroke::down(SC_LSHIFT),
                KeyStroke::extended(SC_LEFT, KeyState::Down),
                KeyStroke::extended(SC_LEFT, KeyState::Up),
                KeyStroke::up(SC_LSHIFT),
                KeyStroke::up(SC_LCTRL),
            ]
        );
    }

    #[test]
    fn test_select_motion_with_shift_held() {
        // The Alt+Shift shortcuts always arrive with Shift physically down
        let strokes = WordMotion::select(Direction::Right).strokes(&held(false, true));
        assert_eq!(
            strokes,
            vec![
                KeyStroke::down(SC_LCTRL),
                KeyStroke::extended(SC_RIGHT, KeyState::Down),
                KeyStroke::extended(SC_RIGHT, KeyState::Up),
                KeyStroke::up(SC_LCTRL),
            ]
        );
    }

    #[test]
    fn test_shift_only_motion() {
        let motion = WordMotion {
            ctrl: false,
            shift: true,
            direction: Direction::Left,
        };
        let strokes = motion.strokes(&held(true, false));
        assert_eq!(
            strokes,
            vec![
                KeyStroke::down(SC_LSHIFT),
                KeyStroke::extended(SC_LEFT, KeyState::Down),
                KeyStroke::extended(SC_LEFT, KeyState::Up),
                KeyStroke::up(SC_LSHIFT),
            ]
        );
    }

    #[test]
    fn test_arrows_are_always_extended() {
        for state in [held(false, false), held(true, true)] {
            for stroke in select_word(&state) {
                if stroke.code == SC_LEFT || stroke.code == SC_RIGHT {
                    assert!(stroke.extended);
                } else {
                    assert!(!stroke.extended);
                }
            }
        }
    }

    #[test]
    fn test_select_word_with_shift_held() {
        let strokes = select_word(&held(false, true));
        assert_eq!(
            strokes,
            vec![
                KeyStroke::down(SC_LCTRL),
                KeyStroke::extended(SC_LEFT, KeyState::Down),
                KeyStroke::extended(SC_LEFT, KeyState::Up),
                KeyStroke::up(SC_LCTRL),
                KeyStroke::down(SC_LCTRL),
                KeyStroke::extended(SC_RIGHT, KeyState::Down),
                KeyStroke::extended(SC_RIGHT, KeyState::Up),
                KeyStroke::up(SC_LCTRL),
            ]
        );
    }

    #[test]
    fn test_select_word_nothing_held() {
        let strokes = select_word(&held(false, false));
        assert_eq!(strokes.len(), 10);
        assert_eq!(strokes[4], KeyStroke::down(SC_LCTRL));
        assert_eq!(strokes[5], KeyStroke::down(SC_LSHIFT));
        assert_eq!(strokes[8], KeyStroke::up(SC_LSHIFT));
        assert_eq!(strokes[9], KeyStroke::up(SC_LCTRL));
    }

    #[test]
    fn test_releases_mirror_presses() {
        // Every synthetic down has a matching up later in the batch
        let strokes = select_word(&held(false, false));
        for (i, stroke) in strokes.iter().enumerate() {
            if stroke.state == KeyState::Down {
                assert!(strokes[i + 1..]
                    .iter()
                    .any(|s| s.code == stroke.code && s.state == KeyState::Up));
            }
        }
    }
}
