//! Key translation engine
//!
//! # Dispatch
//!
//! Every stroke from the tracked keyboard goes through [`Remapper::process`],
//! which walks the rules below top to bottom and stops at the first match.
//! The order is part of the contract: moving a rule changes behaviour.
//!
//! ```text
//!   stroke
//!     │
//!     ▼
//!  1. CapsLock? ───────────── yes ──► rewrite code to LCtrl, continue
//!     │
//!     ▼
//!  2. original code LCtrl/F13? ─ yes ──► latch combo_down, CONSUME
//!     │
//!     ▼
//!  3. track Ctrl / Shift / Alt (rewritten code)
//!     │
//!     ▼
//!  4. combo_down && code in table? ─ yes ──► IME key: INJECT
//!     │                                      else:    SEND one stroke
//!     ▼
//!  5. alt_down && key down && shortcut? ─ yes ──► SEND macro batch
//!     │
//!     ▼
//!  6. PASSTHROUGH (with the CapsLock rewrite applied)
//! ```
//!
//! ## Notes
//!
//! - Physical Ctrl never reaches the output. CapsLock takes over its role,
//!   so downstream CapsLock looks exactly like a physical Ctrl.
//! - Rule 2 tests the code *before* the rewrite, so CapsLock does not latch
//!   the combo modifier.
//! - Codes are compared without the extended flag. Right Ctrl (`E0 1D`)
//!   therefore latches the combo like left Ctrl, and right Alt counts as Alt.
//! - Key repeat arrives as repeated downs and re-triggers the same rule each
//!   time.

use std::collections::HashMap;

use crate::injector::VirtualKey;
use crate::macros::{select_word, Direction, WordMotion};
use crate::modifiers::ModifierState;
use crate::scancode::*;

// ============================================================================
// Remap table
// ============================================================================

/// What a combo-layer key turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapTarget {
    /// Emit this scancode through the session
    Key { code: u16, extended: bool },
    /// Hand off to the secondary injection path
    Inject(VirtualKey),
}

/// The fixed combo layer, active while the combo modifier is held.
const COMBO_LAYER: &[(u16, RemapTarget)] = &[
    (SC_OPEN_BRACKET, RemapTarget::Key { code: SC_UP, extended: true }),
    (SC_SLASH, RemapTarget::Key { code: SC_DOWN, extended: true }),
    (SC_SEMICOLON, RemapTarget::Key { code: SC_LEFT, extended: true }),
    (SC_QUOTE, RemapTarget::Key { code: SC_RIGHT, extended: true }),
    (SC_1, RemapTarget::Key { code: SC_F1, extended: false }),
    (SC_2, RemapTarget::Key { code: SC_F2, extended: false }),
    (SC_3, RemapTarget::Key { code: SC_F3, extended: false }),
    (SC_4, RemapTarget::Key { code: SC_F4, extended: false }),
    (SC_5, RemapTarget::Key { code: SC_F5, extended: false }),
    (SC_6, RemapTarget::Key { code: SC_F6, extended: false }),
    (SC_7, RemapTarget::Key { code: SC_F7, extended: false }),
    (SC_8, RemapTarget::Key { code: SC_F8, extended: false }),
    (SC_9, RemapTarget::Key { code: SC_F9, extended: false }),
    (SC_0, RemapTarget::Key { code: SC_F10, extended: false }),
    (SC_MINUS, RemapTarget::Key { code: SC_F11, extended: false }),
    (SC_EQUAL, RemapTarget::Key { code: SC_F12, extended: false }),
    (SC_F, RemapTarget::Inject(VirtualKey::ImeOff)),
    (SC_J, RemapTarget::Inject(VirtualKey::ImeOn)),
    (SC_K, RemapTarget::Key { code: SC_HOME, extended: true }),
    (SC_COMMA, RemapTarget::Key { code: SC_END, extended: true }),
    (SC_L, RemapTarget::Key { code: SC_PGUP, extended: true }),
    (SC_PERIOD, RemapTarget::Key { code: SC_PGDN, extended: true }),
];

/// Immutable source-scancode → target mapping.
#[derive(Debug, Clone)]
pub struct RemapTable {
    entries: HashMap<u16, RemapTarget>,
}

impl RemapTable {
    /// Build the fixed combo layer.
    pub fn combo_layer() -> Self {
        Self {
            entries: COMBO_LAYER.iter().copied().collect(),
        }
    }

    pub fn get(&self, code: u16) -> Option<RemapTarget> {
        self.entries.get(&code).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Codes that latch the combo modifier instead of producing output.
pub fn is_combo_trigger(code: u16) -> bool {
    code == SC_LCTRL || code == SC_F13
}

// ============================================================================
// Alt shortcuts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AltShortcut {
    Motion(WordMotion),
    SelectWord,
}

/// Alt-layer lookup for a key-down, checked in priority order.
fn alt_shortcut(code: u16, shift_down: bool) -> Option<AltShortcut> {
    if shift_down {
        match code {
            SC_SEMICOLON => return Some(AltShortcut::Motion(WordMotion::select(Direction::Left))),
            SC_QUOTE => return Some(AltShortcut::Motion(WordMotion::select(Direction::Right))),
            SC_ENTER => return Some(AltShortcut::SelectWord),
            _ => {}
        }
    }
    match code {
        SC_SEMICOLON => Some(AltShortcut::Motion(WordMotion::jump(Direction::Left))),
        SC_QUOTE => Some(AltShortcut::Motion(WordMotion::jump(Direction::Right))),
        _ => None,
    }
}

// ============================================================================
// Remapper
// ============================================================================

/// Outcome of translating one stroke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    /// Swallowed; nothing is emitted
    Consumed,
    /// Forward the stroke, possibly with its code rewritten
    Passthrough(KeyStroke),
    /// Emit these strokes through the session in one call
    Send(Vec<KeyStroke>),
    /// Emit through the secondary injection path
    Inject(VirtualKey, KeyState),
}

/// Per-session translation state machine.
///
/// Borrow the table from the owner; the remapper's only mutable state is its
/// [`ModifierState`], which starts empty for every session.
pub struct Remapper<'a> {
    table: &'a RemapTable,
    modifiers: ModifierState,
    debug_keys: bool,
}

impl<'a> Remapper<'a> {
    pub fn new(table: &'a RemapTable, debug_keys: bool) -> Self {
        Self {
            table,
            modifiers: ModifierState::new(),
            debug_keys,
        }
    }

    pub fn modifiers(&self) -> &ModifierState {
        &self.modifiers
    }

    /// Translate one stroke from the tracked keyboard.
    pub fn process(&mut self, mut stroke: KeyStroke) -> Translation {
        let original_code = stroke.code;
        let state = stroke.state;

        self.log_received(&stroke);

        if original_code == SC_CAPSLOCK {
            stroke.code = SC_LCTRL;
            self.debug(format_args!("map CapsLock->LCTRL {}", stroke));
        }

        if is_combo_trigger(original_code) {
            self.modifiers.observe_combo(state);
            self.debug(format_args!(
                "set combo_down={} (from 0x{:02X})",
                self.modifiers.combo_down, original_code
            ));
            return Translation::Consumed;
        }

        let code = stroke.code;
        self.modifiers.observe(code, state);

        if self.modifiers.combo_down {
            if let Some(target) = self.table.get(code) {
                return self.translate_combo(code, state, target);
            }
        }

        if self.modifiers.alt_down && state == KeyState::Down {
            if let Some(shortcut) = alt_shortcut(code, self.modifiers.shift_down) {
                let strokes = match shortcut {
                    AltShortcut::Motion(motion) => motion.strokes(&self.modifiers),
                    AltShortcut::SelectWord => select_word(&self.modifiers),
                };
                self.debug(format_args!(
                    "alt shortcut src=0x{:02X} -> {:?} ({} strokes)",
                    code,
                    shortcut,
                    strokes.len()
                ));
                return Translation::Send(strokes);
            }
        }

        Translation::Passthrough(stroke)
    }

    /// Track a stroke that is being forwarded untranslated.
    ///
    /// Used while mapping is disabled so a modifier released in that window
    /// does not stay latched. The CapsLock rewrite is not applied because the
    /// output saw CapsLock.
    pub fn observe(&mut self, stroke: &KeyStroke) {
        if is_combo_trigger(stroke.code) {
            self.modifiers.observe_combo(stroke.state);
        } else {
            self.modifiers.observe(stroke.code, stroke.state);
        }
    }

    fn translate_combo(&self, code: u16, state: KeyState, target: RemapTarget) -> Translation {
        match target {
            RemapTarget::Inject(key) => {
                self.debug(format_args!(
                    "combo src=0x{:02X} -> {:?} up={}",
                    code,
                    key,
                    state.is_up()
                ));
                Translation::Inject(key, state)
            }
            RemapTarget::Key {
                code: target_code,
                extended,
            } => {
                let remapped = KeyStroke {
                    code: target_code,
                    state,
                    extended,
                    information: 0,
                };
                self.debug(format_args!(
                    "combo src=0x{:02X} -> dst=0x{:02X} up={}",
                    code,
                    target_code,
                    state.is_up()
                ));
                Translation::Send(vec![remapped])
            }
        }
    }

    fn log_received(&self, stroke: &KeyStroke) {
        if !self.debug_keys {
            return;
        }
        if matches!(stroke.code, SC_CAPSLOCK | SC_LCTRL | SC_F13 | SC_A) {
            tracing::info!(
                target: "combo_remap::keys",
                "recv code=0x{:02X} ext={} info=0x{:08X} up={} combo_down={} ctrl_down={}",
                stroke.code,
                stroke.extended,
                stroke.information,
                stroke.state.is_up(),
                self.modifiers.combo_down,
                self.modifiers.ctrl_down
            );
        }
    }

    fn debug(&self, message: std::fmt::Arguments<'_>) {
        if self.debug_keys {
            tracing::info!(target: "combo_remap::keys", "{}", message);
        }
    }
}
