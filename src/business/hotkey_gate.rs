//! Push-to-talk hotkey gate
//!
//! Pure state machine over host input edges. The host-level monitor (see
//! `platform::InputMonitor`) delivers raw press/release edges plus
//! modifier-flag changes; the gate turns those into session press/release
//! triggers for the configured combo, and doubles as the capture mode used
//! when the user rebinds the combo.
//!
//! The function key never produces a discrete key-down event. Its press and
//! release are derived from the rising and falling edge of its modifier-flag
//! bit, which is why flag-change events are a separate input variant.

use serde::{Deserialize, Serialize};

/// Virtual keycode of the function key. It only ever appears on flag-change
/// events.
pub const FN_KEYCODE: u16 = 0x3F;

/// Keycodes of bare modifier keys. A capture attempt that lands on one of
/// these is rejected so a lone Shift press cannot become the hotkey.
pub const MODIFIER_KEYCODES: [u16; 8] = [0x36, 0x37, 0x38, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifierSet {
    pub command: bool,
    pub option: bool,
    pub control: bool,
    pub shift: bool,
    pub function: bool,
}

impl ModifierSet {
    pub const EMPTY: Self = Self {
        command: false,
        option: false,
        control: false,
        shift: false,
        function: false,
    };

    /// The chord used for combo matching: everything except the function
    /// bit, which is a key of its own rather than a modifier here.
    fn chord(self) -> Self {
        Self {
            function: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyCombo {
    pub keycode: u16,
    pub modifiers: ModifierSet,
    pub is_fn: bool,
}

impl HotkeyCombo {
    pub const fn fn_key() -> Self {
        Self {
            keycode: FN_KEYCODE,
            modifiers: ModifierSet::EMPTY,
            is_fn: true,
        }
    }

    pub const fn option_space() -> Self {
        Self {
            keycode: 49,
            modifiers: ModifierSet {
                option: true,
                ..ModifierSet::EMPTY
            },
            is_fn: false,
        }
    }

    /// Synthesized press edge for this combo, as the host monitor would
    /// report it. Used by front ends without a real input monitor.
    pub fn press_edge(&self) -> InputEvent {
        if self.is_fn {
            InputEvent::FlagsChanged {
                keycode: FN_KEYCODE,
                modifiers: ModifierSet {
                    function: true,
                    ..ModifierSet::EMPTY
                },
            }
        } else {
            InputEvent::KeyDown {
                keycode: self.keycode,
                modifiers: self.modifiers,
            }
        }
    }

    /// Synthesized release edge for this combo.
    pub fn release_edge(&self) -> InputEvent {
        if self.is_fn {
            InputEvent::FlagsChanged {
                keycode: FN_KEYCODE,
                modifiers: ModifierSet::EMPTY,
            }
        } else {
            InputEvent::KeyUp {
                keycode: self.keycode,
                modifiers: self.modifiers,
            }
        }
    }

    pub fn display_string(&self) -> String {
        if self.is_fn {
            return "fn".to_string();
        }
        let mut parts = String::new();
        if self.modifiers.control {
            parts.push('⌃');
        }
        if self.modifiers.option {
            parts.push('⌥');
        }
        if self.modifiers.shift {
            parts.push('⇧');
        }
        if self.modifiers.command {
            parts.push('⌘');
        }
        parts.push_str(&keycode_name(self.keycode));
        parts
    }
}

impl Default for HotkeyCombo {
    fn default() -> Self {
        Self::fn_key()
    }
}

/// A raw input edge from the host monitor.
#[derive(Debug, Clone, Copy)]
pub enum InputEvent {
    KeyDown { keycode: u16, modifiers: ModifierSet },
    KeyUp { keycode: u16, modifiers: ModifierSet },
    FlagsChanged { keycode: u16, modifiers: ModifierSet },
}

/// What the gate wants done in response to one input edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    None,
    /// The configured combo went down: start a session.
    Press,
    /// The configured combo came up: stop the session.
    Release,
    /// Capture mode bound a new combo.
    Captured(HotkeyCombo),
    /// Capture mode refused the edge (bare modifier).
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Held,
    Listening,
}

#[derive(Debug)]
pub struct HotkeyGate {
    combo: HotkeyCombo,
    state: GateState,
}

impl HotkeyGate {
    pub fn new(combo: HotkeyCombo) -> Self {
        Self {
            combo,
            state: GateState::Idle,
        }
    }

    pub fn combo(&self) -> HotkeyCombo {
        self.combo
    }

    pub fn is_held(&self) -> bool {
        self.state == GateState::Held
    }

    /// Enter capture mode; ordinary matching is suspended until a combo is
    /// captured or capture is cancelled.
    pub fn begin_capture(&mut self) {
        self.state = GateState::Listening;
    }

    pub fn cancel_capture(&mut self) {
        if self.state == GateState::Listening {
            self.state = GateState::Idle;
        }
    }

    pub fn set_combo(&mut self, combo: HotkeyCombo) {
        self.combo = combo;
        self.state = GateState::Idle;
    }

    pub fn handle(&mut self, event: InputEvent) -> GateAction {
        match self.state {
            GateState::Listening => self.handle_capture(event),
            GateState::Idle | GateState::Held => self.handle_match(event),
        }
    }

    fn handle_capture(&mut self, event: InputEvent) -> GateAction {
        match event {
            InputEvent::FlagsChanged { keycode, modifiers }
                if modifiers.function && keycode == FN_KEYCODE =>
            {
                self.combo = HotkeyCombo::fn_key();
                self.state = GateState::Idle;
                GateAction::Captured(self.combo)
            }
            InputEvent::KeyDown { keycode, modifiers } => {
                if MODIFIER_KEYCODES.contains(&keycode) {
                    return GateAction::Rejected;
                }
                self.combo = HotkeyCombo {
                    keycode,
                    modifiers: modifiers.chord(),
                    is_fn: false,
                };
                self.state = GateState::Idle;
                GateAction::Captured(self.combo)
            }
            _ => GateAction::None,
        }
    }

    fn handle_match(&mut self, event: InputEvent) -> GateAction {
        if self.combo.is_fn {
            // Only the flag edge carries the function key.
            if let InputEvent::FlagsChanged { modifiers, .. } = event {
                let pressed = modifiers.function;
                if pressed && self.state == GateState::Idle {
                    self.state = GateState::Held;
                    return GateAction::Press;
                }
                if !pressed && self.state == GateState::Held {
                    self.state = GateState::Idle;
                    return GateAction::Release;
                }
            }
            return GateAction::None;
        }

        match event {
            InputEvent::KeyDown { keycode, modifiers }
                if keycode == self.combo.keycode
                    && modifiers.chord() == self.combo.modifiers
                    && self.state == GateState::Idle =>
            {
                self.state = GateState::Held;
                GateAction::Press
            }
            InputEvent::KeyUp { keycode, modifiers }
                if keycode == self.combo.keycode
                    && modifiers.chord() == self.combo.modifiers
                    && self.state == GateState::Held =>
            {
                self.state = GateState::Idle;
                GateAction::Release
            }
            _ => GateAction::None,
        }
    }
}

/// Display name for a virtual keycode, ANSI layout.
pub fn keycode_name(keycode: u16) -> String {
    let name = match keycode {
        0 => "A",
        1 => "S",
        2 => "D",
        3 => "F",
        4 => "H",
        5 => "G",
        6 => "Z",
        7 => "X",
        8 => "C",
        9 => "V",
        11 => "B",
        12 => "Q",
        13 => "W",
        14 => "E",
        15 => "R",
        16 => "Y",
        17 => "T",
        18 => "1",
        19 => "2",
        20 => "3",
        21 => "4",
        22 => "6",
        23 => "5",
        24 => "=",
        25 => "9",
        26 => "7",
        27 => "-",
        28 => "8",
        29 => "0",
        30 => "]",
        31 => "O",
        32 => "U",
        33 => "[",
        34 => "I",
        35 => "P",
        36 => "↩",
        37 => "L",
        38 => "J",
        39 => "'",
        40 => "K",
        41 => ";",
        42 => "\\",
        43 => ",",
        44 => "/",
        45 => "N",
        46 => "M",
        47 => ".",
        48 => "⇥",
        49 => "Space",
        50 => "`",
        51 => "⌫",
        53 => "⎋",
        63 => "fn",
        96 => "F5",
        97 => "F6",
        98 => "F7",
        99 => "F3",
        100 => "F8",
        101 => "F9",
        103 => "F11",
        105 => "F13",
        107 => "F14",
        109 => "F10",
        111 => "F12",
        113 => "F15",
        118 => "F4",
        119 => "F2",
        120 => "F1",
        123 => "←",
        124 => "→",
        125 => "↓",
        126 => "↑",
        other => return format!("Key{other}"),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(function: bool) -> InputEvent {
        InputEvent::FlagsChanged {
            keycode: FN_KEYCODE,
            modifiers: ModifierSet {
                function,
                ..ModifierSet::EMPTY
            },
        }
    }

    #[test]
    fn fn_combo_follows_flag_bit_edges() {
        let mut gate = HotkeyGate::new(HotkeyCombo::fn_key());

        assert_eq!(gate.handle(flags(true)), GateAction::Press);
        assert!(gate.is_held());
        // Repeated flag events with the bit still set are not new presses.
        assert_eq!(gate.handle(flags(true)), GateAction::None);
        assert_eq!(gate.handle(flags(false)), GateAction::Release);
        assert!(!gate.is_held());
        assert_eq!(gate.handle(flags(false)), GateAction::None);
    }

    #[test]
    fn regular_combo_requires_keycode_and_exact_chord() {
        let mut gate = HotkeyGate::new(HotkeyCombo::option_space());
        let option = ModifierSet {
            option: true,
            ..ModifierSet::EMPTY
        };

        // Wrong chord: no match, not a partial hold.
        assert_eq!(
            gate.handle(InputEvent::KeyDown {
                keycode: 49,
                modifiers: ModifierSet::EMPTY
            }),
            GateAction::None
        );
        assert_eq!(
            gate.handle(InputEvent::KeyDown { keycode: 49, modifiers: option }),
            GateAction::Press
        );
        assert_eq!(
            gate.handle(InputEvent::KeyUp { keycode: 49, modifiers: option }),
            GateAction::Release
        );
    }

    #[test]
    fn bare_modifier_press_is_ignored_in_match_mode() {
        let mut gate = HotkeyGate::new(HotkeyCombo::option_space());
        let shift = ModifierSet {
            shift: true,
            ..ModifierSet::EMPTY
        };
        assert_eq!(
            gate.handle(InputEvent::KeyDown { keycode: 0x38, modifiers: shift }),
            GateAction::None
        );
        assert!(!gate.is_held());
    }

    #[test]
    fn capture_rejects_bare_modifiers_and_stays_listening() {
        let mut gate = HotkeyGate::new(HotkeyCombo::fn_key());
        gate.begin_capture();

        assert_eq!(
            gate.handle(InputEvent::KeyDown {
                keycode: 0x36,
                modifiers: ModifierSet::EMPTY
            }),
            GateAction::Rejected
        );

        let combo = HotkeyCombo {
            keycode: 9,
            modifiers: ModifierSet {
                command: true,
                shift: true,
                ..ModifierSet::EMPTY
            },
            is_fn: false,
        };
        assert_eq!(
            gate.handle(InputEvent::KeyDown {
                keycode: 9,
                modifiers: combo.modifiers
            }),
            GateAction::Captured(combo)
        );
        assert_eq!(gate.combo(), combo);
    }

    #[test]
    fn capture_binds_fn_from_its_flag_edge() {
        let mut gate = HotkeyGate::new(HotkeyCombo::option_space());
        gate.begin_capture();
        assert_eq!(
            gate.handle(flags(true)),
            GateAction::Captured(HotkeyCombo::fn_key())
        );
        // Back in match mode, the next rising edge is a press.
        assert_eq!(gate.handle(flags(true)), GateAction::Press);
    }

    #[test]
    fn display_strings() {
        assert_eq!(HotkeyCombo::fn_key().display_string(), "fn");
        assert_eq!(HotkeyCombo::option_space().display_string(), "⌥Space");
        let combo = HotkeyCombo {
            keycode: 9,
            modifiers: ModifierSet {
                command: true,
                shift: true,
                ..ModifierSet::EMPTY
            },
            is_fn: false,
        };
        assert_eq!(combo.display_string(), "⇧⌘V");
    }
}
