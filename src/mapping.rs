// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! The mapping table and learn-mode state machine (§4.D). Owned
//! exclusively by the UI/control thread (§5) — never touched from the
//! audio callback.

use crate::action::{is_continuous_by_default, Action, InputEvent};
use crate::config::rgx::SongPad;

/// A single keyboard binding: a literal key name to an action/parameter
/// pair.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBinding {
    pub key: String,
    pub action: Action,
    pub parameter: i32,
}

/// How a MIDI CC binding should be interpreted (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcMode {
    /// Emit the CC's value directly on every message.
    Continuous,
    /// Emit only on rising edge (value >= threshold); the caller treats
    /// this as a button press.
    Threshold { threshold: i32 },
}

/// A single MIDI CC binding.
#[derive(Debug, Clone, PartialEq)]
pub struct CcBinding {
    pub device: String,
    pub cc: u8,
    pub mode: CcMode,
    pub action: Action,
    pub parameter: i32,
}

/// A single MIDI note/pad binding: a physical note on `device` plus the
/// action/parameter it triggers (§3 "Trigger pad config").
#[derive(Debug, Clone, PartialEq)]
pub struct PadBinding {
    pub device: String,
    pub note: u8,
    pub pad_index: i32,
    pub action: Action,
    pub parameter: i32,
}

/// Either an `(action, parameter)` pair or a pad index — the two shapes of
/// learn target (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnTarget {
    Action { action: Action, parameter: i32 },
    Pad { pad_index: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LearnState {
    Idle,
    Armed(LearnTarget),
}

/// Tracks which pad is currently held so a note-off can be matched back to
/// the note-on that triggered it (§9 held-pad latch decision). Only one
/// pad can be physically held per device at a time in this model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeldPad(Option<(u16, i32)>);

impl HeldPad {
    pub fn set(&mut self, device: u16, pad_index: i32) {
        self.0 = Some((device, pad_index));
    }

    /// Clears the latch if `device`/`pad_index` match the currently held
    /// pad, returning whether it matched (the caller dispatches a release
    /// only when it does).
    pub fn clear_if_matches(&mut self, device: u16, pad_index: i32) -> bool {
        if self.0 == Some((device, pad_index)) {
            self.0 = None;
            true
        } else {
            false
        }
    }
}

/// The mapping table: keyboard bindings, CC bindings, pad bindings, and
/// learn-mode state (§4.D).
pub struct MappingTable {
    keys: Vec<KeyBinding>,
    ccs: Vec<CcBinding>,
    pads: Vec<PadBinding>,
    learn: LearnState,
    held_pad: HeldPad,
    dirty: bool,
}

impl MappingTable {
    pub fn new() -> MappingTable {
        MappingTable {
            keys: Vec::new(),
            ccs: Vec::new(),
            pads: Vec::new(),
            learn: LearnState::Idle,
            held_pad: HeldPad::default(),
            dirty: false,
        }
    }

    /// Builds a table from bindings already parsed off disk (§4.J). Not
    /// `dirty` — a freshly loaded table has nothing pending to save.
    pub fn from_bindings(keys: Vec<KeyBinding>, ccs: Vec<CcBinding>, pads: Vec<PadBinding>) -> MappingTable {
        MappingTable {
            keys,
            ccs,
            pads,
            learn: LearnState::Idle,
            held_pad: HeldPad::default(),
            dirty: false,
        }
    }

    pub fn keys(&self) -> &[KeyBinding] {
        &self.keys
    }

    pub fn ccs(&self) -> &[CcBinding] {
        &self.ccs
    }

    pub fn pads(&self) -> &[PadBinding] {
        &self.pads
    }

    /// The action/parameter a pad index is bound to, if any (§3 "Trigger
    /// pad config"). Used by `dispatch::State` to resolve a
    /// `TriggerPad`/`TriggerNotePad` press to the concrete action it fires.
    pub fn bound_action(&self, pad_index: i32) -> Option<(Action, i32)> {
        self.pads
            .iter()
            .find(|binding| binding.pad_index == pad_index)
            .map(|binding| (binding.action, binding.parameter))
    }

    /// Merges a song-level pad binding loaded from RGX into the table
    /// (§4.J): song pads layer on top of the INI-loaded application pads,
    /// keyed by `pad_index`. A pad with no physical MIDI binding in the RGX
    /// is recorded with an empty device/note-zero sentinel so it still
    /// carries its action/parameter for non-MIDI triggering paths.
    pub fn load_song_pad(&mut self, pad: SongPad) {
        self.pads.retain(|b| b.pad_index != pad.pad_index);
        self.pads.push(PadBinding {
            device: pad.device.unwrap_or_default(),
            note: pad.note.unwrap_or(0),
            pad_index: pad.pad_index,
            action: pad.action,
            parameter: pad.parameter,
        });
    }

    /// True if a binding has changed since the last successful save. The
    /// caller clears this after serializing to disk (§4.D "Persistence").
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// `key -> (action, parameter)`: first match wins (§4.D).
    pub fn resolve_key(&self, key: &str) -> Option<InputEvent> {
        self.keys
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| InputEvent::new(binding.action, binding.parameter, 1))
    }

    /// `(device, cc, value) -> Option<InputEvent>` (§4.D): continuous
    /// bindings always emit; threshold bindings emit only on rising edge.
    pub fn resolve_cc(&self, device: &str, cc: u8, value: i32) -> Option<InputEvent> {
        let binding = self
            .ccs
            .iter()
            .find(|binding| binding.device == device && binding.cc == cc)?;
        match binding.mode {
            CcMode::Continuous => Some(InputEvent::new(binding.action, binding.parameter, value)),
            CcMode::Threshold { threshold } if value >= threshold => {
                Some(InputEvent::new(binding.action, binding.parameter, value))
            }
            CcMode::Threshold { .. } => None,
        }
    }

    /// `(device, note, is_note_on) -> pad index` (§4.D). Note-off only
    /// yields a release if the held-pad latch still names this pad.
    pub fn resolve_pad(&mut self, device_id: u16, device: &str, note: u8, is_note_on: bool) -> Option<i32> {
        let pad_index = self
            .pads
            .iter()
            .find(|binding| binding.device == device && binding.note == note)
            .map(|binding| binding.pad_index)?;

        if is_note_on {
            self.held_pad.set(device_id, pad_index);
            Some(pad_index)
        } else if self.held_pad.clear_if_matches(device_id, pad_index) {
            Some(pad_index)
        } else {
            None
        }
    }

    /// Arms learn mode for `target` (§4.D).
    pub fn start_learn(&mut self, target: LearnTarget) {
        self.learn = LearnState::Armed(target);
    }

    pub fn cancel_learn(&mut self) {
        self.learn = LearnState::Idle;
    }

    pub fn is_learning(&self) -> bool {
        matches!(self.learn, LearnState::Armed(_))
    }

    /// Captures a keypress as a binding for the armed target, or unlearns
    /// it if already bound to that exact target (§4.D). No-op if learn
    /// mode isn't armed.
    pub fn learn_key(&mut self, key: &str) {
        let Some(target) = self.take_armed_target() else {
            return;
        };

        if let Some(existing) = self.keys.iter().position(|b| b.key == key) {
            let bound_to_this_target = matches!(
                target,
                LearnTarget::Action { action, parameter }
                    if self.keys[existing].action == action
                        && self.keys[existing].parameter == parameter
            );
            self.keys.remove(existing);
            if bound_to_this_target {
                self.dirty = true;
                return;
            }
        }

        if let LearnTarget::Action { action, parameter } = target {
            self.remove_key_bindings_for(action, parameter);
            self.keys.push(KeyBinding { key: key.to_string(), action, parameter });
            self.dirty = true;
        }
    }

    /// Captures a MIDI CC or note-on as a binding for the armed target
    /// (§4.D). `value` is the raw CC value or note-on velocity, used only
    /// to decide whether a qualifying CC (>= 64) counts as a learn event.
    pub fn learn_midi_cc(&mut self, device: &str, cc: u8, value: i32) {
        if value < 64 {
            return;
        }
        let Some(target) = self.take_armed_target() else {
            return;
        };

        if let Some(existing) = self.ccs.iter().position(|b| b.device == device && b.cc == cc) {
            let bound_to_this_target = matches!(
                target,
                LearnTarget::Action { action, parameter }
                    if self.ccs[existing].action == action
                        && self.ccs[existing].parameter == parameter
            );
            self.ccs.remove(existing);
            if bound_to_this_target {
                self.dirty = true;
                return;
            }
        }

        if let LearnTarget::Action { action, parameter } = target {
            self.remove_cc_bindings_for(action, parameter);
            let mode = if is_continuous_by_default(action) {
                CcMode::Continuous
            } else {
                CcMode::Threshold { threshold: 64 }
            };
            self.ccs.push(CcBinding {
                device: device.to_string(),
                cc,
                mode,
                action,
                parameter,
            });
            self.dirty = true;
        }
    }

    /// Captures a MIDI note-on as a pad binding for an armed pad target
    /// (§4.D).
    pub fn learn_midi_note(&mut self, device: &str, note: u8) {
        let Some(target) = self.take_armed_target() else {
            return;
        };
        let LearnTarget::Pad { pad_index } = target else {
            return;
        };

        if let Some(existing) = self.pads.iter().position(|b| b.device == device && b.note == note) {
            let bound_to_this_target = self.pads[existing].pad_index == pad_index;
            self.pads.remove(existing);
            if bound_to_this_target {
                self.dirty = true;
                return;
            }
        }

        // Re-learning a pad's physical input keeps whatever action it was
        // already bound to; a brand-new pad defaults to triggering the
        // phrase at its own index.
        let (action, parameter) = self
            .pads
            .iter()
            .find(|b| b.pad_index == pad_index)
            .map(|b| (b.action, b.parameter))
            .unwrap_or((Action::TriggerPhrase, pad_index));

        self.pads.retain(|b| b.pad_index != pad_index);
        self.pads.push(PadBinding { device: device.to_string(), note, pad_index, action, parameter });
        self.dirty = true;
    }

    /// Explicit "unlearn": removes every binding pointing at `target`
    /// without requiring a fresh input event (§4.D).
    pub fn unlearn(&mut self, target: LearnTarget) {
        match target {
            LearnTarget::Action { action, parameter } => {
                self.remove_key_bindings_for(action, parameter);
                self.remove_cc_bindings_for(action, parameter);
            }
            LearnTarget::Pad { pad_index } => {
                self.pads.retain(|b| b.pad_index != pad_index);
            }
        }
        self.dirty = true;
        self.learn = LearnState::Idle;
    }

    fn take_armed_target(&mut self) -> Option<LearnTarget> {
        match self.learn {
            LearnState::Armed(target) => {
                self.learn = LearnState::Idle;
                Some(target)
            }
            LearnState::Idle => None,
        }
    }

    fn remove_key_bindings_for(&mut self, action: Action, parameter: i32) {
        self.keys.retain(|b| !(b.action == action && b.parameter == parameter));
    }

    fn remove_cc_bindings_for(&mut self, action: Action, parameter: i32) {
        self.ccs.retain(|b| !(b.action == action && b.parameter == parameter));
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        MappingTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_resolution_first_match_wins() {
        let mut table = MappingTable::new();
        table.keys.push(KeyBinding { key: "a".into(), action: Action::Play, parameter: 0 });
        table.keys.push(KeyBinding { key: "a".into(), action: Action::Stop, parameter: 0 });
        assert_eq!(table.resolve_key("a").unwrap().action, Action::Play);
    }

    #[test]
    fn test_learn_key_binds_then_unlearns() {
        let mut table = MappingTable::new();
        table.start_learn(LearnTarget::Action { action: Action::Mute, parameter: 3 });
        table.learn_key("m");
        assert_eq!(table.resolve_key("m").unwrap().action, Action::Mute);
        assert!(table.dirty());
        table.clear_dirty();

        table.start_learn(LearnTarget::Action { action: Action::Mute, parameter: 3 });
        table.learn_key("m");
        assert!(table.resolve_key("m").is_none(), "re-learning the same target should unlearn");
    }

    #[test]
    fn test_learn_key_steals_from_other_target() {
        let mut table = MappingTable::new();
        table.start_learn(LearnTarget::Action { action: Action::Mute, parameter: 0 });
        table.learn_key("x");
        table.start_learn(LearnTarget::Action { action: Action::Solo, parameter: 0 });
        table.learn_key("x");

        assert_eq!(table.resolve_key("x").unwrap().action, Action::Solo);
        assert_eq!(table.keys().len(), 1, "stealing a key must remove the old binding");
    }

    #[test]
    fn test_continuous_action_gets_continuous_cc_mode() {
        let mut table = MappingTable::new();
        table.start_learn(LearnTarget::Action { action: Action::Volume, parameter: 0 });
        table.learn_midi_cc("device-a", 7, 100);
        assert_eq!(table.ccs()[0].mode, CcMode::Continuous);
    }

    #[test]
    fn test_threshold_action_gets_threshold_cc_mode() {
        let mut table = MappingTable::new();
        table.start_learn(LearnTarget::Action { action: Action::Mute, parameter: 0 });
        table.learn_midi_cc("device-a", 9, 100);
        assert_eq!(table.ccs()[0].mode, CcMode::Threshold { threshold: 64 });
    }

    #[test]
    fn test_cc_below_64_does_not_complete_learn() {
        let mut table = MappingTable::new();
        table.start_learn(LearnTarget::Action { action: Action::Mute, parameter: 0 });
        table.learn_midi_cc("device-a", 9, 30);
        assert!(table.is_learning(), "sub-threshold CC should not complete a learn");
    }

    #[test]
    fn test_pad_note_off_only_releases_held_pad() {
        let mut table = MappingTable::new();
        table.pads.push(PadBinding {
            device: "dev".into(),
            note: 40,
            pad_index: 2,
            action: Action::TriggerPhrase,
            parameter: 2,
        });

        assert_eq!(table.resolve_pad(0, "dev", 40, true), Some(2));
        // A different device's note-off for the same note must not
        // release this device's held pad.
        assert_eq!(table.resolve_pad(1, "dev", 40, false), None);
        assert_eq!(table.resolve_pad(0, "dev", 40, false), Some(2));
    }

    #[test]
    fn test_pad_learn_evicts_existing_binding_on_same_target() {
        let mut table = MappingTable::new();
        table.start_learn(LearnTarget::Pad { pad_index: 1 });
        table.learn_midi_note("dev", 10);
        table.start_learn(LearnTarget::Pad { pad_index: 1 });
        table.learn_midi_note("dev", 20);

        assert_eq!(table.pads().len(), 1);
        assert_eq!(table.pads()[0].note, 20);
    }
}
