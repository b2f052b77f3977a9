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
//! The closed `Action` enum and the event types that carry it between the
//! mapping table, the dispatcher, the performance timeline, and the
//! phrase engine. A flat tagged union rather than a trait hierarchy, per
//! the "Polymorphism" note in the design notes: dispatch is a switch, not
//! a v-table.

use std::fmt;

/// An action a user, a MIDI binding, a phrase step, or a recorded
/// performance event can request. Parameters disambiguate which target
/// the action applies to (channel index, order number, pad index, ...);
/// the numeric payload travels alongside in `InputEvent`/`PerformanceEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    // Transport
    Play,
    Stop,
    Retrigger,

    // Order/pattern navigation: immediate
    JumpToOrder,
    JumpToPattern,
    JumpNextOrder,
    JumpPrevOrder,

    // Order/pattern navigation: queued
    QueueNextOrder,
    QueuePrevOrder,
    QueueOrder,
    QueuePattern,
    PatternModeToggle,

    // Channel
    Mute,
    Solo,
    QueueMute,
    QueueSolo,
    Volume,
    Pan,

    // Pads
    TriggerPad,
    TriggerNotePad,

    // Phrase
    TriggerPhrase,

    // Loop
    TriggerLoop,
    PlayToLoop,
    SetLoopStep,
    HalveLoop,
    FullLoop,

    // Mix
    MasterVolume,
    MasterPan,
    MasterMute,
    PlaybackVolume,
    PlaybackPan,
    PlaybackMute,
    InputVolume,
    InputPan,
    InputMute,
    FxRoute,
    PitchSet,
    PitchReset,
    TapTempo,

    // Effects: per-knob continuous parameters
    DistortionParam,
    FilterParam,
    EqParam,
    CompressorParam,
    DelayParam,

    // Effects: per-stage toggles
    DistortionToggle,
    FilterToggle,
    EqToggle,
    CompressorToggle,
    DelayToggle,

    // MIDI sync toggles
    MidiSendClockToggle,
    MidiSendTransportToggle,
    MidiReceiveTransportToggle,
    MidiSyncTempoToggle,
    MidiSppModeSet,

    // File navigation
    NextFile,
    PrevFile,
    LoadFile,

    // Recording / misc
    RecordToggle,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A subset of actions that are "knob-like" for the purposes of learn-mode
/// auto-continuous-selection (§4.D): volumes, pans, pitch set, and effect
/// continuous parameters default to continuous CC bindings rather than
/// threshold/rising-edge bindings.
pub fn is_continuous_by_default(action: Action) -> bool {
    matches!(
        action,
        Action::Volume
            | Action::Pan
            | Action::MasterVolume
            | Action::MasterPan
            | Action::PlaybackVolume
            | Action::PlaybackPan
            | Action::InputVolume
            | Action::InputPan
            | Action::PitchSet
            | Action::DistortionParam
            | Action::FilterParam
            | Action::EqParam
            | Action::CompressorParam
            | Action::DelayParam
    )
}

/// Where an `InputEvent` originated. Threaded through `dispatch` so the
/// dispatcher can apply source-specific rules (§4.I): phrase triggers
/// bypass recording, `performance_playback` events are never re-recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    User,
    Midi,
    Keyboard,
    Phrase,
    PerformancePlayback,
}

/// `{action, parameter, value}` as described in the data model (§3).
/// `parameter` disambiguates the target (channel index, order number, pad
/// index, ...); `value` conveys continuous data (0-127 convention) or
/// note-on velocity (0 = release).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub action: Action,
    pub parameter: i32,
    pub value: i32,
}

impl InputEvent {
    pub fn new(action: Action, parameter: i32, value: i32) -> InputEvent {
        InputEvent {
            action,
            parameter,
            value,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_continuous_defaults() {
        assert!(is_continuous_by_default(Action::Volume));
        assert!(is_continuous_by_default(Action::PitchSet));
        assert!(!is_continuous_by_default(Action::TriggerPad));
        assert!(!is_continuous_by_default(Action::Mute));
    }

    #[test]
    fn test_input_event_construction() {
        let event = InputEvent::new(Action::Mute, 3, 0);
        assert_eq!(event.action, Action::Mute);
        assert_eq!(event.parameter, 3);
        assert_eq!(event.value, 0);
    }
}
