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
//! The line-oriented `[Section]` / `key = value` grammar shared by INI and
//! RGX (§4.J, §6), plus the `<ActionName> [k:v, ...]` mini-grammar common
//! to `[Keyboard]`, `[MIDI]`, `[TriggerPads]`, `[Phrases]` steps, and
//! `[Events]` entries. Hand-written: no generic TOML/YAML/INI crate covers
//! this exact bespoke shape (§4.J).

use std::collections::BTreeMap;

use tracing::warn;

use crate::action::Action;

/// An ordered `(section, [(key, value)])` list. Order is preserved on both
/// axes so re-serializing an untouched load reproduces the same bytes (§8
/// R1/R2 rely on this).
#[derive(Debug, Clone, Default)]
pub struct Document {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Document {
    pub fn new() -> Document {
        Document { sections: Vec::new() }
    }

    /// Returns the key/value pairs of `section`, or an empty slice if the
    /// section doesn't exist.
    pub fn section(&self, name: &str) -> &[(String, String)] {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kv)| kv.as_slice())
            .unwrap_or(&[])
    }

    fn section_mut(&mut self, name: &str) -> &mut Vec<(String, String)> {
        if let Some(pos) = self.sections.iter().position(|(n, _)| n == name) {
            return &mut self.sections[pos].1;
        }
        self.sections.push((name.to_string(), Vec::new()));
        &mut self.sections.last_mut().expect("just pushed").1
    }

    /// Appends `key = value` to `section`, creating it (at the end of the
    /// document) if it doesn't exist yet.
    pub fn set(&mut self, section: &str, key: impl Into<String>, value: impl Into<String>) {
        self.section_mut(section).push((key.into(), value.into()));
    }

    /// Ensures `section` exists (possibly empty), preserving header order
    /// even for sections with no entries yet.
    pub fn ensure_section(&mut self, section: &str) {
        self.section_mut(section);
    }

    /// Tolerant parse (§7): a line that doesn't fit the grammar, or a
    /// `key = value` line outside any section, is logged via `warn!` and
    /// skipped; the rest of the document still loads.
    pub fn parse(text: &str) -> Document {
        let mut doc = Document::new();
        let mut current = String::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                current = line[1..line.len() - 1].trim().to_string();
                doc.ensure_section(&current);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line = index + 1, text = line, "Skipping unparseable config line.");
                continue;
            };
            if current.is_empty() {
                warn!(line = index + 1, "Skipping key/value line outside any section header.");
                continue;
            }
            doc.set(current.clone(), key.trim().to_string(), value.trim().to_string());
        }
        doc
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, entries) in &self.sections {
            writeln!(f, "[{name}]")?;
            for (key, value) in entries {
                writeln!(f, "{key} = {value}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Parses `<ActionName> [k:v, k:v, ...]` (the trailing bracket is
/// optional when there are no parameters). Returns `None` if `name` isn't
/// a recognized action (§7 parse warning, logged by the caller).
pub fn parse_action_entry(text: &str) -> Option<(Action, BTreeMap<String, String>)> {
    let text = text.trim();
    let (name, bracketed) = match text.find('[') {
        Some(idx) => (text[..idx].trim(), Some(&text[idx..])),
        None => (text, None),
    };
    let action = action_from_name(name)?;

    let mut params = BTreeMap::new();
    if let Some(bracketed) = bracketed {
        let inner = bracketed.trim().trim_start_matches('[').trim_end_matches(']');
        for pair in inner.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Some((key, value)) = pair.split_once(':') {
                params.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    Some((action, params))
}

/// The inverse of `parse_action_entry`: `action.to_string()` (which is
/// just `{:?}`) plus the bracketed key/value list, omitted entirely when
/// empty.
pub fn write_action_entry(action: Action, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return action.to_string();
    }
    let body = params.iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join(", ");
    format!("{action} [{body}]")
}

/// One or more comma-separated `<ActionName> [k:v, ...]` entries sharing a
/// single `[Events]` row (§4.F "actions comma-separated when they share a
/// row"). Stops at the top-level comma between entries; commas inside an
/// entry's own bracket are preserved since they sit between `[` and `]`.
pub fn parse_action_entries(text: &str) -> Vec<(Action, BTreeMap<String, String>)> {
    split_top_level(text)
        .iter()
        .filter_map(|entry| parse_action_entry(entry))
        .collect()
}

pub fn write_action_entries(entries: &[(Action, Vec<(&str, String)>)]) -> String {
    entries
        .iter()
        .map(|(action, params)| write_action_entry(*action, params))
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_top_level(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    out.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

/// Exhaustive reverse lookup of `Action`'s `{:?}`-based `Display` (§4.J):
/// there's no derived `FromStr` on a plain enum, so this hand-matches
/// every variant name.
pub fn action_from_name(name: &str) -> Option<Action> {
    Some(match name {
        "Play" => Action::Play,
        "Stop" => Action::Stop,
        "Retrigger" => Action::Retrigger,
        "JumpToOrder" => Action::JumpToOrder,
        "JumpToPattern" => Action::JumpToPattern,
        "JumpNextOrder" => Action::JumpNextOrder,
        "JumpPrevOrder" => Action::JumpPrevOrder,
        "QueueNextOrder" => Action::QueueNextOrder,
        "QueuePrevOrder" => Action::QueuePrevOrder,
        "QueueOrder" => Action::QueueOrder,
        "QueuePattern" => Action::QueuePattern,
        "PatternModeToggle" => Action::PatternModeToggle,
        "Mute" => Action::Mute,
        "Solo" => Action::Solo,
        "QueueMute" => Action::QueueMute,
        "QueueSolo" => Action::QueueSolo,
        "Volume" => Action::Volume,
        "Pan" => Action::Pan,
        "TriggerPad" => Action::TriggerPad,
        "TriggerNotePad" => Action::TriggerNotePad,
        "TriggerPhrase" => Action::TriggerPhrase,
        "TriggerLoop" => Action::TriggerLoop,
        "PlayToLoop" => Action::PlayToLoop,
        "SetLoopStep" => Action::SetLoopStep,
        "HalveLoop" => Action::HalveLoop,
        "FullLoop" => Action::FullLoop,
        "MasterVolume" => Action::MasterVolume,
        "MasterPan" => Action::MasterPan,
        "MasterMute" => Action::MasterMute,
        "PlaybackVolume" => Action::PlaybackVolume,
        "PlaybackPan" => Action::PlaybackPan,
        "PlaybackMute" => Action::PlaybackMute,
        "InputVolume" => Action::InputVolume,
        "InputPan" => Action::InputPan,
        "InputMute" => Action::InputMute,
        "FxRoute" => Action::FxRoute,
        "PitchSet" => Action::PitchSet,
        "PitchReset" => Action::PitchReset,
        "TapTempo" => Action::TapTempo,
        "DistortionParam" => Action::DistortionParam,
        "FilterParam" => Action::FilterParam,
        "EqParam" => Action::EqParam,
        "CompressorParam" => Action::CompressorParam,
        "DelayParam" => Action::DelayParam,
        "DistortionToggle" => Action::DistortionToggle,
        "FilterToggle" => Action::FilterToggle,
        "EqToggle" => Action::EqToggle,
        "CompressorToggle" => Action::CompressorToggle,
        "DelayToggle" => Action::DelayToggle,
        "MidiSendClockToggle" => Action::MidiSendClockToggle,
        "MidiSendTransportToggle" => Action::MidiSendTransportToggle,
        "MidiReceiveTransportToggle" => Action::MidiReceiveTransportToggle,
        "MidiSyncTempoToggle" => Action::MidiSyncTempoToggle,
        "MidiSppModeSet" => Action::MidiSppModeSet,
        "NextFile" => Action::NextFile,
        "PrevFile" => Action::PrevFile,
        "LoadFile" => Action::LoadFile,
        "RecordToggle" => Action::RecordToggle,
        "Quit" => Action::Quit,
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trips_every_action_name() {
        use crate::action::Action::*;
        let all = [
            Play, Stop, Retrigger, JumpToOrder, JumpToPattern, JumpNextOrder, JumpPrevOrder,
            QueueNextOrder, QueuePrevOrder, QueueOrder, QueuePattern, PatternModeToggle, Mute, Solo,
            QueueMute, QueueSolo, Volume, Pan, TriggerPad, TriggerNotePad, TriggerPhrase, TriggerLoop,
            PlayToLoop, SetLoopStep, HalveLoop, FullLoop, MasterVolume, MasterPan, MasterMute,
            PlaybackVolume, PlaybackPan, PlaybackMute, InputVolume, InputPan, InputMute, FxRoute,
            PitchSet, PitchReset, TapTempo, DistortionParam, FilterParam, EqParam, CompressorParam,
            DelayParam, DistortionToggle, FilterToggle, EqToggle, CompressorToggle, DelayToggle,
            MidiSendClockToggle, MidiSendTransportToggle, MidiReceiveTransportToggle, MidiSyncTempoToggle,
            MidiSppModeSet, NextFile, PrevFile, LoadFile, RecordToggle, Quit,
        ];
        for action in all {
            assert_eq!(action_from_name(&action.to_string()), Some(action), "{action:?} must round-trip");
        }
    }

    #[test]
    fn test_unknown_action_name_is_none() {
        assert_eq!(action_from_name("NotARealAction"), None);
    }

    #[test]
    fn test_parse_action_entry_with_params() {
        let (action, params) = parse_action_entry("Mute [channel:3]").unwrap();
        assert_eq!(action, Action::Mute);
        assert_eq!(params.get("channel"), Some(&"3".to_string()));
    }

    #[test]
    fn test_parse_action_entry_without_params() {
        let (action, params) = parse_action_entry("Play").unwrap();
        assert_eq!(action, Action::Play);
        assert!(params.is_empty());
    }

    #[test]
    fn test_write_action_entry_round_trips() {
        let text = write_action_entry(Action::Mute, &[("channel", "3".to_string())]);
        assert_eq!(text, "Mute [channel:3]");
        let (action, params) = parse_action_entry(&text).unwrap();
        assert_eq!(action, Action::Mute);
        assert_eq!(params.get("channel"), Some(&"3".to_string()));
    }

    #[test]
    fn test_split_top_level_respects_brackets() {
        let entries = split_top_level("Mute [channel:3], Solo [channel:1]");
        assert_eq!(entries, vec!["Mute [channel:3]", "Solo [channel:1]"]);
    }

    #[test]
    fn test_parse_action_entries_shared_row() {
        let entries = parse_action_entries("Mute [channel:3], Solo [channel:1]");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, Action::Mute);
        assert_eq!(entries[1].0, Action::Solo);
    }

    #[test]
    fn test_document_parse_round_trip() {
        let text = "[Devices]\naudio_out = default\n\n[Playback]\ndither = true\n";
        let doc = Document::parse(text);
        assert_eq!(doc.section("Devices"), &[("audio_out".to_string(), "default".to_string())]);
        assert_eq!(doc.to_string(), text);
    }

    #[test]
    fn test_document_skips_malformed_lines() {
        let doc = Document::parse("[Devices]\nnot a valid line\naudio_out = default\n");
        assert_eq!(doc.section("Devices"), &[("audio_out".to_string(), "default".to_string())]);
    }
}
