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
//! The RGX file (§4.J, §6): song/channel/pattern/instrument metadata,
//! phrase scripts, loop ranges, song pads, and recorded performance events.
//! Metadata sections this crate never interprets (song/channel/pattern/
//! instrument) are still parsed and re-serialized faithfully, so a save
//! triggered by a recorded performance (§4.F) doesn't clobber them.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::action::Action;
use crate::config::error::ConfigError;
use crate::config::format::{self, Document};
use crate::performance::PerformanceEvent;
use crate::phrase::{Phrase, PhraseStep};

const SONG: &str = "Song";
const CHANNELS: &str = "Channels";
const PATTERNS: &str = "Patterns";
const INSTRUMENTS: &str = "Instruments";
const PHRASES: &str = "Phrases";
const LOOP_RANGES: &str = "LoopRanges";
const SONG_PADS: &str = "SongPads";
const EVENTS: &str = "Events";

/// The RGX's fixed order dimension is always 0: the performance timeline
/// (§4.F) has no multi-order concept of its own, only a flat row counter,
/// so `EVT_<order>_<row>` keys always use this placeholder order.
const EVENT_ORDER: u32 = 0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Song {
    pub name: String,
    pub note_offset: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMeta {
    pub name: String,
    pub default_pan: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMeta {
    pub index: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentMeta {
    pub midi_channel: Option<u8>,
    pub program: Option<u8>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopRangeMeta {
    pub start_order: u32,
    pub start_row: u32,
    pub end_order: u32,
    pub end_row: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongPad {
    pub pad_index: i32,
    pub action: Action,
    pub parameter: i32,
    pub note: Option<u8>,
    pub device: Option<String>,
}

/// The whole RGX document (§4.J, §6). Phrases (`PHRASE_<i>_NAME` plus
/// `PHRASE_<i>_STEP_<j>` lines, §6) carry their own name directly.
#[derive(Debug, Clone, Default)]
pub struct Rgx {
    pub song: Song,
    pub channels: Vec<ChannelMeta>,
    pub patterns: Vec<PatternMeta>,
    pub instruments: Vec<InstrumentMeta>,
    pub phrases: Vec<Phrase>,
    pub loop_ranges: Vec<LoopRangeMeta>,
    pub pads: Vec<SongPad>,
    pub events: Vec<PerformanceEvent>,
}

impl Rgx {
    pub fn new() -> Rgx {
        Rgx::default()
    }

    /// `Vec<Phrase>` in on-disk order, ready for `dispatch::State::new`.
    pub fn phrases(&self) -> Vec<Phrase> {
        self.phrases.clone()
    }

    pub fn load_or_default(path: &Path) -> Result<Rgx, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Rgx::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Rgx::new()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Tolerant parse (§7): unrecognized keys or action names are logged
    /// and skipped, never failing the whole load.
    pub fn parse(text: &str) -> Rgx {
        let doc = Document::parse(text);
        let mut rgx = Rgx::new();

        for (key, value) in doc.section(SONG) {
            match key.as_str() {
                "name" => rgx.song.name = value.clone(),
                "note_offset" => rgx.song.note_offset = value.parse().unwrap_or(0),
                _ => warn!(section = SONG, key, "Unknown key in RGX; skipping."),
            }
        }

        rgx.channels = parse_indexed(doc.section(CHANNELS), "CH_", CHANNELS, |fields| {
            let name = fields.get("NAME").cloned().unwrap_or_default();
            let default_pan = fields.get("PAN").and_then(|v| v.parse().ok()).unwrap_or(0.0);
            ChannelMeta { name, default_pan }
        });

        for (key, value) in doc.section(PATTERNS) {
            let Some(index_str) = key.strip_prefix("PAT_") else {
                warn!(section = PATTERNS, key, "Expected PAT_<n>; skipping.");
                continue;
            };
            let Ok(index) = index_str.parse::<u32>() else {
                warn!(section = PATTERNS, key, "Non-numeric pattern index; skipping.");
                continue;
            };
            rgx.patterns.push(PatternMeta { index, description: value.clone() });
        }

        rgx.instruments = parse_indexed(doc.section(INSTRUMENTS), "INSTR_", INSTRUMENTS, |fields| {
            InstrumentMeta {
                midi_channel: fields.get("MIDI_CHANNEL").and_then(|v| v.parse().ok()),
                program: fields.get("PROGRAM").and_then(|v| v.parse().ok()),
                name: fields.get("NAME").cloned().unwrap_or_default(),
            }
        });

        rgx.phrases = parse_phrases(doc.section(PHRASES));

        for (key, value) in doc.section(LOOP_RANGES) {
            let Some(_index_str) = key.strip_prefix("LOOP_") else {
                warn!(section = LOOP_RANGES, key, "Expected LOOP_<n>; skipping.");
                continue;
            };
            let fields = parse_csv_fields(value);
            let (Some(start_order), Some(start_row), Some(end_order), Some(end_row)) = (
                fields.get("s_order").and_then(|v| v.parse().ok()),
                fields.get("s_row").and_then(|v| v.parse().ok()),
                fields.get("e_order").and_then(|v| v.parse().ok()),
                fields.get("e_row").and_then(|v| v.parse().ok()),
            ) else {
                warn!(section = LOOP_RANGES, key, "Incomplete loop range; skipping.");
                continue;
            };
            let description = fields.get("desc").cloned().unwrap_or_default();
            rgx.loop_ranges.push(LoopRangeMeta { start_order, start_row, end_order, end_row, description });
        }

        for (key, value) in doc.section(SONG_PADS) {
            let Some(index_str) = key.strip_prefix("PAD_") else {
                warn!(section = SONG_PADS, key, "Expected PAD_<n>; skipping.");
                continue;
            };
            let Ok(pad_index) = index_str.parse::<i32>() else {
                warn!(section = SONG_PADS, key, "Non-numeric pad index; skipping.");
                continue;
            };
            let Some((action, params)) = format::parse_action_entry(value) else {
                warn!(section = SONG_PADS, key, "Unknown action; skipping.");
                continue;
            };
            let parameter = params.get("k").and_then(|v| v.parse().ok()).unwrap_or(0);
            let note = params.get("note").and_then(|v| v.parse().ok());
            let device = params.get("device").cloned();
            rgx.pads.push(SongPad { pad_index, action, parameter, note, device });
        }

        for (key, value) in doc.section(EVENTS) {
            let Some(rest) = key.strip_prefix("EVT_") else {
                warn!(section = EVENTS, key, "Expected EVT_<order>_<row>; skipping.");
                continue;
            };
            let Some((_order_str, row_str)) = rest.split_once('_') else {
                warn!(section = EVENTS, key, "Malformed event key; skipping.");
                continue;
            };
            let Ok(row) = row_str.parse::<u32>() else {
                warn!(section = EVENTS, key, "Non-numeric event row; skipping.");
                continue;
            };
            for (action, params) in format::parse_action_entries(value) {
                let parameter = params.get("k").and_then(|v| v.parse().ok()).unwrap_or(0);
                let val: i32 = params.get("v").and_then(|v| v.parse().ok()).unwrap_or(0);
                rgx.events.push(PerformanceEvent { row, action, parameter, value: val as f32 });
            }
        }

        rgx
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_string())?;
        Ok(())
    }
}

/// Groups `<prefix><n>_<FIELD> = value` lines by `n`, in ascending index
/// order, handing each group's fields to `build`.
fn parse_indexed<T>(
    entries: &[(String, String)],
    prefix: &str,
    section: &str,
    build: impl Fn(&BTreeMap<String, String>) -> T,
) -> Vec<T> {
    let mut grouped: BTreeMap<u32, BTreeMap<String, String>> = BTreeMap::new();
    for (key, value) in entries {
        let Some(rest) = key.strip_prefix(prefix) else {
            warn!(section, key, "Expected {}<n>_<field>; skipping.", prefix);
            continue;
        };
        let Some((index_str, field)) = rest.split_once('_') else {
            warn!(section, key, "Malformed indexed key; skipping.");
            continue;
        };
        let Ok(index) = index_str.parse::<u32>() else {
            warn!(section, key, "Non-numeric index; skipping.");
            continue;
        };
        grouped.entry(index).or_default().insert(field.to_string(), value.clone());
    }
    grouped.values().map(build).collect()
}

fn parse_csv_fields(value: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for pair in value.split(',') {
        if let Some((key, val)) = pair.trim().split_once(':') {
            fields.insert(key.trim().to_string(), val.trim().to_string());
        }
    }
    fields
}

/// Parses `PHRASE_<i>_NAME` and `PHRASE_<i>_STEP_<j> = action [k:v] @row:R`
/// lines, grouped by phrase index `i` then ordered by step index `j` (§6).
fn parse_phrases(entries: &[(String, String)]) -> Vec<Phrase> {
    let mut names: BTreeMap<u32, String> = BTreeMap::new();
    let mut steps: BTreeMap<u32, BTreeMap<u32, PhraseStep>> = BTreeMap::new();

    for (key, value) in entries {
        let Some(rest) = key.strip_prefix("PHRASE_") else {
            warn!(section = PHRASES, key, "Expected PHRASE_<n>_...; skipping.");
            continue;
        };
        let Some((index_str, field)) = rest.split_once('_') else {
            warn!(section = PHRASES, key, "Malformed phrase key; skipping.");
            continue;
        };
        let Ok(index) = index_str.parse::<u32>() else {
            warn!(section = PHRASES, key, "Non-numeric phrase index; skipping.");
            continue;
        };

        if field == "NAME" {
            names.insert(index, value.clone());
            continue;
        }

        let Some(step_str) = field.strip_prefix("STEP_") else {
            warn!(section = PHRASES, key, "Unknown phrase field; skipping.");
            continue;
        };
        let Ok(step_index) = step_str.parse::<u32>() else {
            warn!(section = PHRASES, key, "Non-numeric step index; skipping.");
            continue;
        };
        let Some((body, row_part)) = value.rsplit_once('@') else {
            warn!(section = PHRASES, key, "Phrase step missing @row:R; skipping.");
            continue;
        };
        let Some(row_str) = row_part.trim().strip_prefix("row:") else {
            warn!(section = PHRASES, key, "Phrase step missing row: tag; skipping.");
            continue;
        };
        let Ok(position_rows) = row_str.trim().parse::<u32>() else {
            warn!(section = PHRASES, key, "Non-numeric phrase step row; skipping.");
            continue;
        };
        let Some((action, params)) = format::parse_action_entry(body.trim()) else {
            warn!(section = PHRASES, key, "Unknown phrase step action; skipping.");
            continue;
        };
        let parameter = params.get("k").and_then(|v| v.parse().ok()).unwrap_or(0);
        let val = params.get("v").and_then(|v| v.parse().ok()).unwrap_or(0);
        steps.entry(index).or_default().insert(step_index, PhraseStep { position_rows, action, parameter, value: val });
    }

    let mut all_indices: Vec<u32> = names.keys().chain(steps.keys()).cloned().collect();
    all_indices.sort_unstable();
    all_indices.dedup();

    all_indices
        .into_iter()
        .map(|index| {
            let name = names.get(&index).cloned().unwrap_or_default();
            let phrase_steps = steps.remove(&index).map(|m| m.into_values().collect()).unwrap_or_default();
            Phrase { name, steps: phrase_steps }
        })
        .collect()
}

impl std::fmt::Display for Rgx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut doc = Document::new();

        doc.set(SONG, "name", self.song.name.clone());
        doc.set(SONG, "note_offset", self.song.note_offset.to_string());

        for (i, channel) in self.channels.iter().enumerate() {
            doc.set(CHANNELS, format!("CH_{i}_NAME"), channel.name.clone());
            doc.set(CHANNELS, format!("CH_{i}_PAN"), channel.default_pan.to_string());
        }

        for pattern in &self.patterns {
            doc.set(PATTERNS, format!("PAT_{}", pattern.index), pattern.description.clone());
        }

        for (i, instrument) in self.instruments.iter().enumerate() {
            if let Some(channel) = instrument.midi_channel {
                doc.set(INSTRUMENTS, format!("INSTR_{i}_MIDI_CHANNEL"), channel.to_string());
            }
            if let Some(program) = instrument.program {
                doc.set(INSTRUMENTS, format!("INSTR_{i}_PROGRAM"), program.to_string());
            }
            doc.set(INSTRUMENTS, format!("INSTR_{i}_NAME"), instrument.name.clone());
        }

        doc.ensure_section(PHRASES);
        for (i, phrase) in self.phrases.iter().enumerate() {
            doc.set(PHRASES, format!("PHRASE_{i}_NAME"), phrase.name.clone());
            for (j, step) in phrase.steps.iter().enumerate() {
                let entry = format::write_action_entry(
                    step.action,
                    &[("k", step.parameter.to_string()), ("v", step.value.to_string())],
                );
                doc.set(PHRASES, format!("PHRASE_{i}_STEP_{j}"), format!("{entry} @row:{}", step.position_rows));
            }
        }

        for (i, range) in self.loop_ranges.iter().enumerate() {
            let value = format!(
                "s_order:{},s_row:{},e_order:{},e_row:{},desc:{}",
                range.start_order, range.start_row, range.end_order, range.end_row, range.description
            );
            doc.set(LOOP_RANGES, format!("LOOP_{i}"), value);
        }

        doc.ensure_section(SONG_PADS);
        for pad in &self.pads {
            let mut params = vec![("k", pad.parameter.to_string())];
            if let Some(note) = pad.note {
                params.push(("note", note.to_string()));
            }
            if let Some(device) = &pad.device {
                params.push(("device", device.clone()));
            }
            let entry = format::write_action_entry(pad.action, &params);
            doc.set(SONG_PADS, format!("PAD_{}", pad.pad_index), entry);
        }

        doc.ensure_section(EVENTS);
        let mut by_row: BTreeMap<u32, Vec<&PerformanceEvent>> = BTreeMap::new();
        for event in &self.events {
            by_row.entry(event.row).or_default().push(event);
        }
        for (row, events) in by_row {
            let entries: Vec<(Action, Vec<(&str, String)>)> = events
                .iter()
                .map(|e| (e.action, vec![("k", e.parameter.to_string()), ("v", (e.value as i32).to_string())]))
                .collect();
            doc.set(EVENTS, format!("EVT_{EVENT_ORDER}_{row}"), format::write_action_entries(&entries));
        }

        write!(f, "{doc}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_r2_performance_events_round_trip_through_save_and_load() {
        let mut rgx = Rgx::new();
        rgx.song.name = "Test Song".to_string();
        rgx.events = vec![
            PerformanceEvent { row: 0, action: Action::Mute, parameter: 1, value: 0.0 },
            PerformanceEvent { row: 0, action: Action::Solo, parameter: 2, value: 0.0 },
            PerformanceEvent { row: 4, action: Action::Volume, parameter: 0, value: 90.0 },
        ];

        let text = rgx.to_string();
        let reloaded = Rgx::parse(&text);
        assert_eq!(reloaded.events, rgx.events);
        assert_eq!(reloaded.song.name, "Test Song");
    }

    #[test]
    fn test_phrase_steps_round_trip_in_row_order() {
        let mut rgx = Rgx::new();
        rgx.phrases.push(Phrase {
            name: "Intro".to_string(),
            steps: vec![
                PhraseStep { position_rows: 0, action: Action::Mute, parameter: 1, value: 0 },
                PhraseStep { position_rows: 8, action: Action::Solo, parameter: 2, value: 0 },
            ],
        });

        let reloaded = Rgx::parse(&rgx.to_string());
        assert_eq!(reloaded.phrases.len(), 1);
        assert_eq!(reloaded.phrases[0].name, "Intro");
        assert_eq!(reloaded.phrases[0].steps, rgx.phrases[0].steps);
    }

    #[test]
    fn test_loop_ranges_round_trip() {
        let mut rgx = Rgx::new();
        rgx.loop_ranges.push(LoopRangeMeta {
            start_order: 1,
            start_row: 0,
            end_order: 2,
            end_row: 16,
            description: "Chorus loop".to_string(),
        });
        let reloaded = Rgx::parse(&rgx.to_string());
        assert_eq!(reloaded.loop_ranges, rgx.loop_ranges);
    }

    #[test]
    fn test_song_pads_round_trip() {
        let mut rgx = Rgx::new();
        rgx.pads.push(SongPad {
            pad_index: 3,
            action: Action::TriggerPhrase,
            parameter: 0,
            note: Some(40),
            device: Some("mock".to_string()),
        });
        let reloaded = Rgx::parse(&rgx.to_string());
        assert_eq!(reloaded.pads, rgx.pads);
    }

    #[test]
    fn test_missing_file_yields_empty_rgx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.rgx");
        let rgx = Rgx::load_or_default(&path).unwrap();
        assert!(rgx.events.is_empty());
        assert!(rgx.phrases.is_empty());
    }

    #[test]
    fn test_unknown_action_in_events_is_skipped_not_fatal() {
        let rgx = Rgx::parse("[Events]\nEVT_0_0 = NotARealAction\n");
        assert!(rgx.events.is_empty());
    }
}
