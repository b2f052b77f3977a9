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
//! The INI file (§4.J, §6): device selection, playback options, effect
//! defaults, and the mapping table. `[Keyboard]`/`[MIDI]`/`[TriggerPads]`
//! entries round-trip byte-for-byte on an untouched load/save (§8 R1).

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::config::error::ConfigError;
use crate::config::format::{self, Document};
use crate::effects::{Chain, Stage, ALL_STAGES};
use crate::mapping::{CcBinding, CcMode, KeyBinding, MappingTable, PadBinding};

const DEVICES: &str = "Devices";
const PLAYBACK: &str = "Playback";
const EFFECTS: &str = "Effects";
const KEYBOARD: &str = "Keyboard";
const MIDI: &str = "MIDI";
const TRIGGER_PADS: &str = "TriggerPads";

/// Audio/MIDI device selection (§6 `[Devices]`): one audio in/out pair and
/// three independently assignable MIDI-in slots plus one MIDI-out slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Devices {
    pub audio_out: Option<String>,
    pub audio_in: Option<String>,
    pub midi_in: [Option<String>; 3],
    pub midi_out: Option<String>,
}

/// Playback decoding options (§6 `[Playback]`), passed straight through to
/// the external tracker decoder (§1) — this crate doesn't interpret them
/// itself, only carries them.
#[derive(Debug, Clone, PartialEq)]
pub struct Playback {
    pub interpolation: String,
    pub dither: bool,
    pub stereo_separation: f32,
    pub resampler: String,
}

impl Default for Playback {
    fn default() -> Playback {
        Playback {
            interpolation: "linear".to_string(),
            dither: true,
            stereo_separation: 1.0,
            resampler: "auto".to_string(),
        }
    }
}

/// One effect stage's saved default: whether it starts enabled, and its
/// normalized `[0, 1]` parameters in index order (§6 `[Effects]`).
#[derive(Debug, Clone, PartialEq)]
pub struct EffectDefault {
    pub stage: Stage,
    pub enabled: bool,
    pub params: Vec<f32>,
}

/// The whole INI document: device selection, playback options, effect
/// defaults, and the mapping table (§4.J, §6). `mapping` is loaded from
/// the `[Keyboard]`/`[MIDI]`/`[TriggerPads]` sections, not the other way
/// around — the mapping table's own dirty flag tracks when it needs
/// re-saving.
pub struct Ini {
    pub devices: Devices,
    pub playback: Playback,
    pub effects: Vec<EffectDefault>,
    pub mapping: MappingTable,
}

impl Ini {
    /// The `--dump-config` / first-run default (§6): no devices selected,
    /// stock playback options, every effect stage off with zeroed
    /// parameters, and an empty mapping table.
    pub fn default_config() -> Ini {
        Ini {
            devices: Devices::default(),
            playback: Playback::default(),
            effects: ALL_STAGES
                .iter()
                .map(|&stage| EffectDefault { stage, enabled: false, params: Vec::new() })
                .collect(),
            mapping: MappingTable::new(),
        }
    }

    /// Captures a live `Chain`'s enabled/parameter state for saving (§4.J).
    pub fn effects_from_chain(chain: &Chain) -> Vec<EffectDefault> {
        ALL_STAGES
            .iter()
            .map(|&stage| EffectDefault {
                stage,
                enabled: chain.enabled(stage),
                params: (0..chain.num_params(stage)).map(|i| chain.param(stage, i)).collect(),
            })
            .collect()
    }

    /// Applies the loaded effect defaults to a freshly constructed `Chain`
    /// (§4.J "effect default parameters").
    pub fn apply_effects(&self, chain: &mut Chain) {
        for default in &self.effects {
            chain.set_enabled(default.stage, default.enabled);
            for (index, value) in default.params.iter().enumerate() {
                chain.set_param(default.stage, index, *value);
            }
        }
    }

    /// Loads `path`, falling back to `default_config()` if the file
    /// doesn't exist yet (first run). Any other I/O error is propagated
    /// (§7 setup error, fatal).
    pub fn load_or_default(path: &Path) -> Result<Ini, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Ini::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Ini::default_config()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Parses INI text. Never fails outright (§7 "parse warnings... ignore
    /// that binding, continue loading others") — unrecognized sections,
    /// keys, or action names are logged and skipped.
    pub fn parse(text: &str) -> Ini {
        let doc = Document::parse(text);
        let mut ini = Ini::default_config();

        for (key, value) in doc.section(DEVICES) {
            match key.as_str() {
                "audio_out" => ini.devices.audio_out = non_empty(value),
                "audio_in" => ini.devices.audio_in = non_empty(value),
                "midi_in_1" => ini.devices.midi_in[0] = non_empty(value),
                "midi_in_2" => ini.devices.midi_in[1] = non_empty(value),
                "midi_in_3" => ini.devices.midi_in[2] = non_empty(value),
                "midi_out" => ini.devices.midi_out = non_empty(value),
                _ => warn!(section = DEVICES, key, "Unknown key in INI; skipping."),
            }
        }

        for (key, value) in doc.section(PLAYBACK) {
            match key.as_str() {
                "interpolation" => ini.playback.interpolation = value.clone(),
                "dither" => ini.playback.dither = value == "true" || value == "1",
                "stereo_separation" => {
                    if let Ok(v) = value.parse() {
                        ini.playback.stereo_separation = v;
                    }
                }
                "resampler" => ini.playback.resampler = value.clone(),
                _ => warn!(section = PLAYBACK, key, "Unknown key in INI; skipping."),
            }
        }

        for (key, value) in doc.section(EFFECTS) {
            let Some((stage_name, field)) = key.split_once('_') else {
                warn!(section = EFFECTS, key, "Malformed effect key; skipping.");
                continue;
            };
            let Ok(stage) = stage_name.parse::<Stage>() else {
                warn!(section = EFFECTS, key, "Unknown effect stage; skipping.");
                continue;
            };
            let Some(default) = ini.effects.iter_mut().find(|e| e.stage == stage) else { continue };
            match field {
                "enabled" => default.enabled = value == "true" || value == "1",
                "params" => {
                    default.params = value.split(',').filter_map(|v| v.trim().parse().ok()).collect();
                }
                _ => warn!(section = EFFECTS, key, "Unknown effect field; skipping."),
            }
        }

        let mut keys = Vec::new();
        for (key, value) in doc.section(KEYBOARD) {
            let Some(key_name) = key.strip_prefix("KEY_") else {
                warn!(section = KEYBOARD, key, "Expected KEY_<code>; skipping.");
                continue;
            };
            let Some((action, params)) = format::parse_action_entry(value) else {
                warn!(section = KEYBOARD, key, "Unknown action; skipping.");
                continue;
            };
            let parameter = params.get("k").and_then(|v| v.parse().ok()).unwrap_or(0);
            keys.push(KeyBinding { key: key_name.to_string(), action, parameter });
        }

        let mut ccs = Vec::new();
        for (key, value) in doc.section(MIDI) {
            let Some(rest) = key.strip_prefix("CC_") else {
                warn!(section = MIDI, key, "Expected CC_<device>_<cc>; skipping.");
                continue;
            };
            let Some((device, cc_str)) = rest.rsplit_once('_') else {
                warn!(section = MIDI, key, "Malformed CC key; skipping.");
                continue;
            };
            let Ok(cc) = cc_str.parse::<u8>() else {
                warn!(section = MIDI, key, "Non-numeric CC number; skipping.");
                continue;
            };
            let Some((action, params)) = format::parse_action_entry(value) else {
                warn!(section = MIDI, key, "Unknown action; skipping.");
                continue;
            };
            let parameter = params.get("k").and_then(|v| v.parse().ok()).unwrap_or(0);
            let mode = if params.get("continuous").map(|v| v == "1").unwrap_or(false) {
                CcMode::Continuous
            } else {
                let threshold = params.get("threshold").and_then(|v| v.parse().ok()).unwrap_or(64);
                CcMode::Threshold { threshold }
            };
            ccs.push(CcBinding { device: device.to_string(), cc, mode, action, parameter });
        }

        let mut pads = Vec::new();
        for (key, value) in doc.section(TRIGGER_PADS) {
            let Some(index_str) = key.strip_prefix("PAD_") else {
                warn!(section = TRIGGER_PADS, key, "Expected PAD_<n>; skipping.");
                continue;
            };
            let Ok(pad_index) = index_str.parse::<i32>() else {
                warn!(section = TRIGGER_PADS, key, "Non-numeric pad index; skipping.");
                continue;
            };
            let Some((action, params)) = format::parse_action_entry(value) else {
                warn!(section = TRIGGER_PADS, key, "Unparseable pad binding; skipping.");
                continue;
            };
            let Some(note) = params.get("note").and_then(|v| v.parse().ok()) else {
                warn!(section = TRIGGER_PADS, key, "Pad binding missing note; skipping.");
                continue;
            };
            let device = params.get("device").cloned().unwrap_or_default();
            let parameter = params.get("k").and_then(|v| v.parse().ok()).unwrap_or(pad_index);
            pads.push(PadBinding { device, note, pad_index, action, parameter });
        }

        ini.mapping = MappingTable::from_bindings(keys, ccs, pads);
        ini
    }

    /// Saves to `path`, clearing the mapping table's dirty flag on success
    /// (§4.D "Persistence").
    pub fn save(&mut self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_string())?;
        self.mapping.clear_dirty();
        Ok(())
    }
}

impl std::fmt::Display for Ini {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut doc = Document::new();
        doc.ensure_section(DEVICES);
        if let Some(v) = &self.devices.audio_out {
            doc.set(DEVICES, "audio_out", v.clone());
        }
        if let Some(v) = &self.devices.audio_in {
            doc.set(DEVICES, "audio_in", v.clone());
        }
        for (i, slot) in self.devices.midi_in.iter().enumerate() {
            if let Some(v) = slot {
                doc.set(DEVICES, format!("midi_in_{}", i + 1), v.clone());
            }
        }
        if let Some(v) = &self.devices.midi_out {
            doc.set(DEVICES, "midi_out", v.clone());
        }

        doc.set(PLAYBACK, "interpolation", self.playback.interpolation.clone());
        doc.set(PLAYBACK, "dither", self.playback.dither.to_string());
        doc.set(PLAYBACK, "stereo_separation", self.playback.stereo_separation.to_string());
        doc.set(PLAYBACK, "resampler", self.playback.resampler.clone());

        for default in &self.effects {
            doc.set(EFFECTS, format!("{}_enabled", default.stage), default.enabled.to_string());
            let params = default.params.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
            doc.set(EFFECTS, format!("{}_params", default.stage), params);
        }

        doc.ensure_section(KEYBOARD);
        for binding in self.mapping.keys() {
            let entry = format::write_action_entry(binding.action, &[("k", binding.parameter.to_string())]);
            doc.set(KEYBOARD, format!("KEY_{}", binding.key), entry);
        }

        doc.ensure_section(MIDI);
        for binding in self.mapping.ccs() {
            let mut params = vec![("k", binding.parameter.to_string())];
            match binding.mode {
                CcMode::Continuous => params.push(("continuous", "1".to_string())),
                CcMode::Threshold { threshold } => params.push(("threshold", threshold.to_string())),
            }
            let entry = format::write_action_entry(binding.action, &params);
            doc.set(MIDI, format!("CC_{}_{}", binding.device, binding.cc), entry);
        }

        doc.ensure_section(TRIGGER_PADS);
        for binding in self.mapping.pads() {
            let params = vec![
                ("k", binding.parameter.to_string()),
                ("note", binding.note.to_string()),
                ("device", binding.device.clone()),
            ];
            let entry = format::write_action_entry(binding.action, &params);
            doc.set(TRIGGER_PADS, format!("PAD_{}", binding.pad_index), entry);
        }

        write!(f, "{doc}")
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::action::Action;

    #[test]
    fn test_default_config_has_five_disabled_stages() {
        let ini = Ini::default_config();
        assert_eq!(ini.effects.len(), 5);
        assert!(ini.effects.iter().all(|e| !e.enabled));
    }

    #[test]
    fn test_r1_mapping_round_trips_through_save_and_load() {
        let mut ini = Ini::default_config();
        ini.mapping.start_learn(crate::mapping::LearnTarget::Action { action: Action::Mute, parameter: 2 });
        ini.mapping.learn_key("m");
        ini.mapping.start_learn(crate::mapping::LearnTarget::Action { action: Action::Volume, parameter: 0 });
        ini.mapping.learn_midi_cc("mock", 7, 100);

        let first = ini.to_string();
        let reloaded = Ini::parse(&first);
        let second = reloaded.to_string();
        assert_eq!(first, second, "R1: re-serializing a freshly loaded table must be identical");
    }

    #[test]
    fn test_trigger_pads_round_trip_with_bound_action() {
        let mut ini = Ini::default_config();
        ini.mapping.start_learn(crate::mapping::LearnTarget::Pad { pad_index: 3 });
        ini.mapping.learn_midi_note("mock", 40);

        let reloaded = Ini::parse(&ini.to_string());
        let pad = reloaded.mapping.pads().iter().find(|b| b.pad_index == 3).unwrap();
        assert_eq!(pad.note, 40);
        assert_eq!(pad.device, "mock");
        assert_eq!(pad.action, Action::TriggerPhrase);
        assert_eq!(pad.parameter, 3);
    }

    #[test]
    fn test_devices_round_trip() {
        let mut ini = Ini::default_config();
        ini.devices.audio_out = Some("speakers".to_string());
        ini.devices.midi_in[1] = Some("mock-in".to_string());
        let reloaded = Ini::parse(&ini.to_string());
        assert_eq!(reloaded.devices.audio_out, Some("speakers".to_string()));
        assert_eq!(reloaded.devices.midi_in[1], Some("mock-in".to_string()));
    }

    #[test]
    fn test_unknown_action_name_in_keyboard_section_is_skipped_not_fatal() {
        let ini = Ini::parse("[Keyboard]\nKEY_x = NotARealAction\n");
        assert!(ini.mapping.keys().is_empty());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.ini");
        let ini = Ini::load_or_default(&path).unwrap();
        assert!(ini.mapping.keys().is_empty());
    }

    #[test]
    fn test_save_clears_mapping_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regroove.ini");
        let mut ini = Ini::default_config();
        ini.mapping.start_learn(crate::mapping::LearnTarget::Action { action: Action::Play, parameter: 0 });
        ini.mapping.learn_key("p");
        assert!(ini.mapping.dirty());
        ini.save(&path).unwrap();
        assert!(!ini.mapping.dirty());
    }
}
