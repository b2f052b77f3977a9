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
//! Inbound MIDI sync (§4.H): clock recovery via a rolling average,
//! pitch-as-tempo compensation, SPP translation, and transport-message
//! gating. Pure logic, no I/O — the controller feeds it raw bytes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: usize = 24;
const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MAX_INTERVAL: Duration = Duration::from_secs(1);

/// Recovers BPM from inbound MIDI Clock (0xF8) pulses via a rolling
/// average of the last 24 intervals, rejecting anything outside (1ms, 1s)
/// as a glitch (§4.H).
pub struct ClockRecovery {
    intervals: VecDeque<Duration>,
    last_pulse: Option<Instant>,
}

impl ClockRecovery {
    pub fn new() -> ClockRecovery {
        ClockRecovery { intervals: VecDeque::with_capacity(WINDOW), last_pulse: None }
    }

    /// Call on receipt of an 0xF8 byte.
    pub fn on_clock_pulse(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_pulse {
            let interval = now.duration_since(last);
            if interval >= MIN_INTERVAL && interval <= MAX_INTERVAL {
                if self.intervals.len() == WINDOW {
                    self.intervals.pop_front();
                }
                self.intervals.push_back(interval);
            }
        }
        self.last_pulse = Some(now);
    }

    /// Start/Continue resets the rolling window so recovery doesn't carry
    /// stale intervals from before a transport jump.
    pub fn on_start_or_continue(&mut self) {
        self.intervals.clear();
        self.last_pulse = None;
    }

    /// `None` until at least one interval has been observed.
    pub fn bpm(&self) -> Option<f32> {
        if self.intervals.is_empty() {
            return None;
        }
        let total: Duration = self.intervals.iter().sum();
        let avg_us = total.as_micros() as f64 / self.intervals.len() as f64;
        Some((60_000_000.0 / (avg_us * 24.0)) as f32)
    }
}

impl Default for ClockRecovery {
    fn default() -> Self {
        ClockRecovery::new()
    }
}

/// Computes the pitch factor that would make `module_bpm / pitch ==
/// clock_bpm`, clamped to `[0.25, 3.0]` (§4.H). Returns `None` when the
/// required change is within `threshold_percent` of `current_pitch`, so
/// small clock jitter doesn't cause constant re-pitching.
pub fn sync_pitch(module_bpm: f32, clock_bpm: f32, current_pitch: f32, threshold_percent: f32) -> Option<f32> {
    if clock_bpm <= 0.0 {
        return None;
    }
    let required = (module_bpm / clock_bpm).clamp(0.25, 3.0);
    let delta_percent = ((required - current_pitch).abs() / current_pitch.max(f32::EPSILON)) * 100.0;
    if delta_percent > threshold_percent {
        Some(required)
    } else {
        None
    }
}

/// `order = spp / 64; row = (spp % 64) * pattern_rows / 64` (§4.H).
pub fn translate_spp(spp: u16, pattern_rows: u32) -> (u32, u32) {
    let spp = spp as u32;
    let order = spp / 64;
    let row = (spp % 64) * pattern_rows / 64;
    (order, row)
}

/// Only resync when the drift exceeds a couple of rows, to avoid jitter
/// from chasing every SPP update (§4.H).
pub fn should_resync(target_row: u32, current_row: u32) -> bool {
    (target_row as i64 - current_row as i64).abs() > 2
}

/// Inbound realtime transport messages this crate reacts to (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMessage {
    Start,
    Stop,
    Continue,
}

/// Parses a single-byte realtime transport message. `0xFA` Start, `0xFC`
/// Stop, `0xFB` Continue (treated the same as Start per §4.H: "Continue =
/// Start").
pub fn parse_transport_byte(byte: u8) -> Option<TransportMessage> {
    match byte {
        0xFA => Some(TransportMessage::Start),
        0xFB => Some(TransportMessage::Continue),
        0xFC => Some(TransportMessage::Stop),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_bpm_none_before_any_interval() {
        let recovery = ClockRecovery::new();
        assert_eq!(recovery.bpm(), None);
    }

    #[test]
    fn test_bpm_recovers_from_regular_pulses() {
        let mut recovery = ClockRecovery::new();
        // 120 BPM @ 24 PPQN -> 1 pulse every 20833us.
        for _ in 0..25 {
            recovery.on_clock_pulse();
            thread::sleep(Duration::from_micros(20_833));
        }
        let bpm = recovery.bpm().expect("should have recovered a bpm");
        assert!((bpm - 120.0).abs() < 5.0, "recovered bpm {bpm} should be close to 120");
    }

    #[test]
    fn test_outlier_interval_rejected() {
        let mut recovery = ClockRecovery::new();
        recovery.on_clock_pulse();
        thread::sleep(Duration::from_micros(20_833));
        recovery.on_clock_pulse();
        // A bogus 2-second gap should be rejected rather than corrupting the average.
        thread::sleep(Duration::from_secs(2));
        recovery.on_clock_pulse();
        let bpm = recovery.bpm().expect("bpm still available from the first good interval");
        assert!((bpm - 120.0).abs() < 10.0);
    }

    #[test]
    fn test_start_resets_window() {
        let mut recovery = ClockRecovery::new();
        recovery.on_clock_pulse();
        thread::sleep(Duration::from_micros(20_833));
        recovery.on_clock_pulse();
        assert!(recovery.bpm().is_some());
        recovery.on_start_or_continue();
        assert_eq!(recovery.bpm(), None);
    }

    #[test]
    fn test_sync_pitch_within_threshold_returns_none() {
        // module 120, clock 121 -> required ~0.9917, current 1.0, delta ~0.83%
        assert_eq!(sync_pitch(120.0, 121.0, 1.0, 2.0), None);
    }

    #[test]
    fn test_sync_pitch_beyond_threshold_returns_required() {
        let pitch = sync_pitch(120.0, 100.0, 1.0, 2.0).expect("should exceed threshold");
        assert!((pitch - 1.2).abs() < 0.001);
    }

    #[test]
    fn test_translate_spp_round_trips_order_and_row() {
        assert_eq!(translate_spp(2 * 64 + 32, 64), (2, 32));
    }

    #[test]
    fn test_should_resync_only_beyond_threshold() {
        assert!(!should_resync(10, 9));
        assert!(!should_resync(10, 8));
        assert!(should_resync(10, 7));
    }

    #[test]
    fn test_parse_transport_byte() {
        assert_eq!(parse_transport_byte(0xFA), Some(TransportMessage::Start));
        assert_eq!(parse_transport_byte(0xFB), Some(TransportMessage::Continue));
        assert_eq!(parse_transport_byte(0xFC), Some(TransportMessage::Stop));
        assert_eq!(parse_transport_byte(0x90), None);
    }
}
