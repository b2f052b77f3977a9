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
//! The outbound MIDI clock thread (§4.H): paces 24 PPQN clock pulses off
//! the bpm the mix callback publishes lock-free, and emits Song Position
//! Pointer per the configured mode. Start/Stop (`0xFA`/`0xFC`) are not
//! emitted here — those come from the dispatch layer on transport actions.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing::{error, span, warn, Level};

use crate::audio::{BpmPublisher, PositionPublisher};
use crate::playsync::CancelHandle;

use super::Device;

const PPQN: f64 = 24.0;
const SPP_THROTTLE: Duration = Duration::from_millis(100);

/// How often an SPP update is emitted while the song plays (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SppInterval {
    /// Emit on order change (64 MIDI beats per pattern).
    Pattern,
    /// Emit every N rows. N must be one of 4, 8, 16, 32.
    Beats(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SppMode {
    Disabled,
    OnStop,
    DuringPlayback(SppInterval),
}

#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    pub send_clock: bool,
    pub spp_mode: SppMode,
    pub speed_compensation: bool,
}

impl Default for ClockConfig {
    fn default() -> ClockConfig {
        ClockConfig { send_clock: true, spp_mode: SppMode::Disabled, speed_compensation: false }
    }
}

/// `spp = order * 64 + (row * 64 / pattern_rows)`, optionally scaled by
/// `6 / speed` so receivers at a different ticks/row stay aligned (§4.H).
fn compute_spp(order: u32, row: u32, pattern_rows: u32, speed: u8, speed_compensation: bool) -> u16 {
    let base = order * 64 + (row * 64 / pattern_rows.max(1));
    let scaled = if speed_compensation {
        (base as f32 * 6.0 / speed.max(1) as f32) as u32
    } else {
        base
    };
    scaled.min(0x3FFF) as u16
}

fn spp_bytes(spp: u16) -> [u8; 3] {
    [0xF2, (spp & 0x7F) as u8, ((spp >> 7) & 0x7F) as u8]
}

fn beat_boundary(row: u32, interval: SppInterval) -> u32 {
    match interval {
        SppInterval::Pattern => 0,
        SppInterval::Beats(n) => row / (n.max(1) as u32),
    }
}

/// Owns the shared, UI-mutable clock configuration and spawns the clock
/// thread against a given device/bpm/position triple.
pub struct ClockThread {
    config: Arc<Mutex<ClockConfig>>,
}

impl ClockThread {
    pub fn new(config: ClockConfig) -> ClockThread {
        ClockThread { config: Arc::new(Mutex::new(config)) }
    }

    pub fn config(&self) -> Arc<Mutex<ClockConfig>> {
        Arc::clone(&self.config)
    }

    /// Spawns the clock thread. `device` is `None` when MIDI is disabled
    /// (§7 graceful degradation) — the thread still runs but sends nothing.
    pub fn spawn(
        &self,
        device: Option<Arc<dyn Device>>,
        bpm: Arc<BpmPublisher>,
        position: Arc<PositionPublisher>,
        stop: CancelHandle,
    ) -> thread::JoinHandle<()> {
        let config = Arc::clone(&self.config);

        thread::Builder::new()
            .name("regroove-midi-clock".into())
            .spawn(move || {
                let span = span!(Level::INFO, "midi clock thread");
                let _enter = span.enter();

                if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
                    warn!(err = format!("{:?}", e), "Unable to raise MIDI clock thread priority.");
                }

                let mut last_order = position.read().0;
                let mut last_beat_boundary = 0u32;
                let mut was_playing = position.read().4;
                let mut last_spp_sent: Option<Instant> = None;

                while !stop.is_cancelled() {
                    let (bpm_value, _phase) = bpm.read();
                    let tick_us = 60_000_000.0 / (bpm_value.max(1.0) as f64 * PPQN);
                    spin_sleep::sleep(Duration::from_micros(tick_us as u64));

                    if stop.is_cancelled() {
                        break;
                    }

                    let cfg = *config.lock();
                    let (order, row, pattern_rows, speed, playing) = position.read();

                    if let Some(device) = device.as_ref() {
                        if cfg.send_clock {
                            if let Err(e) = device.send(&[0xF8]) {
                                error!(err = format!("{:?}", e), "Error sending MIDI clock pulse.");
                            }
                        }

                        let mut emit = false;
                        match cfg.spp_mode {
                            SppMode::Disabled => {}
                            SppMode::OnStop => emit = was_playing && !playing,
                            SppMode::DuringPlayback(interval) => {
                                if playing {
                                    emit = match interval {
                                        SppInterval::Pattern => order != last_order,
                                        SppInterval::Beats(_) => {
                                            beat_boundary(row, interval) != last_beat_boundary
                                        }
                                    };
                                }
                            }
                        }

                        if emit {
                            let throttled = last_spp_sent.is_some_and(|t| t.elapsed() < SPP_THROTTLE);
                            if !throttled {
                                let spp = compute_spp(order, row, pattern_rows, speed, cfg.speed_compensation);
                                if let Err(e) = device.send(&spp_bytes(spp)) {
                                    error!(err = format!("{:?}", e), "Error sending MIDI SPP.");
                                }
                                last_spp_sent = Some(Instant::now());
                            }
                        }
                    }

                    if let SppMode::DuringPlayback(interval) = cfg.spp_mode {
                        last_beat_boundary = beat_boundary(row, interval);
                    }
                    last_order = order;
                    was_playing = playing;
                }
            })
            .expect("failed to spawn MIDI clock thread")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::midi::mock::Device as MockDevice;
    use crate::midi::Device as MidiDevice;

    #[test]
    fn test_compute_spp_without_compensation() {
        assert_eq!(compute_spp(2, 32, 64, 6, false), 2 * 64 + 32);
    }

    #[test]
    fn test_compute_spp_with_speed_compensation() {
        // base = 64; speed 3 -> scale by 6/3 = 2.0
        assert_eq!(compute_spp(1, 0, 64, 3, true), 128);
    }

    #[test]
    fn test_spp_bytes_split_14_bit() {
        let bytes = spp_bytes(0x0081); // 129
        assert_eq!(bytes, [0xF2, 0x01, 0x01]);
    }

    #[test]
    fn test_beat_boundary_pattern_interval_is_zero() {
        assert_eq!(beat_boundary(99, SppInterval::Pattern), 0);
    }

    #[test]
    fn test_beat_boundary_beats_interval_divides_rows() {
        assert_eq!(beat_boundary(33, SppInterval::Beats(16)), 2);
    }

    #[test]
    fn test_clock_thread_sends_pulses() {
        let clock = ClockThread::new(ClockConfig { send_clock: true, ..Default::default() });
        let mock_device = Arc::new(MockDevice::get("mock-clock"));
        let device: Arc<dyn MidiDevice> = mock_device.clone();
        let bpm = Arc::new(BpmPublisher::new());
        bpm.publish(6000.0, 0.0); // absurdly fast so the test doesn't sleep long
        let position = Arc::new(PositionPublisher::new());
        let stop = CancelHandle::new();

        let stop_clone = stop.clone();
        let handle = clock.spawn(Some(device), bpm, position, stop_clone);
        thread::sleep(Duration::from_millis(50));
        stop.cancel();
        handle.join().expect("clock thread panicked");

        assert!(!mock_device.sent_events().is_empty(), "expected at least one clock pulse");
    }
}
