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
//! MIDI I/O (§4.H): port enumeration, inbound raw-byte delivery, and
//! outbound raw-byte sends. The clock thread (`clock`) and inbound sync
//! recovery (`sync`) build on top of the `Device` trait here.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use thiserror::Error;

use crate::audio::{BpmPublisher, PositionPublisher};
use crate::playsync::CancelHandle;

pub mod clock;
mod midir;
pub mod mock;
pub mod sync;

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("no MIDI device found with name {0}")]
    DeviceNotFound(String),
    #[error("error enumerating MIDI devices: {0}")]
    Enumeration(String),
    #[error("error opening MIDI port: {0}")]
    Port(String),
    #[error("already watching events on this device")]
    AlreadyWatching,
}

/// A MIDI device with an optional input port and an optional output port
/// (§4.H, §6). Raw bytes in, raw bytes out; parsing (clock/SPP/CC/note)
/// happens above this trait.
pub trait Device: fmt::Display + Send + Sync {
    fn name(&self) -> String;
    fn has_input(&self) -> bool;
    fn has_output(&self) -> bool;

    /// Starts delivering raw inbound MIDI messages to `sender`. Returns
    /// `MidiError::AlreadyWatching` if already watching.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), MidiError>;

    /// Stops watching events, dropping the input connection.
    fn stop_watch_events(&self);

    /// Sends a raw MIDI message out the output port. A no-op (not an
    /// error) if this device has no output port, matching the "MIDI
    /// disabled ⇒ app runs" degradation in §7.
    fn send(&self, bytes: &[u8]) -> Result<(), MidiError>;
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, MidiError> {
    midir::list()
}

/// Gets a device with the given name. Names starting with `mock` resolve
/// to the in-process mock device used by tests.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, MidiError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    }

    Ok(Arc::new(midir::get(name)?))
}

/// Owns one opened MIDI device plus the clock/sync state layered on top of
/// it (§4.H). `dispatch::State.midi` is `Option<Arc<Handle>>` — absent
/// when no `-m` port was given, which degrades the app to MIDI-off rather
/// than failing (§7).
pub struct Handle {
    device: Arc<dyn Device>,
    clock: clock::ClockThread,
    recovery: Mutex<sync::ClockRecovery>,
    send_transport: AtomicBool,
    receive_transport: AtomicBool,
    sync_tempo: AtomicBool,
    sync_threshold_bits: AtomicU32,
}

impl Handle {
    pub fn new(device: Arc<dyn Device>, clock_config: clock::ClockConfig) -> Handle {
        Handle {
            device,
            clock: clock::ClockThread::new(clock_config),
            recovery: Mutex::new(sync::ClockRecovery::new()),
            send_transport: AtomicBool::new(false),
            receive_transport: AtomicBool::new(false),
            sync_tempo: AtomicBool::new(false),
            sync_threshold_bits: AtomicU32::new(2.0f32.to_bits()),
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn clock_config(&self) -> Arc<Mutex<clock::ClockConfig>> {
        self.clock.config()
    }

    /// Spawns the outbound clock/SPP thread (§4.H). Called once at
    /// startup wiring; `stop` is shared with the rest of the process's
    /// threads so a single cancellation unwinds everything.
    pub fn spawn_clock_thread(
        &self,
        bpm: Arc<BpmPublisher>,
        position: Arc<PositionPublisher>,
        stop: CancelHandle,
    ) -> thread::JoinHandle<()> {
        self.clock.spawn(Some(Arc::clone(&self.device)), bpm, position, stop)
    }

    pub fn send(&self, bytes: &[u8]) -> Result<(), MidiError> {
        self.device.send(bytes)
    }

    pub fn send_transport(&self) -> bool {
        self.send_transport.load(Ordering::Relaxed)
    }

    pub fn set_send_transport(&self, enabled: bool) {
        self.send_transport.store(enabled, Ordering::Relaxed);
    }

    pub fn receive_transport(&self) -> bool {
        self.receive_transport.load(Ordering::Relaxed)
    }

    pub fn set_receive_transport(&self, enabled: bool) {
        self.receive_transport.store(enabled, Ordering::Relaxed);
    }

    pub fn sync_tempo(&self) -> bool {
        self.sync_tempo.load(Ordering::Relaxed)
    }

    pub fn set_sync_tempo(&self, enabled: bool) {
        self.sync_tempo.store(enabled, Ordering::Relaxed);
    }

    pub fn sync_threshold_percent(&self) -> f32 {
        f32::from_bits(self.sync_threshold_bits.load(Ordering::Relaxed))
    }

    pub fn set_sync_threshold_percent(&self, percent: f32) {
        self.sync_threshold_bits.store(percent.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Feeds an inbound `0xF8` clock pulse into the rolling-average
    /// recovery window (§4.H).
    pub fn on_clock_pulse(&self) {
        self.recovery.lock().on_clock_pulse();
    }

    /// Resets the recovery window on inbound Start/Continue (§9 decision).
    pub fn on_start_or_continue(&self) {
        self.recovery.lock().on_start_or_continue();
    }

    pub fn recovered_bpm(&self) -> Option<f32> {
        self.recovery.lock().bpm()
    }
}

#[cfg(test)]
pub mod test {
    pub use super::mock::Device;
}

#[cfg(test)]
mod handle_test {
    use super::*;

    fn handle() -> Handle {
        let device: Arc<dyn Device> = Arc::new(mock::Device::get("mock-handle"));
        Handle::new(device, clock::ClockConfig::default())
    }

    #[test]
    fn test_toggles_default_off() {
        let h = handle();
        assert!(!h.send_transport());
        assert!(!h.receive_transport());
        assert!(!h.sync_tempo());
    }

    #[test]
    fn test_toggles_round_trip() {
        let h = handle();
        h.set_send_transport(true);
        h.set_receive_transport(true);
        h.set_sync_tempo(true);
        assert!(h.send_transport());
        assert!(h.receive_transport());
        assert!(h.sync_tempo());
    }

    #[test]
    fn test_clock_recovery_resets_on_start() {
        let h = handle();
        h.on_clock_pulse();
        h.on_start_or_continue();
        assert_eq!(h.recovered_bpm(), None);
    }
}
