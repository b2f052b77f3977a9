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
//! A controller driver that classifies inbound raw MIDI bytes (§4.H wire
//! format) into controller `Event`s: realtime clock/transport bytes, SPP,
//! and channel messages (CC, note on/off) resolved later by the mapping
//! table.

use std::io;
use std::sync::Arc;

use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{error, info, span, Level};

use crate::midi::{self, sync::parse_transport_byte};

use super::Event;

/// A controller that classifies a single MIDI device's inbound bytes
/// (§4.H). `device_id` distinguishes this device from others for the
/// held-pad latch (§9); the device's `name()` is the string mapping
/// bindings key on.
pub struct Driver {
    device: Arc<dyn midi::Device>,
    device_id: u16,
}

impl Driver {
    pub fn new(device: Arc<dyn midi::Device>, device_id: u16) -> Driver {
        Driver { device, device_id }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: crossbeam_channel::Sender<Event>) -> std::thread::JoinHandle<io::Result<()>> {
        let (midi_bytes_tx, midi_bytes_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let device = self.device.clone();
        let device_id = self.device_id;
        let device_name = device.name();

        std::thread::spawn(move || {
            let span = span!(Level::INFO, "MIDI driver", device = device_name.as_str());
            let _enter = span.enter();
            info!("MIDI driver started.");

            device
                .watch_events(midi_bytes_tx)
                .map_err(|e| io::Error::other(e.to_string()))?;

            while let Ok(raw) = midi_bytes_rx.recv() {
                let Some(event) = classify(&raw, device_id, &device_name) else {
                    continue;
                };
                if events_tx.send(event).is_err() {
                    return Ok(());
                }
            }
            info!("MIDI watcher closed.");
            Ok(())
        })
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.device.stop_watch_events();
    }
}

/// Classifies one raw inbound MIDI message (§4.H): realtime clock/
/// transport bytes first (they're single bytes, which `LiveEvent::parse`
/// also accepts but this crate's own sync layer already has dedicated
/// byte constants), then `0xF2` SPP, then channel messages via `midly`.
/// Non-matching SysEx and anything else unparseable is ignored (§7
/// "non-matching SysEx is ignored").
fn classify(raw: &[u8], device_id: u16, device_name: &str) -> Option<Event> {
    if raw.len() == 1 && raw[0] == 0xF8 {
        return Some(Event::MidiClockPulse);
    }
    if raw.len() == 1 {
        if let Some(message) = parse_transport_byte(raw[0]) {
            return Some(Event::MidiTransport(message));
        }
    }
    if raw.len() == 3 && raw[0] == 0xF2 {
        let spp = (raw[1] as u16) | ((raw[2] as u16) << 7);
        return Some(Event::MidiSpp(spp));
    }

    match LiveEvent::parse(raw) {
        Ok(LiveEvent::Midi { message, .. }) => match message {
            MidiMessage::Controller { controller, value } => Some(Event::MidiCc {
                device: device_name.to_string(),
                cc: controller.as_int(),
                value: value.as_int() as i32,
            }),
            MidiMessage::NoteOn { key, vel } => Some(Event::MidiNote {
                device_id,
                device: device_name.to_string(),
                note: key.as_int(),
                is_note_on: vel.as_int() > 0,
            }),
            MidiMessage::NoteOff { key, .. } => Some(Event::MidiNote {
                device_id,
                device: device_name.to_string(),
                note: key.as_int(),
                is_note_on: false,
            }),
            _ => None,
        },
        Ok(_) => None,
        Err(e) => {
            error!(err = format!("{e:?}"), "Error parsing inbound MIDI event.");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::Driver as DriverTrait;
    use crate::midi::mock::Device as MockMidiDevice;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_classify_clock_pulse() {
        assert_eq!(classify(&[0xF8], 0, "dev"), Some(Event::MidiClockPulse));
    }

    #[test]
    fn test_classify_transport_bytes() {
        assert_eq!(
            classify(&[0xFA], 0, "dev"),
            Some(Event::MidiTransport(crate::midi::sync::TransportMessage::Start))
        );
        assert_eq!(
            classify(&[0xFC], 0, "dev"),
            Some(Event::MidiTransport(crate::midi::sync::TransportMessage::Stop))
        );
    }

    #[test]
    fn test_classify_spp() {
        assert_eq!(classify(&[0xF2, 32, 2], 0, "dev"), Some(Event::MidiSpp(2 * 128 + 32)));
    }

    #[test]
    fn test_classify_control_change() {
        let mut buf = Vec::new();
        LiveEvent::Midi { channel: 0.into(), message: MidiMessage::Controller { controller: 7.into(), value: 100.into() } }
            .write(&mut buf)
            .unwrap();
        assert_eq!(
            classify(&buf, 0, "dev"),
            Some(Event::MidiCc { device: "dev".to_string(), cc: 7, value: 100 })
        );
    }

    #[test]
    fn test_classify_note_on_and_off() {
        let mut on = Vec::new();
        LiveEvent::Midi { channel: 0.into(), message: MidiMessage::NoteOn { key: 40.into(), vel: 100.into() } }
            .write(&mut on)
            .unwrap();
        assert_eq!(
            classify(&on, 3, "dev"),
            Some(Event::MidiNote { device_id: 3, device: "dev".to_string(), note: 40, is_note_on: true })
        );

        let mut off = Vec::new();
        LiveEvent::Midi { channel: 0.into(), message: MidiMessage::NoteOff { key: 40.into(), vel: 0.into() } }
            .write(&mut off)
            .unwrap();
        assert_eq!(
            classify(&off, 3, "dev"),
            Some(Event::MidiNote { device_id: 3, device: "dev".to_string(), note: 40, is_note_on: false })
        );
    }

    #[test]
    fn test_classify_note_on_velocity_zero_is_note_off() {
        let mut buf = Vec::new();
        LiveEvent::Midi { channel: 0.into(), message: MidiMessage::NoteOn { key: 40.into(), vel: 0.into() } }
            .write(&mut buf)
            .unwrap();
        assert_eq!(
            classify(&buf, 0, "dev"),
            Some(Event::MidiNote { device_id: 0, device: "dev".to_string(), note: 40, is_note_on: false })
        );
    }

    #[test]
    fn test_driver_forwards_classified_events() {
        let device = Arc::new(MockMidiDevice::get("mock-midi"));
        let driver = Driver::new(device.clone(), 0);
        let (tx, rx) = crossbeam_channel::unbounded();
        let _handle = DriverTrait::monitor_events(&driver, tx);

        std::thread::sleep(Duration::from_millis(10));
        device.mock_event(&[0xF8]);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), Event::MidiClockPulse);
    }
}
