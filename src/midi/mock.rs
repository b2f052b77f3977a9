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
use std::fmt;
use std::sync::Mutex;

use crossbeam_channel::Sender;

use super::MidiError;

/// A mock MIDI device. Doesn't touch real hardware; lets tests feed
/// inbound bytes and inspect outbound sends.
pub struct Device {
    name: String,
    watching: Mutex<Option<Sender<Vec<u8>>>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl Device {
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            watching: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub fn mock_event(&self, bytes: &[u8]) {
        let watching = self.watching.lock().expect("watching lock poisoned");
        if let Some(sender) = watching.as_ref() {
            sender.send(bytes.to_vec()).expect("mock receiver dropped");
        }
    }

    #[cfg(test)]
    pub fn sent_events(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    #[cfg(test)]
    pub fn clear_sent_events(&self) {
        self.sent.lock().expect("sent lock poisoned").clear();
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_input(&self) -> bool {
        true
    }

    fn has_output(&self) -> bool {
        true
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), MidiError> {
        let mut watching = self.watching.lock().expect("watching lock poisoned");
        if watching.is_some() {
            return Err(MidiError::AlreadyWatching);
        }
        *watching = Some(sender);
        Ok(())
    }

    fn stop_watch_events(&self) {
        *self.watching.lock().expect("watching lock poisoned") = None;
    }

    fn send(&self, bytes: &[u8]) -> Result<(), MidiError> {
        self.sent.lock().expect("sent lock poisoned").push(bytes.to_vec());
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::super::Device as DeviceTrait;
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_watch_events_delivers_mock_event() {
        let device = Device::get("mock-1");
        let (sender, receiver) = unbounded();
        device.watch_events(sender).unwrap();
        device.mock_event(&[0xF8]);
        assert_eq!(receiver.recv().unwrap(), vec![0xF8]);
    }

    #[test]
    fn test_watch_events_twice_errors() {
        let device = Device::get("mock-1");
        let (sender, _receiver) = unbounded();
        device.watch_events(sender).unwrap();
        let (sender2, _receiver2) = unbounded();
        assert!(device.watch_events(sender2).is_err());
    }

    #[test]
    fn test_send_records_sent_bytes() {
        let device = Device::get("mock-1");
        device.send(&[0xF8]).unwrap();
        device.send(&[0xFA]).unwrap();
        assert_eq!(device.sent_events(), vec![vec![0xF8], vec![0xFA]]);
    }
}
