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
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Mutex;

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};
use tracing::{debug, error, info, span, warn, Level};

use super::MidiError;

pub struct Device {
    name: String,
    input_port: Option<MidiInputPort>,
    output_port: Option<MidiOutputPort>,
    input_connection: Mutex<Option<MidiInputConnection<()>>>,
    output_connection: Mutex<Option<MidiOutputConnection>>,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_input(&self) -> bool {
        self.input_port.is_some()
    }

    fn has_output(&self) -> bool {
        self.output_port.is_some()
    }

    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), MidiError> {
        let span = span!(Level::INFO, "watch events (midir)");
        let _enter = span.enter();

        let mut connection = self.input_connection.lock().expect("midi input lock poisoned");
        if connection.is_some() {
            return Err(MidiError::AlreadyWatching);
        }

        let input_port = match self.input_port.as_ref() {
            Some(port) => port,
            None => {
                warn!(device = self.name, "No MIDI input port configured, cannot watch events.");
                return Ok(());
            }
        };

        let input = MidiInput::new("regroove input").map_err(|e| MidiError::Port(e.to_string()))?;
        info!(device = self.name, "Watching MIDI events.");
        *connection = Some(
            input
                .connect(
                    input_port,
                    "regroove input watcher",
                    move |_stamp, raw_event, _| {
                        debug!(bytes = format!("{:?}", raw_event), "Received MIDI event.");
                        if let Err(e) = sender.try_send(Vec::from(raw_event)) {
                            error!(err = format!("{:?}", e), "Error forwarding MIDI event.");
                        }
                    },
                    (),
                )
                .map_err(|e| MidiError::Port(e.to_string()))?,
        );

        Ok(())
    }

    fn stop_watch_events(&self) {
        let connection = self.input_connection.lock().expect("midi input lock poisoned").take();
        mem::drop(connection);
    }

    fn send(&self, bytes: &[u8]) -> Result<(), MidiError> {
        let output_port = match &self.output_port {
            Some(port) => port,
            None => return Ok(()),
        };

        let mut guard = self.output_connection.lock().expect("midi output lock poisoned");
        if guard.is_none() {
            let output = MidiOutput::new("regroove output").map_err(|e| MidiError::Port(e.to_string()))?;
            *guard = Some(
                output
                    .connect(output_port, "regroove output")
                    .map_err(|e| MidiError::Port(e.to_string()))?,
            );
        }

        guard
            .as_mut()
            .expect("just populated above")
            .send(bytes)
            .map_err(|e| MidiError::Port(e.to_string()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut capabilities: Vec<String> = Vec::new();
        if self.input_port.is_some() {
            capabilities.push(String::from("Input"));
        }
        if self.output_port.is_some() {
            capabilities.push(String::from("Output"));
        }

        write!(f, "{} ({})", self.name, capabilities.join("/"))
    }
}

pub fn list() -> Result<Vec<Box<dyn super::Device>>, MidiError> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

fn list_midir_devices() -> Result<Vec<Device>, MidiError> {
    let input = MidiInput::new("regroove input listing").map_err(|e| MidiError::Enumeration(e.to_string()))?;
    let output = MidiOutput::new("regroove output listing").map_err(|e| MidiError::Enumeration(e.to_string()))?;

    let mut devices: HashMap<String, Device> = HashMap::new();

    for port in input.ports() {
        let name = input.port_name(&port).map_err(|e| MidiError::Enumeration(e.to_string()))?;
        devices.entry(name.clone()).or_insert_with(|| Device {
            name: name.clone(),
            input_port: None,
            output_port: None,
            input_connection: Mutex::new(None),
            output_connection: Mutex::new(None),
        });
        devices.get_mut(&name).expect("just inserted above").input_port = Some(port);
    }

    for port in output.ports() {
        let name = output.port_name(&port).map_err(|e| MidiError::Enumeration(e.to_string()))?;
        devices.entry(name.clone()).or_insert_with(|| Device {
            name: name.clone(),
            input_port: None,
            output_port: None,
            input_connection: Mutex::new(None),
            output_connection: Mutex::new(None),
        });
        devices.get_mut(&name).expect("just inserted above").output_port = Some(port);
    }

    let mut sorted_devices = devices.into_values().collect::<Vec<Device>>();
    sorted_devices.sort_by_key(|device| device.name.clone());
    Ok(sorted_devices)
}

pub fn get(name: &str) -> Result<Device, MidiError> {
    let mut matches = list_midir_devices()?
        .into_iter()
        .filter(|device| device.name.contains(name))
        .collect::<Vec<Device>>();

    if matches.is_empty() {
        return Err(MidiError::DeviceNotFound(name.to_string()));
    }
    if matches.len() > 1 {
        return Err(MidiError::Enumeration(format!(
            "found too many devices that match '{}' ({}), use a less ambiguous name",
            name,
            matches.iter().map(|d| d.name.clone()).collect::<Vec<String>>().join(", ")
        )));
    }

    Ok(matches.swap_remove(0))
}
