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
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use super::{AudioError, MixGraph};
use crate::playsync::CancelHandle;

/// A small wrapper around a cpal::Device. Used for storing some extra
/// data that makes the device listing and selection convenient.
pub struct Device {
    name: String,
    max_channels: u16,
    host_id: cpal::HostId,
    sample_rate: u32,
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name,
            self.max_channels,
            self.sample_rate,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, AudioError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, AudioError> {
        // Suppress noisy output here (SPEC_FULL §F: device enumeration
        // does not spam stderr with host library chatter).
        let _shh_stdout =
            shh::stdout().map_err(|e| AudioError::Enumeration(e.to_string()))?;
        let _shh_stderr =
            shh::stderr().map_err(|e| AudioError::Enumeration(e.to_string()))?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = cpal::host_from_id(host_id)
                .map_err(|e| AudioError::Enumeration(e.to_string()))?
                .devices()
                .map_err(|e| AudioError::Enumeration(e.to_string()))?;

            for device in host_devices {
                let mut max_channels = 0;
                let mut sample_rate = 48_000;
                if let Ok(configs) = device.supported_output_configs() {
                    for output_config in configs {
                        if max_channels < output_config.channels() {
                            max_channels = output_config.channels();
                            sample_rate = output_config.max_sample_rate().0;
                        }
                    }
                }

                if max_channels > 0 {
                    let name = device.name().unwrap_or_default();
                    devices.push(Device {
                        name,
                        max_channels,
                        host_id,
                        sample_rate,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device.
    pub fn get(name: &str) -> Result<Device, AudioError> {
        Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name == *name)
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn run(&self, graph: Arc<MixGraph>, stop: CancelHandle) -> Result<(), AudioError> {
        let span = span!(Level::INFO, "audio stream (cpal)");
        let _enter = span.enter();

        info!(device = self.name, "Opening audio stream.");

        let channels = 2u16.min(self.max_channels).max(2);
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(graph.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let render_graph = Arc::clone(&graph);
        let mut scratch: Vec<i16> = Vec::new();
        let mut f32_scratch: Vec<f32> = Vec::new();
        let output_stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    let frames = data.len() / 2;
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0);
                    }
                    if f32_scratch.len() < data.len() {
                        f32_scratch.resize(data.len(), 0.0);
                    }
                    render_graph.render(data, frames, &mut scratch[..data.len()], &mut f32_scratch[..data.len()]);
                },
                |err: cpal::StreamError| {
                    error!(err = err.to_string(), "Error during output stream.");
                },
                None,
            )
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let capture_ring = graph.capture_ring();
        let input_stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[i16], _| {
                    capture_ring.write(data);
                },
                |err: cpal::StreamError| {
                    error!(err = err.to_string(), "Error during input stream.");
                },
                None,
            )
            .ok();

        output_stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
        if let Some(input_stream) = &input_stream {
            if let Err(e) = input_stream.play() {
                error!(err = e.to_string(), "Input stream unavailable; continuing without capture.");
            }
        }

        stop.wait();
        Ok(())
    }
}
