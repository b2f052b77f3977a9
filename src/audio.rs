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
//! Audio device enumeration and the render/capture mix graph (§4.A-C, §5).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::playsync::CancelHandle;

mod cpal;
mod mixer;
pub mod mock;

pub use mixer::{Bus, BpmPublisher, FxRoute, MixGraph, PositionPublisher};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio device found with name {0}")]
    DeviceNotFound(String),
    #[error("error enumerating audio devices: {0}")]
    Enumeration(String),
    #[error("error opening audio stream: {0}")]
    Stream(String),
}

/// An audio device capable of running the mix graph against real hardware
/// (or, for `mock::Device`, a stand-in that runs it on a timer thread).
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// The sample rate this device will run the mix graph at.
    fn sample_rate(&self) -> u32;

    /// Runs the mix graph until `stop` is signalled. Opens the output
    /// stream (and the input stream, if `graph` has a capture ring) and
    /// blocks the calling thread; the render/capture callbacks themselves
    /// run on driver-owned threads.
    fn run(&self, graph: Arc<MixGraph>, stop: CancelHandle) -> Result<(), AudioError>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, AudioError> {
    cpal::Device::list()
}

/// Gets a device with the given name. Names starting with `mock` resolve
/// to the in-process mock device used by tests.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, AudioError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    }

    Ok(Arc::new(cpal::Device::get(name)?))
}

#[cfg(test)]
pub mod test {
    // Reexport the mock device directly for testing.
    pub use super::mock::Device;
}
