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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, span, Level};

use super::{AudioError, MixGraph};
use crate::playsync::CancelHandle;

const MOCK_CALLBACK_FRAMES: usize = 256;
const MOCK_SAMPLE_RATE: u32 = 48_000;

/// A mock device. Doesn't talk to any hardware; it drives the mix graph
/// on a plain thread at a fixed cadence so transport/dispatch logic can be
/// exercised end-to-end in tests without cpal.
pub struct Device {
    name: String,
    is_running: Arc<AtomicBool>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if the device's render loop is currently running.
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        MOCK_SAMPLE_RATE
    }

    fn run(&self, graph: Arc<MixGraph>, stop: CancelHandle) -> Result<(), AudioError> {
        let span = span!(Level::INFO, "audio stream (mock)");
        let _enter = span.enter();

        info!(device = self.name, "Starting mock render loop.");
        self.is_running.store(true, Ordering::Relaxed);

        let join_handle = {
            let stop = stop.clone();
            let callback_duration = Duration::from_secs_f64(
                MOCK_CALLBACK_FRAMES as f64 / MOCK_SAMPLE_RATE as f64,
            );
            thread::spawn(move || {
                let mut out = vec![0i16; MOCK_CALLBACK_FRAMES * 2];
                let mut scratch = vec![0i16; MOCK_CALLBACK_FRAMES * 2];
                let mut f32_scratch = vec![0.0f32; MOCK_CALLBACK_FRAMES * 2];
                while !stop.is_cancelled() {
                    graph.render(&mut out, MOCK_CALLBACK_FRAMES, &mut scratch, &mut f32_scratch);
                    thread::sleep(callback_duration);
                }
            })
        };

        stop.wait();
        let _ = join_handle.join();
        self.is_running.store(false, Ordering::Relaxed);
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
    use super::*;
    use crate::testutil::polling::eventually;

    #[test]
    fn test_run_starts_and_stops_the_render_loop() {
        let device = Arc::new(Device::get("mock-audio"));
        let graph = Arc::new(MixGraph::new(MOCK_SAMPLE_RATE, 100));
        let stop = CancelHandle::new();

        let run_device = Arc::clone(&device);
        let run_graph = Arc::clone(&graph);
        let run_stop = stop.clone();
        let handle = thread::spawn(move || {
            super::super::Device::run(&*run_device, run_graph, run_stop).unwrap();
        });

        eventually(|| device.is_running(), "render loop never reported running");

        stop.cancel();
        handle.join().unwrap();

        eventually(|| !device.is_running(), "render loop never stopped after cancel");
    }
}
