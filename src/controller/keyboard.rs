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
//! A controller driver that reads key codes from standard input, one per
//! line (§4.D `[Keyboard] KEY_<code>`). `quit`/`q` exits the process loop.

use std::io::{self, BufRead, Write};

use crossbeam_channel::Sender;
use tracing::{info, span, Level};

use super::Event;

/// Reads one key code per line from stdin and forwards it to the
/// controller (§5). Runs on its own OS thread since `stdin().lines()`
/// blocks.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> std::thread::JoinHandle<io::Result<()>> {
        std::thread::spawn(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();
            info!("Keyboard driver started.");

            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line?;
                let key = line.trim();
                if key.is_empty() {
                    continue;
                }
                if key == "quit" || key == "q" {
                    let _ = events_tx.send(Event::Quit);
                    return Ok(());
                }
                if events_tx.send(Event::Key(key.to_string())).is_err() {
                    return Ok(());
                }
                print!("> ");
                io::stdout().flush()?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::Driver as DriverTrait;
    use std::time::Duration;

    #[test]
    fn test_new_builds_driver() {
        let _driver = Driver::new();
    }

    #[test]
    fn test_unused_driver_handle_can_be_dropped() {
        // monitor_events spawns a thread that blocks on real stdin in this
        // process; we only check construction doesn't panic, matching the
        // shape of the equivalent check elsewhere in this module.
        let driver = Driver::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let handle = DriverTrait::monitor_events(&driver, tx);
        std::thread::sleep(Duration::from_millis(1));
        drop(handle);
    }
}
