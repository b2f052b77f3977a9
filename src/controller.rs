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
//! Input controllers (§5 "keyboard / MIDI ... -> (I)"): drivers push raw
//! input events onto a channel; the controller resolves them against the
//! mapping table and forwards to `dispatch::State`, on its own OS thread
//! rather than the audio thread.

use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, span, Level};

use crate::action::{Action, Source};
use crate::dispatch::State;
use crate::midi::sync::TransportMessage;

pub mod keyboard;
pub mod midi;

/// Raw input a driver hands to the controller, pre-resolution (§4.D, §4.H).
/// Keyboard/MIDI-CC/MIDI-note events still need a mapping-table lookup;
/// clock/transport/SPP bytes go straight to `dispatch::State`'s MIDI sync
/// entry points.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A literal key code, as bound in `[Keyboard]` (§6 `KEY_<code>`).
    Key(String),
    MidiCc { device: String, cc: u8, value: i32 },
    /// `device_id` distinguishes simultaneously-held notes across devices
    /// for the held-pad latch (§9); `device` is the name used for mapping
    /// lookups.
    MidiNote { device_id: u16, device: String, note: u8, is_note_on: bool },
    MidiClockPulse,
    MidiTransport(TransportMessage),
    MidiSpp(u16),
    /// The keyboard driver's own exit command; not itself an `Action` (§4.I
    /// "Quit" is process lifecycle, left to the caller rather than dispatch).
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> thread::JoinHandle<io::Result<()>>;
}

/// Runs one driver's event loop against a shared `State`, resolving
/// keyboard/CC/note events through the mapping table before dispatching.
pub struct Controller {
    handle: thread::JoinHandle<()>,
}

impl Controller {
    /// Spawns the controller thread. Returns immediately; `join` blocks
    /// until the driver's channel closes or a `Quit` event arrives.
    pub fn new(state: Arc<State>, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: thread::spawn(move || Controller::run(state, driver)),
        }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }

    fn run(state: Arc<State>, driver: Arc<dyn Driver>) {
        let span = span!(Level::INFO, "controller");
        let _enter = span.enter();

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let monitor_handle = driver.monitor_events(events_tx);

        info!("Controller started.");
        Controller::dispatch_loop(&state, &events_rx);

        match monitor_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(err = format!("{e}"), "Driver exited with an error."),
            Err(_) => error!("Driver thread panicked."),
        }
        info!("Controller closing.");
    }

    fn dispatch_loop(state: &Arc<State>, events_rx: &Receiver<Event>) {
        while let Ok(event) = events_rx.recv() {
            if Controller::handle_event(state, event) {
                return;
            }
        }
    }

    /// Returns `true` when the loop should stop (a `Quit` event).
    fn handle_event(state: &Arc<State>, event: Event) -> bool {
        match event {
            Event::Key(key) => {
                if let Some(resolved) = state.mapping().lock().resolve_key(&key) {
                    state.dispatch(resolved.action, resolved.parameter, resolved.value, Source::Keyboard);
                }
            }
            Event::MidiCc { device, cc, value } => {
                if let Some(resolved) = state.mapping().lock().resolve_cc(&device, cc, value) {
                    state.dispatch(resolved.action, resolved.parameter, resolved.value, Source::Midi);
                }
            }
            Event::MidiNote { device_id, device, note, is_note_on } => {
                let pad_index = state.mapping().lock().resolve_pad(device_id, &device, note, is_note_on);
                if let Some(pad_index) = pad_index {
                    if is_note_on {
                        state.dispatch(Action::TriggerPad, pad_index, 127, Source::Midi);
                    } else {
                        state.dispatch(Action::TriggerNotePad, pad_index, 0, Source::Midi);
                    }
                }
            }
            Event::MidiClockPulse => state.on_midi_clock_pulse(),
            Event::MidiTransport(message) => state.on_midi_transport(message),
            Event::MidiSpp(spp) => state.on_midi_spp(spp),
            Event::Quit => return true,
        }
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::MixGraph;
    use crate::decoder::mock::MockDecoder;
    use crate::mapping::{KeyBinding, MappingTable};
    use std::sync::{Mutex, Mutex as StdMutex};

    struct ScriptedDriver {
        events: Mutex<Vec<Event>>,
    }

    impl Driver for ScriptedDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> thread::JoinHandle<io::Result<()>> {
            let events = self.events.lock().unwrap().clone();
            thread::spawn(move || {
                for event in events {
                    let _ = events_tx.send(event);
                }
                Ok(())
            })
        }
    }

    fn make_state() -> Arc<State> {
        let decoder = Arc::new(StdMutex::new(Box::new(MockDecoder::new(4, 8, 2)) as Box<dyn crate::decoder::Decoder>));
        let mix = Arc::new(MixGraph::new(48_000, 100));
        let state = State::new(decoder, mix, None, Vec::new());
        *state.mapping().lock() = MappingTable::from_bindings(
            vec![KeyBinding { key: "p".to_string(), action: Action::Play, parameter: 0 }],
            Vec::new(),
            Vec::new(),
        );
        state
    }

    #[test]
    fn test_resolved_key_event_dispatches_action() {
        let state = make_state();
        let driver = Arc::new(ScriptedDriver { events: Mutex::new(vec![Event::Key("p".to_string()), Event::Quit]) });
        let controller = Controller::new(Arc::clone(&state), driver);
        controller.join().unwrap();
        assert!(state.transport().is_playing());
    }

    #[test]
    fn test_unbound_key_is_ignored() {
        let state = make_state();
        let driver = Arc::new(ScriptedDriver { events: Mutex::new(vec![Event::Key("z".to_string()), Event::Quit]) });
        let controller = Controller::new(Arc::clone(&state), driver);
        controller.join().unwrap();
        assert!(!state.transport().is_playing());
    }

    #[test]
    fn test_quit_event_stops_the_loop() {
        let state = make_state();
        let driver = Arc::new(ScriptedDriver { events: Mutex::new(vec![Event::Quit, Event::Key("p".to_string())]) });
        let controller = Controller::new(Arc::clone(&state), driver);
        controller.join().unwrap();
        assert!(!state.transport().is_playing(), "events after Quit must not be processed");
    }
}
