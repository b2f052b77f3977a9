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
//! The performance timeline (§4.F): records `(row, action, parameter,
//! value)` events against a single monotonic row counter and replays them
//! on playback. Owned by the dispatcher, which holds the only handle to
//! it (§4.I).

use crate::action::Action;

/// A single recorded event (§4.F, §6 `EVT_<order>_<row>`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceEvent {
    pub row: u32,
    pub action: Action,
    pub parameter: i32,
    pub value: f32,
}

/// Records and replays performance events against `performance_row`
/// (§4.F). The `execute` callback is the same action-to-effect translator
/// the dispatcher uses for live actions (§4.I step 5); the timeline calls
/// it directly on replay so playback-sourced events are never re-recorded.
pub struct PerformanceTimeline {
    events: Vec<PerformanceEvent>,
    performance_row: u32,
    playback_index: usize,
    recording: bool,
    playback: bool,
    execute: Box<dyn FnMut(Action, i32, i32) + Send>,
}

impl PerformanceTimeline {
    pub fn new(execute: Box<dyn FnMut(Action, i32, i32) + Send>) -> PerformanceTimeline {
        PerformanceTimeline {
            events: Vec::new(),
            performance_row: 0,
            playback_index: 0,
            recording: false,
            playback: false,
            execute,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_playback(&self) -> bool {
        self.playback
    }

    pub fn performance_row(&self) -> u32 {
        self.performance_row
    }

    pub fn events(&self) -> &[PerformanceEvent] {
        &self.events
    }

    /// Replaces the event list wholesale, as when loading a recorded
    /// performance back off disk (§4.J, §8 R2). Leaves recording/playback
    /// mode and the row counter untouched; callers that want a clean
    /// replay call `reset()` afterward.
    pub fn load_events(&mut self, events: Vec<PerformanceEvent>) {
        self.events = events;
        self.playback_index = 0;
    }

    /// `set_recording(true)`: clears events, resets the row, cancels
    /// playback. `set_recording(false)` reports whether an RGX save
    /// should be triggered (event count > 0, per §4.F).
    pub fn set_recording(&mut self, recording: bool) -> bool {
        if recording {
            self.events.clear();
            self.performance_row = 0;
            self.playback_index = 0;
            self.playback = false;
            self.recording = true;
            false
        } else {
            self.recording = false;
            !self.events.is_empty()
        }
    }

    /// `set_playback(true)`: resets the row and playback index; row 0 is
    /// dispatched immediately since "the first row is row 0" (§4.F).
    pub fn set_playback(&mut self, playback: bool) {
        self.playback = playback;
        if playback {
            self.performance_row = 0;
            self.playback_index = 0;
            self.dispatch_due_events();
        }
    }

    /// Zeroes the row and playback index only, leaving recorded events and
    /// mode flags untouched (§4.F `reset()`).
    pub fn reset(&mut self) {
        self.performance_row = 0;
        self.playback_index = 0;
    }

    /// The dispatcher's entry point (§4.I step 4): records the action at
    /// the current row if recording and not itself a playback-sourced
    /// event, then always executes it.
    pub fn handle_action(&mut self, action: Action, parameter: i32, value: i32, from_playback: bool) {
        if self.recording && !from_playback {
            self.record(action, parameter, value);
        }
        (self.execute)(action, parameter, value);
    }

    /// Inserts a new event keeping `events` sorted by row; events sharing
    /// a row keep recording order (stable insert after same-row events,
    /// §4.F "dispatched in the order they were recorded").
    fn record(&mut self, action: Action, parameter: i32, value: i32) {
        let row = self.performance_row;
        let mut pos = self.events.len();
        while pos > 0 && self.events[pos - 1].row > row {
            pos -= 1;
        }
        self.events.insert(pos, PerformanceEvent { row, action, parameter, value: value as f32 });
    }

    /// Called once per row callback while `playing` (§4.F): advances the
    /// monotonic counter and, in playback mode, fires any events due at
    /// the new row.
    pub fn advance_row(&mut self) {
        self.performance_row += 1;
        if self.playback {
            self.dispatch_due_events();
        }
    }

    fn dispatch_due_events(&mut self) {
        while self.playback_index < self.events.len()
            && self.events[self.playback_index].row == self.performance_row
        {
            let event = self.events[self.playback_index];
            self.playback_index += 1;
            (self.execute)(event.action, event.parameter, event.value as i32);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_execute() -> (Box<dyn FnMut(Action, i32, i32) + Send>, Arc<Mutex<Vec<(Action, i32, i32)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let execute = Box::new(move |a: Action, p: i32, v: i32| {
            log_clone.lock().unwrap().push((a, p, v));
        });
        (execute, log)
    }

    #[test]
    fn test_row_frozen_until_playing() {
        let (execute, _) = recording_execute();
        let timeline = PerformanceTimeline::new(execute);
        assert_eq!(timeline.performance_row(), 0);
        // advance_row is only ever called from the row callback while
        // playing (§9 Q1); constructing without calling it must leave the
        // row at 0, matching the spec's stated (non-bug) behavior.
    }

    #[test]
    fn test_recording_captures_current_row() {
        let (execute, log) = recording_execute();
        let mut timeline = PerformanceTimeline::new(execute);
        timeline.set_recording(true);
        timeline.advance_row();
        timeline.advance_row();
        timeline.handle_action(Action::Mute, 1, 0, false);
        assert_eq!(timeline.events()[0].row, 2);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_playback_from_flag_is_not_rerecorded() {
        let (execute, _) = recording_execute();
        let mut timeline = PerformanceTimeline::new(execute);
        timeline.set_recording(true);
        timeline.handle_action(Action::Play, 0, 0, true);
        assert!(timeline.events().is_empty());
    }

    #[test]
    fn test_playback_fires_row_zero_events_immediately() {
        let (execute, log) = recording_execute();
        let mut timeline = PerformanceTimeline::new(execute);
        timeline.set_recording(true);
        timeline.handle_action(Action::Mute, 0, 0, false);
        timeline.set_recording(false);

        timeline.set_playback(true);
        assert_eq!(log.lock().unwrap().len(), 1, "row-0 event should fire on set_playback(true)");
    }

    #[test]
    fn test_same_row_events_dispatch_in_recorded_order() {
        let (execute, log) = recording_execute();
        let mut timeline = PerformanceTimeline::new(execute);
        timeline.set_recording(true);
        timeline.handle_action(Action::Mute, 1, 0, false);
        timeline.handle_action(Action::Solo, 2, 0, false);
        timeline.set_recording(false);
        log.lock().unwrap().clear();

        timeline.set_playback(true);
        let entries = log.lock().unwrap();
        assert_eq!(entries[0], (Action::Mute, 1, 0));
        assert_eq!(entries[1], (Action::Solo, 2, 0));
    }

    #[test]
    fn test_set_recording_false_reports_save_needed() {
        let (execute, _) = recording_execute();
        let mut timeline = PerformanceTimeline::new(execute);
        timeline.set_recording(true);
        timeline.handle_action(Action::Mute, 0, 0, false);
        assert!(timeline.set_recording(false));
    }

    #[test]
    fn test_reset_zeroes_row_and_index_only() {
        let (execute, _) = recording_execute();
        let mut timeline = PerformanceTimeline::new(execute);
        timeline.set_recording(true);
        timeline.handle_action(Action::Mute, 0, 0, false);
        timeline.set_recording(false);
        timeline.advance_row();
        timeline.reset();
        assert_eq!(timeline.performance_row(), 0);
        assert_eq!(timeline.events().len(), 1, "reset must not clear recorded events");
    }
}
