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
//! The phrase engine (§4.G): a phrase is a position-indexed script of
//! actions that fires as the decoder's row counter advances, exclusive
//! with user-initiated transport control.

use crate::action::Action;

/// A single phrase step: fires `action` once `rows_since_start` reaches
/// `position_rows` (§4.G).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhraseStep {
    pub position_rows: u32,
    pub action: Action,
    pub parameter: i32,
    pub value: i32,
}

#[derive(Debug, Clone)]
pub struct Phrase {
    pub name: String,
    pub steps: Vec<PhraseStep>,
}

struct ActivePhrase {
    index: usize,
    step_cursor: usize,
    rows_since_start: u32,
}

/// Drives phrase playback (§4.G). `pre_reset`/`post_reset` clear
/// effect/mute-shadow state on trigger/completion; `execute` is the same
/// action-to-effect translator the dispatcher uses for live actions;
/// `is_playing` lets completion decide whether to reset to order 0.
pub struct PhraseEngine {
    phrases: Vec<Phrase>,
    active: Option<ActivePhrase>,
    pre_reset: Box<dyn FnMut() + Send>,
    post_reset: Box<dyn FnMut() + Send>,
    execute: Box<dyn FnMut(Action, i32, i32) + Send>,
    is_playing: Box<dyn Fn() -> bool + Send>,
}

impl PhraseEngine {
    pub fn new(
        phrases: Vec<Phrase>,
        pre_reset: Box<dyn FnMut() + Send>,
        post_reset: Box<dyn FnMut() + Send>,
        execute: Box<dyn FnMut(Action, i32, i32) + Send>,
        is_playing: Box<dyn Fn() -> bool + Send>,
    ) -> PhraseEngine {
        PhraseEngine {
            phrases,
            active: None,
            pre_reset,
            post_reset,
            execute,
            is_playing,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Triggers phrase `index` (§4.G steps 1-2). Starts playback if it
    /// isn't already running; a step at `position_rows == 0` fires
    /// immediately (the "jump to phrase start" the spec describes is just
    /// step 0's action, which this generic firing already handles).
    pub fn trigger_phrase(&mut self, index: usize) {
        if index >= self.phrases.len() {
            return;
        }
        (self.pre_reset)();
        if !(self.is_playing)() {
            (self.execute)(Action::Play, 0, 0);
        }
        self.active = Some(ActivePhrase { index, step_cursor: 0, rows_since_start: 0 });
        self.fire_due_steps();
    }

    /// Called once per decoder row callback while a phrase is active
    /// (§4.G step 3).
    pub fn on_row_tick(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.rows_since_start += 1;
        } else {
            return;
        }
        self.fire_due_steps();
    }

    fn fire_due_steps(&mut self) {
        loop {
            let Some(active) = self.active.as_ref() else { return };
            let phrase = &self.phrases[active.index];
            if active.step_cursor >= phrase.steps.len() {
                return;
            }
            let step = phrase.steps[active.step_cursor];
            if step.position_rows != active.rows_since_start {
                return;
            }

            let active = self.active.as_mut().expect("checked above");
            active.step_cursor += 1;
            let was_last = active.step_cursor >= phrase.steps.len();

            (self.execute)(step.action, step.parameter, step.value);

            if was_last {
                self.complete();
                return;
            }
        }
    }

    /// §4.G step 4 and the exclusion rule: if playback is still running,
    /// leave position as-is; else reset to order 0. Either way unmute all
    /// and clear mute/solo shadow state via `post_reset`.
    fn complete(&mut self) {
        self.active = None;
        if !(self.is_playing)() {
            (self.execute)(Action::JumpToOrder, 0, 0);
        }
        (self.post_reset)();
    }

    /// Any user-initiated transport action aborts the active phrase
    /// immediately and runs the completion callback (§4.G exclusion
    /// rule).
    pub fn abort(&mut self) {
        if self.active.is_some() {
            self.complete();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Harness {
        engine: PhraseEngine,
        log: Arc<Mutex<Vec<(Action, i32, i32)>>>,
        playing: Arc<Mutex<bool>>,
        pre_reset_count: Arc<Mutex<u32>>,
        post_reset_count: Arc<Mutex<u32>>,
    }

    fn harness(phrases: Vec<Phrase>) -> Harness {
        let log = Arc::new(Mutex::new(Vec::new()));
        let playing = Arc::new(Mutex::new(false));
        let pre_reset_count = Arc::new(Mutex::new(0));
        let post_reset_count = Arc::new(Mutex::new(0));

        let log_clone = log.clone();
        let playing_clone = playing.clone();
        let execute = Box::new(move |a: Action, p: i32, v: i32| {
            log_clone.lock().unwrap().push((a, p, v));
            if a == Action::Play {
                *playing_clone.lock().unwrap() = true;
            }
        });

        let pre_clone = pre_reset_count.clone();
        let pre_reset = Box::new(move || {
            *pre_clone.lock().unwrap() += 1;
        });

        let post_clone = post_reset_count.clone();
        let post_reset = Box::new(move || {
            *post_clone.lock().unwrap() += 1;
        });

        let playing_query = playing.clone();
        let is_playing = Box::new(move || *playing_query.lock().unwrap());

        let engine = PhraseEngine::new(phrases, pre_reset, post_reset, execute, is_playing);
        Harness { engine, log, playing, pre_reset_count, post_reset_count }
    }

    #[test]
    fn test_trigger_starts_playback_and_fires_row_zero_step() {
        let phrase = Phrase {
            name: "P1".to_string(),
            steps: vec![PhraseStep { position_rows: 0, action: Action::Mute, parameter: 1, value: 0 }],
        };
        let mut h = harness(vec![phrase]);
        h.engine.trigger_phrase(0);

        let log = h.log.lock().unwrap();
        assert_eq!(log[0].0, Action::Play, "not already playing: Play fires first");
        assert_eq!(log[1], (Action::Mute, 1, 0));
        assert_eq!(*h.pre_reset_count.lock().unwrap(), 1);
    }

    #[test]
    fn test_steps_fire_exactly_once_at_their_row() {
        let phrase = Phrase {
            name: "P1".to_string(),
            steps: vec![
                PhraseStep { position_rows: 0, action: Action::Mute, parameter: 0, value: 0 },
                PhraseStep { position_rows: 2, action: Action::Solo, parameter: 1, value: 0 },
            ],
        };
        let mut h = harness(vec![phrase]);
        *h.playing.lock().unwrap() = true;
        h.engine.trigger_phrase(0);
        h.engine.on_row_tick();
        assert_eq!(h.log.lock().unwrap().len(), 1, "row 1 has no step due yet");
        h.engine.on_row_tick();
        assert_eq!(h.log.lock().unwrap().len(), 2, "row 2's step should have fired");
    }

    #[test]
    fn test_completion_resets_to_order_zero_when_stopped() {
        let phrase = Phrase {
            name: "P1".to_string(),
            steps: vec![PhraseStep { position_rows: 0, action: Action::Mute, parameter: 0, value: 0 }],
        };
        let mut h = harness(vec![phrase]);
        h.engine.trigger_phrase(0);
        // trigger_phrase started playback via execute(Play); simulate the
        // step itself stopping playback before completion runs.
        *h.playing.lock().unwrap() = false;

        assert!(!h.engine.is_active());
        let log = h.log.lock().unwrap();
        assert!(log.iter().any(|e| e.0 == Action::JumpToOrder));
        assert_eq!(*h.post_reset_count.lock().unwrap(), 1);
    }

    #[test]
    fn test_completion_leaves_position_when_still_playing() {
        let phrase = Phrase {
            name: "P1".to_string(),
            steps: vec![PhraseStep { position_rows: 0, action: Action::Mute, parameter: 0, value: 0 }],
        };
        let mut h = harness(vec![phrase]);
        h.engine.trigger_phrase(0);
        // trigger_phrase's Play action left `playing` true.
        let log = h.log.lock().unwrap();
        assert!(!log.iter().any(|e| e.0 == Action::JumpToOrder));
    }

    #[test]
    fn test_user_transport_aborts_active_phrase() {
        let phrase = Phrase {
            name: "P1".to_string(),
            steps: vec![
                PhraseStep { position_rows: 0, action: Action::Mute, parameter: 0, value: 0 },
                PhraseStep { position_rows: 5, action: Action::Solo, parameter: 0, value: 0 },
            ],
        };
        let mut h = harness(vec![phrase]);
        h.engine.trigger_phrase(0);
        assert!(h.engine.is_active());
        h.engine.abort();
        assert!(!h.engine.is_active());
        assert_eq!(*h.post_reset_count.lock().unwrap(), 1);
    }
}
