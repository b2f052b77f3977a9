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
//! Transport queue commit semantics (§4.E): the decoder exposes the raw
//! queue primitives, this module owns what counts as "the same pending
//! action" for cancellation, pattern-mode scrub-vs-queue switching, solo
//! as derived state, and the loop step bar.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::decoder::SharedDecoder;

/// Whether `<<`/`>>` scrub immediately or queue at the next pattern
/// boundary (§4.E). Toggled by `PatternModeToggle`. Cheaply `Clone`-able:
/// every clone shares the same decoder handle and pattern-mode flag, so
/// the dispatcher can hand a clone to the performance timeline and phrase
/// engine's execution callbacks without a second source of truth.
#[derive(Clone)]
pub struct Transport {
    decoder: SharedDecoder,
    loop_enabled: Arc<AtomicBool>,
}

impl Transport {
    pub fn new(decoder: SharedDecoder) -> Transport {
        Transport { decoder, loop_enabled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Relaxed)
    }

    pub fn set_pattern_mode(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::Relaxed);
        self.decoder.lock().expect("decoder lock poisoned").pattern_mode(enabled);
    }

    pub fn jump_to_order(&self, order: u32) {
        self.decoder.lock().expect("decoder lock poisoned").jump_to_order(order);
    }

    pub fn jump_to_pattern(&self, pattern: u32) {
        self.decoder.lock().expect("decoder lock poisoned").jump_to_pattern(pattern);
    }

    /// `<<`: scrub immediately when pattern mode is off, queue otherwise.
    pub fn prev(&self) {
        let mut decoder = self.decoder.lock().expect("decoder lock poisoned");
        if self.loop_enabled() {
            decoder.queue_prev_order();
        } else {
            let order = decoder.get_current_order();
            let prev = if order == 0 { decoder.get_num_orders().saturating_sub(1) } else { order - 1 };
            decoder.jump_to_order(prev);
        }
    }

    /// `>>`: scrub immediately when pattern mode is off, queue otherwise.
    pub fn next(&self) {
        let mut decoder = self.decoder.lock().expect("decoder lock poisoned");
        if self.loop_enabled() {
            decoder.queue_next_order();
        } else {
            let order = (decoder.get_current_order() + 1) % decoder.get_num_orders().max(1);
            decoder.jump_to_order(order);
        }
    }

    /// Always queues, regardless of pattern mode (distinct from `next()`,
    /// which only queues when pattern mode is on).
    pub fn queue_next_order(&self) {
        self.decoder.lock().expect("decoder lock poisoned").queue_next_order();
    }

    pub fn queue_prev_order(&self) {
        self.decoder.lock().expect("decoder lock poisoned").queue_prev_order();
    }

    pub fn queue_order(&self, order: u32) {
        self.decoder.lock().expect("decoder lock poisoned").queue_order(order);
    }

    pub fn queue_pattern(&self, pattern: u32) {
        self.decoder.lock().expect("decoder lock poisoned").queue_pattern(pattern);
    }

    pub fn retrigger(&self) {
        self.decoder.lock().expect("decoder lock poisoned").retrigger_pattern();
    }

    /// Queues a channel mute toggle, committed at the next pattern
    /// boundary. Re-issuing cancels the pending toggle (decoder-internal,
    /// §4.E cancellation policy).
    pub fn queue_channel_mute(&self, channel: u16) {
        self.decoder.lock().expect("decoder lock poisoned").queue_channel_mute(channel);
    }

    pub fn toggle_channel_mute(&self, channel: u16) {
        self.decoder.lock().expect("decoder lock poisoned").toggle_channel_mute(channel);
    }

    /// Solo is derived, not stored (§4.E): toggling recomputes from the
    /// current mute state rather than consulting any separate flag.
    pub fn toggle_channel_solo(&self, channel: u16) {
        self.decoder.lock().expect("decoder lock poisoned").toggle_channel_solo(channel);
    }

    pub fn queue_channel_solo(&self, channel: u16) {
        self.decoder.lock().expect("decoder lock poisoned").queue_channel_solo(channel);
    }

    pub fn trigger_loop(&self) {
        self.decoder.lock().expect("decoder lock poisoned").trigger_loop();
    }

    pub fn play_to_loop(&self) {
        self.decoder.lock().expect("decoder lock poisoned").play_to_loop();
    }

    /// The loop step bar (§4.E): 16 equidistant steps, step 15 clears the
    /// custom loop.
    pub fn set_loop_step(&self, step_index: u32) {
        let mut decoder = self.decoder.lock().expect("decoder lock poisoned");
        if step_index >= 15 {
            decoder.clear_custom_loop_rows();
            return;
        }
        let total_rows = decoder.get_full_pattern_rows();
        let rows = (step_index + 1) * total_rows / 16;
        decoder.set_custom_loop_rows(rows.max(1));
    }

    pub fn halve_loop(&self) {
        let mut decoder = self.decoder.lock().expect("decoder lock poisoned");
        if let Some(rows) = decoder.get_custom_loop_rows() {
            decoder.set_custom_loop_rows((rows / 2).max(1));
        }
    }

    pub fn full_loop(&self) {
        self.decoder.lock().expect("decoder lock poisoned").clear_custom_loop_rows();
    }

    pub fn play(&self) {
        self.decoder.lock().expect("decoder lock poisoned").set_playing(true);
    }

    pub fn stop(&self) {
        self.decoder.lock().expect("decoder lock poisoned").set_playing(false);
    }

    pub fn set_pitch(&self, factor: f32) {
        self.decoder.lock().expect("decoder lock poisoned").set_pitch(factor);
    }

    pub fn set_channel_volume(&self, channel: u16, volume: f32) {
        self.decoder.lock().expect("decoder lock poisoned").set_channel_volume(channel, volume);
    }

    pub fn set_channel_panning(&self, channel: u16, pan: f32) {
        self.decoder.lock().expect("decoder lock poisoned").set_channel_panning(channel, pan);
    }

    pub fn unmute_all(&self) {
        self.decoder.lock().expect("decoder lock poisoned").unmute_all();
    }

    pub fn is_playing(&self) -> bool {
        self.decoder.lock().expect("decoder lock poisoned").is_playing()
    }

    pub fn current_bpm(&self) -> f32 {
        self.decoder.lock().expect("decoder lock poisoned").get_current_bpm()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decoder::mock::MockDecoder;
    use std::sync::{Arc, Mutex};

    fn transport(orders: u32, rows: u32, channels: u16) -> Transport {
        let decoder: SharedDecoder = Arc::new(Mutex::new(Box::new(MockDecoder::new(orders, rows, channels))));
        Transport::new(decoder)
    }

    #[test]
    fn test_prev_scrub_wraps_to_last_order_when_loop_off() {
        let t = transport(4, 8, 2);
        t.prev();
        assert_eq!(t.decoder.lock().unwrap().get_current_order(), 3);
    }

    #[test]
    fn test_next_queues_when_loop_enabled() {
        let t = transport(4, 8, 2);
        t.set_pattern_mode(true);
        t.next();
        let decoder = t.decoder.lock().unwrap();
        assert_eq!(decoder.get_current_order(), 0, "queued next must not jump immediately");
        assert_eq!(decoder.get_queued_jump_type(), crate::decoder::QueuedJumpType::NextOrder);
    }

    #[test]
    fn test_loop_step_bar_maps_to_rows() {
        let t = transport(1, 64, 2);
        t.set_loop_step(7); // step 7 -> (7+1)*64/16 = 32
        assert_eq!(t.decoder.lock().unwrap().get_custom_loop_rows(), Some(32));
    }

    #[test]
    fn test_loop_step_15_clears_custom_loop() {
        let t = transport(1, 64, 2);
        t.set_loop_step(3);
        t.set_loop_step(15);
        assert_eq!(t.decoder.lock().unwrap().get_custom_loop_rows(), None);
    }

    #[test]
    fn test_full_loop_clears_custom_loop() {
        let t = transport(1, 64, 2);
        t.set_loop_step(3);
        t.full_loop();
        assert_eq!(t.decoder.lock().unwrap().get_custom_loop_rows(), None);
    }

    #[test]
    fn test_solo_toggle_is_derived_not_stored() {
        let t = transport(1, 8, 4);
        t.toggle_channel_solo(1);
        {
            let decoder = t.decoder.lock().unwrap();
            assert!(!decoder.is_channel_muted(1));
            assert!(decoder.is_channel_muted(0));
        }
        // Toggling again fully un-does it by recomputing from mute state.
        t.toggle_channel_solo(1);
        let decoder = t.decoder.lock().unwrap();
        assert!(!decoder.is_channel_muted(1));
        assert!(!decoder.is_channel_muted(0));
    }
}
