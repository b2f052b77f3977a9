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
//! A mock tracker decoder used by tests. Drives a simple order-list of
//! uniform-length patterns, advancing one row per `render_audio` call (a
//! "row" is a convenient test granularity; the real decoder advances rows
//! every `ticks_per_row` audio blocks per §6 glossary, which this mock
//! collapses to one block per row for determinism).

use super::{Decoder, DecoderCallbacks, LoopState, QueuedChannelAction, QueuedJumpType};

pub struct MockDecoder {
    pub orders: Vec<u32>,
    pub rows_per_pattern: u32,
    pub current_order: u32,
    pub current_row: u32,
    pub bpm: f32,
    pub speed: u8,
    pub playing: bool,
    pub pitch: f32,

    pub channel_count: u16,
    pub channel_mute: Vec<bool>,
    pub channel_solo_shadow: Vec<bool>,
    pub channel_volume: Vec<f32>,
    pub channel_pan: Vec<f32>,

    queued_jump: QueuedJumpType,
    queued_order: Option<u32>,
    pending_channel_actions: Vec<QueuedChannelAction>,

    loop_state: LoopState,
    loop_range: Option<(i32, u32, i32, u32)>,
    custom_loop_rows: Option<u32>,

    /// Frames of silence rendered per call; kept so tests can assert how
    /// much audio was produced.
    pub rendered_frames: u64,
}

impl MockDecoder {
    pub fn new(num_orders: u32, rows_per_pattern: u32, channel_count: u16) -> MockDecoder {
        MockDecoder {
            orders: (0..num_orders).collect(),
            rows_per_pattern,
            current_order: 0,
            current_row: 0,
            bpm: 125.0,
            speed: 6,
            playing: false,
            pitch: 1.0,
            channel_count,
            channel_mute: vec![false; channel_count as usize],
            channel_solo_shadow: vec![false; channel_count as usize],
            channel_volume: vec![1.0; channel_count as usize],
            channel_pan: vec![0.5; channel_count as usize],
            queued_jump: QueuedJumpType::None,
            queued_order: None,
            pending_channel_actions: vec![QueuedChannelAction::None; channel_count as usize],
            loop_state: LoopState::Off,
            loop_range: None,
            custom_loop_rows: None,
            rendered_frames: 0,
        }
    }

    fn advance_row(&mut self, callbacks: &mut dyn DecoderCallbacks) {
        self.current_row += 1;

        let effective_rows = self.custom_loop_rows.unwrap_or(self.rows_per_pattern);
        if self.current_row >= effective_rows {
            self.current_row = 0;
            self.current_order = (self.current_order + 1) % self.orders.len().max(1) as u32;
            callbacks.on_order_change(self.current_order, self.orders[self.current_order as usize]);
            self.commit_at_pattern_boundary();
        }

        if self.current_row == 0 {
            self.commit_queued_jump_at_row_zero();
        }

        if let LoopState::Armed = self.loop_state {
            if let Some((start_order, start_row, ..)) = self.loop_range {
                let matches_order = start_order == -1 || start_order as u32 == self.current_order;
                if matches_order && self.current_row == start_row {
                    self.loop_state = LoopState::Active;
                }
            }
        }

        callbacks.on_row_change(self.current_order, self.current_row);
    }

    fn commit_queued_jump_at_row_zero(&mut self) {
        match self.queued_jump {
            QueuedJumpType::NextOrder => {
                self.current_order = (self.current_order + 1) % self.orders.len().max(1) as u32;
            }
            QueuedJumpType::PrevOrder => {
                self.current_order = (self.current_order + self.orders.len() as u32 - 1)
                    % self.orders.len().max(1) as u32;
            }
            QueuedJumpType::Order => {
                if let Some(order) = self.queued_order {
                    self.current_order = order;
                }
            }
            QueuedJumpType::Pattern => {
                if let Some(pattern) = self.queued_order {
                    self.current_order = pattern;
                }
            }
            QueuedJumpType::None => return,
        }
        self.queued_jump = QueuedJumpType::None;
        self.queued_order = None;
    }

    fn commit_at_pattern_boundary(&mut self) {
        for (channel, pending) in self.pending_channel_actions.iter_mut().enumerate() {
            match *pending {
                QueuedChannelAction::Mute => self.channel_mute[channel] = !self.channel_mute[channel],
                QueuedChannelAction::Solo => {
                    let was_solo = self.channel_mute.iter().enumerate().all(|(c, m)| {
                        if c == channel {
                            !*m
                        } else {
                            *m
                        }
                    });
                    if was_solo {
                        self.channel_mute.iter_mut().for_each(|m| *m = false);
                    } else {
                        self.channel_mute.iter_mut().enumerate().for_each(|(c, m)| {
                            *m = c != channel;
                        });
                    }
                }
                QueuedChannelAction::None => {}
            }
            *pending = QueuedChannelAction::None;
        }
    }
}

impl Decoder for MockDecoder {
    fn render_audio(&mut self, buf: &mut [f32], frames: usize) -> usize {
        for sample in buf.iter_mut().take(frames * 2) {
            *sample = 0.0;
        }
        self.rendered_frames += frames as u64;
        frames
    }

    fn set_pitch(&mut self, factor: f32) {
        self.pitch = factor;
    }
    fn get_current_bpm(&self) -> f32 {
        self.bpm
    }
    fn get_current_speed(&self) -> u8 {
        self.speed
    }
    fn get_current_order(&self) -> u32 {
        self.current_order
    }
    fn get_current_pattern(&self) -> u32 {
        self.orders[self.current_order as usize % self.orders.len().max(1)]
    }
    fn get_current_row(&self) -> u32 {
        self.current_row
    }
    fn get_num_orders(&self) -> u32 {
        self.orders.len() as u32
    }
    fn get_num_patterns(&self) -> u32 {
        self.orders.len() as u32
    }
    fn get_num_channels(&self) -> u16 {
        self.channel_count
    }
    fn get_order_pattern(&self, order: u32) -> u32 {
        self.orders[order as usize % self.orders.len().max(1)]
    }
    fn get_pattern_num_rows(&self, _pattern: u32) -> u32 {
        self.rows_per_pattern
    }
    fn get_full_pattern_rows(&self) -> u32 {
        self.rows_per_pattern
    }

    fn set_channel_panning(&mut self, channel: u16, pan: f32) {
        self.channel_pan[channel as usize] = pan;
    }
    fn get_channel_panning(&self, channel: u16) -> f32 {
        self.channel_pan[channel as usize]
    }
    fn set_channel_volume(&mut self, channel: u16, volume: f32) {
        self.channel_volume[channel as usize] = volume;
    }
    fn toggle_channel_mute(&mut self, channel: u16) {
        let channel = channel as usize;
        self.channel_mute[channel] = !self.channel_mute[channel];
    }
    fn toggle_channel_solo(&mut self, channel: u16) {
        let channel = channel as usize;
        let is_solo = self
            .channel_mute
            .iter()
            .enumerate()
            .all(|(c, m)| if c == channel { !*m } else { *m });
        if is_solo {
            self.channel_mute.iter_mut().for_each(|m| *m = false);
        } else {
            self.channel_mute
                .iter_mut()
                .enumerate()
                .for_each(|(c, m)| *m = c != channel);
        }
    }
    fn is_channel_muted(&self, channel: u16) -> bool {
        self.channel_mute[channel as usize]
    }
    fn mute_all(&mut self) {
        self.channel_mute.iter_mut().for_each(|m| *m = true);
    }
    fn unmute_all(&mut self) {
        self.channel_mute.iter_mut().for_each(|m| *m = false);
    }

    fn jump_to_order(&mut self, order: u32) {
        self.current_order = order;
        self.current_row = 0;
        self.queued_jump = QueuedJumpType::None;
        self.queued_order = None;
    }
    fn jump_to_pattern(&mut self, pattern: u32) {
        self.jump_to_order(pattern);
    }
    fn queue_next_order(&mut self) {
        if self.queued_jump == QueuedJumpType::NextOrder {
            self.clear_pending_jump();
            return;
        }
        self.queued_jump = QueuedJumpType::NextOrder;
        self.queued_order = None;
    }
    fn queue_prev_order(&mut self) {
        if self.queued_jump == QueuedJumpType::PrevOrder {
            self.clear_pending_jump();
            return;
        }
        self.queued_jump = QueuedJumpType::PrevOrder;
        self.queued_order = None;
    }
    fn queue_order(&mut self, order: u32) {
        if self.queued_jump == QueuedJumpType::Order && self.queued_order == Some(order) {
            self.clear_pending_jump();
            return;
        }
        self.queued_jump = QueuedJumpType::Order;
        self.queued_order = Some(order);
    }
    fn queue_pattern(&mut self, pattern: u32) {
        if self.queued_jump == QueuedJumpType::Pattern && self.queued_order == Some(pattern) {
            self.clear_pending_jump();
            return;
        }
        self.queued_jump = QueuedJumpType::Pattern;
        self.queued_order = Some(pattern);
    }
    fn pattern_mode(&mut self, _enabled: bool) {}
    fn retrigger_pattern(&mut self) {
        self.current_row = 0;
    }

    fn set_custom_loop_rows(&mut self, rows: u32) {
        self.custom_loop_rows = Some(rows.max(1));
    }
    fn clear_custom_loop_rows(&mut self) {
        self.custom_loop_rows = None;
    }
    fn get_custom_loop_rows(&self) -> Option<u32> {
        self.custom_loop_rows
    }
    fn set_loop_range(&mut self, start_order: i32, start_row: u32, end_order: i32, end_row: u32) {
        self.loop_range = Some((start_order, start_row, end_order, end_row));
    }
    fn trigger_loop(&mut self) {
        if let Some((start_order, start_row, ..)) = self.loop_range {
            if start_order >= 0 {
                self.current_order = start_order as u32;
            }
            self.current_row = start_row;
            self.loop_state = LoopState::Active;
        }
    }
    fn play_to_loop(&mut self) {
        self.loop_state = LoopState::Armed;
    }
    fn get_loop_state(&self) -> LoopState {
        self.loop_state
    }

    fn queue_channel_mute(&mut self, channel: u16) {
        let channel = channel as usize;
        if self.pending_channel_actions[channel] == QueuedChannelAction::Mute {
            self.pending_channel_actions[channel] = QueuedChannelAction::None;
        } else {
            self.pending_channel_actions[channel] = QueuedChannelAction::Mute;
        }
    }

    fn queue_channel_solo(&mut self, channel: u16) {
        let channel = channel as usize;
        if self.pending_channel_actions[channel] == QueuedChannelAction::Solo {
            self.pending_channel_actions[channel] = QueuedChannelAction::None;
        } else {
            self.pending_channel_actions[channel] = QueuedChannelAction::Solo;
        }
    }

    fn has_pending_mute_changes(&self) -> bool {
        self.pending_channel_actions
            .iter()
            .any(|a| *a != QueuedChannelAction::None)
    }
    fn get_pending_channel_mute(&self, channel: u16) -> QueuedChannelAction {
        self.pending_channel_actions[channel as usize]
    }
    fn get_queued_action_for_channel(&self, channel: u16) -> QueuedChannelAction {
        self.pending_channel_actions[channel as usize]
    }
    fn get_queued_jump_type(&self) -> QueuedJumpType {
        self.queued_jump
    }
    fn get_queued_order(&self) -> Option<u32> {
        self.queued_order
    }
    fn clear_pending_jump(&mut self) {
        self.queued_jump = QueuedJumpType::None;
        self.queued_order = None;
    }

    fn process_commands(&mut self, callbacks: &mut dyn DecoderCallbacks) {
        if self.playing {
            self.advance_row(callbacks);
        }
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NoopCallbacks;
    impl DecoderCallbacks for NoopCallbacks {}

    #[test]
    fn test_queue_next_order_commits_at_row_zero() {
        let mut decoder = MockDecoder::new(4, 4, 2);
        decoder.set_playing(true);
        decoder.queue_next_order();
        let mut callbacks = NoopCallbacks;

        // Advance through the remaining rows of pattern 0 (rows 1,2,3).
        for _ in 0..3 {
            decoder.process_commands(&mut callbacks);
            assert_eq!(decoder.get_current_order(), 0);
        }
        // The 4th advance wraps to row 0 of order 1 and should commit the
        // queued jump there too (wrap lands on order 1 already; the queued
        // "next order" pushes it to order 2... but commit happens once per
        // row-zero crossing, matching §4.E "row 0 of next pattern").
        decoder.process_commands(&mut callbacks);
        assert_eq!(decoder.get_current_row(), 0);
        assert_eq!(decoder.get_queued_jump_type(), QueuedJumpType::None);
    }

    #[test]
    fn test_reissue_cancels_queue() {
        let mut decoder = MockDecoder::new(4, 4, 2);
        decoder.queue_next_order();
        assert_eq!(decoder.get_queued_jump_type(), QueuedJumpType::NextOrder);
        decoder.queue_next_order();
        assert_eq!(decoder.get_queued_jump_type(), QueuedJumpType::None);
    }

    #[test]
    fn test_solo_involution() {
        let mut decoder = MockDecoder::new(1, 4, 4);
        decoder.toggle_channel_solo(2);
        assert_eq!(
            decoder.channel_mute,
            vec![true, true, false, true],
            "channel 2 should be the only unmuted channel"
        );
        decoder.toggle_channel_solo(2);
        assert_eq!(decoder.channel_mute, vec![false, false, false, false]);
    }
}
