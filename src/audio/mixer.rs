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
//! The audio mix graph (§4.C): render the decoder, read the capture ring,
//! route the effects chain, and apply the three volume/pan/mute buses.
//! `MixGraph::render` is the sole entry point the audio callback calls; it
//! must never block for long or allocate on the hot path.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::decoder::{DecoderCallbacks, NoteEvent, SharedDecoder};
use crate::effects::Chain;
use crate::ring::RingBuffer;

/// Upper bound on row/order/loop/note callbacks the decoder can report in a
/// single audio callback; well above what one block's worth of rows and
/// channels could plausibly produce.
const MAX_PENDING_ROW_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy)]
enum RowEvent {
    RowChange { order: u32, row: u32 },
    OrderChange { order: u32, pattern: u32 },
    LoopPattern,
    LoopSong,
    Note(NoteEvent),
}

/// Buffers the decoder's row/order/loop/note callbacks while the decoder
/// lock held by `render` is still taken (§9): the real sink
/// (`dispatch::State`, reached through `RowCallbacks`) drives `Transport`,
/// which re-locks this same decoder, so it must never run until that lock
/// is released. Fixed capacity, no allocation.
struct PendingRowEvents {
    events: [RowEvent; MAX_PENDING_ROW_EVENTS],
    len: usize,
}

impl PendingRowEvents {
    fn new() -> PendingRowEvents {
        PendingRowEvents { events: [RowEvent::LoopPattern; MAX_PENDING_ROW_EVENTS], len: 0 }
    }

    fn push(&mut self, event: RowEvent) {
        if self.len < self.events.len() {
            self.events[self.len] = event;
            self.len += 1;
        }
    }

    /// Replays the buffered events into `sink` in arrival order, then
    /// clears. Called only after the decoder lock is released.
    fn drain_into(&mut self, sink: &mut dyn DecoderCallbacks) {
        for event in &self.events[..self.len] {
            match *event {
                RowEvent::RowChange { order, row } => sink.on_row_change(order, row),
                RowEvent::OrderChange { order, pattern } => sink.on_order_change(order, pattern),
                RowEvent::LoopPattern => sink.on_loop_pattern(),
                RowEvent::LoopSong => sink.on_loop_song(),
                RowEvent::Note(note) => sink.on_note(note),
            }
        }
        self.len = 0;
    }
}

impl DecoderCallbacks for PendingRowEvents {
    fn on_row_change(&mut self, order: u32, row: u32) {
        self.push(RowEvent::RowChange { order, row });
    }
    fn on_order_change(&mut self, order: u32, pattern: u32) {
        self.push(RowEvent::OrderChange { order, pattern });
    }
    fn on_loop_pattern(&mut self) {
        self.push(RowEvent::LoopPattern);
    }
    fn on_loop_song(&mut self) {
        self.push(RowEvent::LoopSong);
    }
    fn on_note(&mut self, event: NoteEvent) {
        self.push(RowEvent::Note(event));
    }
}

/// Which bus (if any) the effects chain is routed to (§4.C, §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxRoute {
    Off,
    Playback,
    Input,
    Master,
}

impl FxRoute {
    fn from_u8(v: u8) -> FxRoute {
        match v {
            1 => FxRoute::Playback,
            2 => FxRoute::Input,
            3 => FxRoute::Master,
            _ => FxRoute::Off,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            FxRoute::Off => 0,
            FxRoute::Playback => 1,
            FxRoute::Input => 2,
            FxRoute::Master => 3,
        }
    }
}

/// Lock-free publish point for `(effective_bpm, beat_phase)`, written by
/// the mix callback and read by the outbound MIDI clock thread (§4.C,
/// §4.H). Packs each `f32` into an `AtomicU32` via `to_bits`/`from_bits`
/// rather than taking a lock on the render path.
pub struct BpmPublisher {
    bpm_bits: AtomicU32,
    phase_bits: AtomicU32,
}

impl BpmPublisher {
    pub fn new() -> BpmPublisher {
        BpmPublisher {
            bpm_bits: AtomicU32::new(120.0f32.to_bits()),
            phase_bits: AtomicU32::new(0u32),
        }
    }

    pub fn publish(&self, bpm: f32, beat_phase: f32) {
        self.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
        self.phase_bits.store(beat_phase.to_bits(), Ordering::Relaxed);
    }

    pub fn read(&self) -> (f32, f32) {
        (
            f32::from_bits(self.bpm_bits.load(Ordering::Relaxed)),
            f32::from_bits(self.phase_bits.load(Ordering::Relaxed)),
        )
    }
}

impl Default for BpmPublisher {
    fn default() -> Self {
        BpmPublisher::new()
    }
}

/// Lock-free publish point for the decoder's transport position, written
/// by the mix callback and read by the outbound MIDI clock thread for SPP
/// emission (§4.H) without that thread ever touching the decoder lock.
pub struct PositionPublisher {
    order: AtomicU32,
    row: AtomicU32,
    pattern_rows: AtomicU32,
    speed: AtomicU32,
    playing: AtomicBool,
}

impl PositionPublisher {
    pub fn new() -> PositionPublisher {
        PositionPublisher {
            order: AtomicU32::new(0),
            row: AtomicU32::new(0),
            pattern_rows: AtomicU32::new(1),
            speed: AtomicU32::new(6),
            playing: AtomicBool::new(false),
        }
    }

    pub fn publish(&self, order: u32, row: u32, pattern_rows: u32, speed: u8, playing: bool) {
        self.order.store(order, Ordering::Relaxed);
        self.row.store(row, Ordering::Relaxed);
        self.pattern_rows.store(pattern_rows.max(1), Ordering::Relaxed);
        self.speed.store(speed as u32, Ordering::Relaxed);
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub fn read(&self) -> (u32, u32, u32, u8, bool) {
        (
            self.order.load(Ordering::Relaxed),
            self.row.load(Ordering::Relaxed),
            self.pattern_rows.load(Ordering::Relaxed),
            self.speed.load(Ordering::Relaxed) as u8,
            self.playing.load(Ordering::Relaxed),
        )
    }
}

impl Default for PositionPublisher {
    fn default() -> Self {
        PositionPublisher::new()
    }
}

/// One bus's volume (linear `[0, 1]`), pan (`[-1, 1]`), and mute flag.
pub struct Bus {
    volume_bits: AtomicU32,
    pan_bits: AtomicU32,
    muted: AtomicBool,
}

impl Bus {
    fn new() -> Bus {
        Bus {
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            pan_bits: AtomicU32::new(0.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn pan(&self) -> f32 {
        f32::from_bits(self.pan_bits.load(Ordering::Relaxed))
    }

    pub fn set_pan(&self, pan: f32) {
        self.pan_bits.store(pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

/// Applies a bus's volume/pan to an interleaved stereo int16 buffer.
/// Panning is a simple linear left/right law (the teacher's own mixer does
/// plain linear gain, no constant-power curve, and this keeps the same
/// texture).
fn apply_volume_pan(buf: &mut [i16], frames: usize, volume: f32, pan: f32) {
    let left_gain = volume * if pan > 0.0 { 1.0 - pan } else { 1.0 };
    let right_gain = volume * if pan < 0.0 { 1.0 + pan } else { 1.0 };
    for frame in 0..frames {
        let l = &mut buf[frame * 2];
        *l = (*l as f32 * left_gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        let r = &mut buf[frame * 2 + 1];
        *r = (*r as f32 * right_gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Saturating mix-add of `src` into `dst`, both interleaved stereo int16.
fn mix_add(dst: &mut [i16], src: &[i16]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = (*d as i32 + *s as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

/// The render+capture+effects routing contract of §4.C.
pub struct MixGraph {
    decoder: Mutex<Option<SharedDecoder>>,
    chain: Mutex<Chain>,
    capture: Arc<RingBuffer>,
    fx_route: AtomicU8,
    pitch_bits: AtomicU32,
    playback: Bus,
    input: Bus,
    master: Bus,
    sample_rate: u32,
    bpm: Arc<BpmPublisher>,
    position: Arc<PositionPublisher>,
    callbacks: Mutex<Option<Box<dyn DecoderCallbacks>>>,
}

impl MixGraph {
    pub fn new(sample_rate: u32, capture_buffer_ms: u32) -> MixGraph {
        MixGraph {
            decoder: Mutex::new(None),
            chain: Mutex::new(Chain::new()),
            capture: Arc::new(RingBuffer::new(capture_buffer_ms, sample_rate, 2)),
            fx_route: AtomicU8::new(FxRoute::Off.to_u8()),
            pitch_bits: AtomicU32::new(1.0f32.to_bits()),
            playback: Bus::new(),
            input: Bus::new(),
            master: Bus::new(),
            sample_rate,
            bpm: Arc::new(BpmPublisher::new()),
            position: Arc::new(PositionPublisher::new()),
            callbacks: Mutex::new(None),
        }
    }

    /// Installs the decoder row/order callback sink (§9): invoked once per
    /// audio callback, on the audio thread, after the decoder lock used for
    /// rendering has been released. `dispatch::State` is the only real
    /// implementor, wired up once at startup; its callbacks drive
    /// `Transport`, which locks this same decoder, so they must never run
    /// while `render` is still holding it.
    pub fn set_callbacks(&self, callbacks: Box<dyn DecoderCallbacks>) {
        *self.callbacks.lock() = Some(callbacks);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn capture_ring(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.capture)
    }

    pub fn bpm_publisher(&self) -> Arc<BpmPublisher> {
        Arc::clone(&self.bpm)
    }

    pub fn position_publisher(&self) -> Arc<PositionPublisher> {
        Arc::clone(&self.position)
    }

    /// Loads (or clears, with `None`) the decoder this graph renders.
    /// Resets the effects chain so tails don't bleed across songs (§4.B).
    pub fn set_decoder(&self, decoder: Option<SharedDecoder>) {
        *self.decoder.lock() = decoder;
        self.chain.lock().reset();
    }

    pub fn set_fx_route(&self, route: FxRoute) {
        self.fx_route.store(route.to_u8(), Ordering::Relaxed);
    }

    pub fn fx_route(&self) -> FxRoute {
        FxRoute::from_u8(self.fx_route.load(Ordering::Relaxed))
    }

    /// Stores the pitch factor used for the `effective_bpm` publish (§4.C).
    /// Callers apply their own clamp before storing here — user-driven
    /// pitch clamps to `[0.05, 2.0]`, MIDI-sync-driven pitch clamps to
    /// `[0.25, 3.0]` (§8) — this is just the union as a sanity bound.
    pub fn set_pitch_factor(&self, factor: f32) {
        self.pitch_bits.store(factor.clamp(0.05, 3.0).to_bits(), Ordering::Relaxed);
    }

    pub fn pitch_factor(&self) -> f32 {
        f32::from_bits(self.pitch_bits.load(Ordering::Relaxed))
    }

    pub fn chain(&self) -> &Mutex<Chain> {
        &self.chain
    }

    pub fn playback_bus(&self) -> &Bus {
        &self.playback
    }

    pub fn input_bus(&self) -> &Bus {
        &self.input
    }

    pub fn master_bus(&self) -> &Bus {
        &self.master
    }

    /// Renders `frames` stereo frames into `out` (interleaved int16,
    /// `out.len() >= frames * 2`). This is the audio callback's sole entry
    /// point and must stay allocation-free and short (§5). `scratch` backs
    /// the capture-input stage; `f32_scratch` backs the decoder's
    /// float-domain render stage — callers own both buffers for the
    /// lifetime of the stream so this never allocates.
    pub fn render(&self, out: &mut [i16], frames: usize, scratch: &mut [i16], f32_scratch: &mut [f32]) {
        let len = frames * 2;
        out[..len].iter_mut().for_each(|s| *s = 0);

        let route = self.fx_route();
        let rate = self.sample_rate;

        // Step 2/3: decoder render and/or fixed-chain decay while idle.
        let mut pending = PendingRowEvents::new();
        let mut decoder_guard = self.decoder.lock();
        if let Some(shared) = decoder_guard.as_mut() {
            let mut decoder = shared.lock().expect("decoder lock poisoned");
            let playing_now = decoder.is_playing();
            self.position.publish(
                decoder.get_current_order(),
                decoder.get_current_row(),
                decoder.get_pattern_num_rows(decoder.get_current_pattern()),
                decoder.get_current_speed(),
                playing_now,
            );
            if playing_now && !self.playback.muted() {
                let pitch = self.pitch_factor();
                decoder.render_audio(&mut f32_scratch[..len], frames);
                for (dst, src) in out[..len].iter_mut().zip(f32_scratch[..len].iter()) {
                    *dst = (*src * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                }
                if route == FxRoute::Playback {
                    self.chain.lock().process(&mut out[..len], frames, rate);
                }
                apply_volume_pan(&mut out[..len], frames, self.playback.volume(), self.playback.pan());

                let module_bpm = decoder.get_current_bpm();
                self.bpm.publish(module_bpm / pitch, decoder.get_current_row() as f32);
            } else if route == FxRoute::Playback {
                self.chain.lock().process(&mut out[..len], frames, rate);
            }

            // Buffered rather than handed the real sink directly: the real
            // sink (`dispatch::State`) re-enters `Transport`, which locks
            // this same decoder, and `decoder` is still held here.
            decoder.process_commands(&mut pending);
            drop(decoder);
        } else if route == FxRoute::Playback {
            self.chain.lock().process(&mut out[..len], frames, rate);
        }
        drop(decoder_guard);

        if let Some(callbacks) = self.callbacks.lock().as_mut() {
            pending.drain_into(callbacks.as_mut());
        }

        // Step 4/5: capture input.
        let needed = len;
        scratch[..needed].iter_mut().for_each(|s| *s = 0);
        if !self.input.muted() && self.capture.available() >= needed {
            self.capture.read(&mut scratch[..needed]);
            if route == FxRoute::Input {
                self.chain.lock().process(&mut scratch[..needed], frames, rate);
            }
            apply_volume_pan(&mut scratch[..needed], frames, self.input.volume(), self.input.pan());
            mix_add(&mut out[..len], &scratch[..needed]);
        } else if route == FxRoute::Input {
            self.chain.lock().process(&mut scratch[..needed], frames, rate);
            apply_volume_pan(&mut scratch[..needed], frames, self.input.volume(), self.input.pan());
            mix_add(&mut out[..len], &scratch[..needed]);
        }

        // Step 6: master-routed chain processes the summed signal.
        if route == FxRoute::Master {
            self.chain.lock().process(&mut out[..len], frames, rate);
        }

        // Step 7: master volume/pan, or silence if master-muted.
        if self.master.muted() {
            out[..len].iter_mut().for_each(|s| *s = 0);
        } else {
            apply_volume_pan(&mut out[..len], frames, self.master.volume(), self.master.pan());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decoder::mock::MockDecoder;
    use std::sync::{Arc, Mutex as StdMutex};

    fn make_scratch(frames: usize) -> Vec<i16> {
        vec![0i16; frames * 2]
    }

    fn make_f32_scratch(frames: usize) -> Vec<f32> {
        vec![0.0f32; frames * 2]
    }

    #[test]
    fn test_no_decoder_silence() {
        let graph = MixGraph::new(48_000, 100);
        let mut out = vec![1i16; 16];
        let mut scratch = make_scratch(8);
        let mut f32_scratch = make_f32_scratch(8);
        graph.render(&mut out, 8, &mut scratch, &mut f32_scratch);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_master_mute_zeroes_output() {
        let graph = MixGraph::new(48_000, 100);
        let mut mock = MockDecoder::new(2, 4, 2);
        mock.set_playing(true);
        let decoder: SharedDecoder = Arc::new(StdMutex::new(Box::new(mock)));
        graph.set_decoder(Some(decoder));
        graph.master_bus().set_muted(true);
        let mut out = vec![0i16; 16];
        let mut scratch = make_scratch(8);
        let mut f32_scratch = make_f32_scratch(8);
        graph.render(&mut out, 8, &mut scratch, &mut f32_scratch);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_fx_route_playback_decays_when_idle() {
        let graph = MixGraph::new(48_000, 100);
        graph.set_fx_route(FxRoute::Playback);
        graph.chain().lock().set_enabled(crate::effects::Stage::Delay, true);
        // No decoder loaded at all; chain still runs on the zeroed buffer
        // (step 3 of §4.C applies even with no decoder present).
        let mut out = vec![5i16; 16];
        let mut scratch = make_scratch(8);
        let mut f32_scratch = make_f32_scratch(8);
        graph.render(&mut out, 8, &mut scratch, &mut f32_scratch);
        assert!(out.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_capture_underrun_is_silent_not_blocking() {
        let graph = MixGraph::new(48_000, 100);
        let mut out = vec![0i16; 16];
        let mut scratch = make_scratch(8);
        let mut f32_scratch = make_f32_scratch(8);
        // Capture ring is empty; render must still return promptly.
        graph.render(&mut out, 8, &mut scratch, &mut f32_scratch);
        assert!(out.iter().all(|&s| s == 0));
    }
}
