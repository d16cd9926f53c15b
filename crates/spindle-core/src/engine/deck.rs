//! Deck - one independent playback voice
//!
//! A deck owns its loaded track, playback cursor, time-stretch stage, EQ and
//! gain. Control operations run on host threads; [`Deck::render`] is the only
//! audio-thread entry point.
//!
//! # Concurrency
//!
//! The cursor and play state are atomics so the audio thread reads them
//! without blocking. All parameters are word-sized scalars published with
//! release/acquire ordering. The PCM handle, the stretcher and the EQ filter
//! state live behind a mutex; the audio thread only ever `try_lock`s it and
//! renders silence for the deck while the host holds it (typically during a
//! load).

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use signalsmith_stretch::Stretch;

use crate::decode::{self, DecodeError, PcmBuffer};
use crate::types::{AtomicF32, AtomicF64, PlayState, StereoSample};

use super::eq::ThreeBandEq;

/// Valid playback-speed range; assignments saturate to it
pub const MIN_TEMPO_RATIO: f64 = 0.5;
pub const MAX_TEMPO_RATIO: f64 = 2.0;

/// Valid pitch-shift range in semitones; assignments saturate to it
pub const MAX_PITCH_SEMITONES: f64 = 12.0;

// The stretcher prebuffers internally, which ruins sample-accurate sync.
// Within these tolerances the deck reads straight from the PCM buffer.
const FAST_PATH_TEMPO_EPSILON: f64 = 1e-3;
const FAST_PATH_PITCH_EPSILON: f64 = 0.1;

/// Outcome of one render call
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStatus {
    /// The track ran out during this call; the deck is now paused at its end
    pub ended: bool,
}

/// State guarded by the per-deck mutex
struct DeckInner {
    pcm: Option<Arc<PcmBuffer>>,
    stretcher: Stretch,
    eq: ThreeBandEq,
    /// Fractional source frames carried between stretch-path renders
    feed_frac: f64,
    /// Whether the previous render went through the stretcher
    last_path_stretched: bool,
}

/// One playback voice of the engine
pub struct Deck {
    id: usize,
    sample_rate: u32,

    state: AtomicU8,
    cursor: AtomicU64,
    total_frames: AtomicU64,

    gain: AtomicF32,
    tempo_ratio: AtomicF64,
    pitch_semitones: AtomicF64,
    bpm: AtomicF64,
    beat_offset: AtomicF64,

    eq_low: AtomicF32,
    eq_mid: AtomicF32,
    eq_high: AtomicF32,
    eq_dirty: AtomicBool,

    inner: Mutex<DeckInner>,
}

impl Deck {
    /// Create an empty deck rendering at `sample_rate`
    pub fn new(id: usize, sample_rate: u32) -> Self {
        Self {
            id,
            sample_rate,
            state: AtomicU8::new(PlayState::Stopped as u8),
            cursor: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            gain: AtomicF32::new(1.0),
            tempo_ratio: AtomicF64::new(1.0),
            pitch_semitones: AtomicF64::new(0.0),
            bpm: AtomicF64::new(0.0),
            beat_offset: AtomicF64::new(0.0),
            eq_low: AtomicF32::new(1.0),
            eq_mid: AtomicF32::new(1.0),
            eq_high: AtomicF32::new(1.0),
            eq_dirty: AtomicBool::new(false),
            inner: Mutex::new(DeckInner {
                pcm: None,
                stretcher: Stretch::preset_default(2, sample_rate),
                eq: ThreeBandEq::new(sample_rate),
                feed_frac: 0.0,
                last_path_stretched: false,
            }),
        }
    }

    /// Deck index (0 = A, 1 = B)
    pub fn id(&self) -> usize {
        self.id
    }

    /// Output sample rate the deck renders at
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // --- Track management (host thread) ---

    /// Decode a file and load it, replacing any current track.
    ///
    /// Decoding happens before the deck mutex is taken, so the audio thread
    /// keeps rendering the old track until the swap itself.
    pub fn load(&self, path: &Path) -> Result<(), DecodeError> {
        let pcm = decode::decode_file(path)?;
        if pcm.sample_rate() != self.sample_rate {
            log::warn!(
                "deck {}: source rate {} Hz differs from output rate {} Hz",
                self.id,
                pcm.sample_rate(),
                self.sample_rate
            );
        }
        self.load_buffer(pcm);
        Ok(())
    }

    /// Load an already-decoded buffer, replacing any current track
    pub fn load_buffer(&self, pcm: Arc<PcmBuffer>) {
        let frames = pcm.frames();
        let mut inner = self.inner.lock().unwrap();
        inner.pcm = Some(pcm);
        inner.stretcher.reset();
        inner.eq.reset();
        inner.feed_frac = 0.0;
        // Publish playback state only after the buffer swap so the audio
        // thread never observes a cursor beyond the new track.
        self.state.store(PlayState::Stopped as u8, Ordering::Release);
        self.cursor.store(0, Ordering::Release);
        self.total_frames.store(frames, Ordering::Release);
        log::info!("deck {}: loaded track ({} frames)", self.id, frames);
    }

    /// Unload the current track and return to the empty state
    pub fn unload(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.state.store(PlayState::Stopped as u8, Ordering::Release);
        self.cursor.store(0, Ordering::Release);
        self.total_frames.store(0, Ordering::Release);
        inner.pcm = None;
        inner.stretcher.reset();
        inner.eq.reset();
        inner.feed_frac = 0.0;
    }

    /// Whether a track is loaded
    pub fn has_track(&self) -> bool {
        self.total_frames.load(Ordering::Acquire) > 0
    }

    /// The loaded PCM buffer, if any (for analysis)
    pub fn pcm(&self) -> Option<Arc<PcmBuffer>> {
        self.inner.lock().unwrap().pcm.clone()
    }

    // --- Transport (host thread) ---

    /// Start or resume playback.
    ///
    /// With `start_frame` supplied the cursor is moved and the stretcher
    /// flushed before the transition to playing, so the first rendered frame
    /// comes from the requested position.
    pub fn play(&self, start_frame: Option<u64>) {
        let total = self.total_frames.load(Ordering::Acquire);
        if total == 0 {
            return;
        }
        if let Some(frame) = start_frame {
            let mut inner = self.inner.lock().unwrap();
            self.cursor.store(frame.min(total), Ordering::Release);
            inner.stretcher.reset();
            inner.eq.reset();
            inner.feed_frac = 0.0;
        }
        self.state.store(PlayState::Playing as u8, Ordering::Release);
    }

    /// Pause, holding the cursor in place
    pub fn pause(&self) {
        if self.state() == PlayState::Playing {
            self.state.store(PlayState::Paused as u8, Ordering::Release);
        }
    }

    /// Stop and rewind to the start of the track
    pub fn stop(&self) {
        if !self.has_track() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        self.state.store(PlayState::Stopped as u8, Ordering::Release);
        self.cursor.store(0, Ordering::Release);
        inner.stretcher.reset();
        inner.eq.reset();
        inner.feed_frac = 0.0;
    }

    /// Current playback state
    pub fn state(&self) -> PlayState {
        PlayState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the deck is consuming samples
    pub fn is_playing(&self) -> bool {
        self.state() == PlayState::Playing
    }

    /// Seek to a position in seconds
    pub fn set_position(&self, seconds: f64) {
        let total = self.total_frames.load(Ordering::Acquire);
        if total == 0 {
            return;
        }
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as u64;
        self.set_cursor_frames(frame.min(total));
    }

    /// Current position in seconds
    pub fn position_seconds(&self) -> f64 {
        self.cursor.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    /// Duration of the loaded track in seconds (0 when empty)
    pub fn duration_seconds(&self) -> f64 {
        self.total_frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    /// Source-domain cursor position in frames
    pub fn cursor_frames(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Frame count of the loaded track (0 when empty)
    pub fn frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    /// Move the cursor to an absolute frame, flushing the stretcher.
    ///
    /// The flush guarantees no latent samples from the previous position
    /// bleed into the new one; sync alignment depends on this.
    pub fn set_cursor_frames(&self, frame: u64) {
        let total = self.total_frames.load(Ordering::Acquire);
        let mut inner = self.inner.lock().unwrap();
        self.cursor.store(frame.min(total), Ordering::Release);
        inner.stretcher.reset();
        inner.eq.reset();
        inner.feed_frac = 0.0;
    }

    // --- Parameters (host thread; all saturate to their valid ranges) ---

    /// Linear volume in `[0, 1]`
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.clamp(0.0, 1.0));
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Playback speed ratio, saturated to `[0.5, 2.0]`
    pub fn set_tempo(&self, ratio: f64) {
        self.tempo_ratio
            .store(ratio.clamp(MIN_TEMPO_RATIO, MAX_TEMPO_RATIO));
    }

    pub fn tempo(&self) -> f64 {
        self.tempo_ratio.load()
    }

    /// Pitch shift in semitones, saturated to `[-12, 12]`
    pub fn set_pitch(&self, semitones: f64) {
        let semitones = semitones.clamp(-MAX_PITCH_SEMITONES, MAX_PITCH_SEMITONES);
        self.pitch_semitones.store(semitones);
        let mut inner = self.inner.lock().unwrap();
        inner
            .stretcher
            .set_transpose_factor_semitones(semitones as f32, None);
    }

    pub fn pitch(&self) -> f64 {
        self.pitch_semitones.load()
    }

    /// Declared tempo of the loaded track; 0 means unknown
    pub fn set_bpm(&self, bpm: f64) {
        self.bpm.store(bpm.max(0.0));
    }

    pub fn bpm(&self) -> f64 {
        self.bpm.load()
    }

    /// Position of the first downbeat, in source-domain seconds
    pub fn set_beat_offset(&self, seconds: f64) {
        self.beat_offset.store(seconds.max(0.0));
    }

    pub fn beat_offset(&self) -> f64 {
        self.beat_offset.load()
    }

    pub fn set_eq_low(&self, gain: f32) {
        self.eq_low.store(gain.clamp(0.0, 2.0));
        self.eq_dirty.store(true, Ordering::Release);
    }

    pub fn set_eq_mid(&self, gain: f32) {
        self.eq_mid.store(gain.clamp(0.0, 2.0));
        self.eq_dirty.store(true, Ordering::Release);
    }

    pub fn set_eq_high(&self, gain: f32) {
        self.eq_high.store(gain.clamp(0.0, 2.0));
        self.eq_dirty.store(true, Ordering::Release);
    }

    pub fn eq_gains(&self) -> (f32, f32, f32) {
        (self.eq_low.load(), self.eq_mid.load(), self.eq_high.load())
    }

    /// Fractional position within the current beat, in `[0, 1)`.
    ///
    /// Zero when the BPM is unknown.
    pub fn phase(&self) -> f64 {
        let bpm = self.bpm.load();
        if bpm <= 0.0 {
            return 0.0;
        }
        let samples_per_beat = (self.sample_rate as f64 * 60.0 / bpm).round() as i64;
        if samples_per_beat <= 0 {
            return 0.0;
        }
        let offset_frames = (self.sample_rate as f64 * self.beat_offset.load()).round() as i64;
        let adjusted = self.cursor.load(Ordering::Acquire) as i64 - offset_frames;
        let into_beat = adjusted.rem_euclid(samples_per_beat);
        into_beat as f64 / samples_per_beat as f64
    }

    // --- Rendering (audio thread only) ---

    /// Write exactly `out.len()` frames of this deck's output.
    ///
    /// Silence when not playing, when no track is loaded, or when the host
    /// currently holds the deck mutex.
    pub fn render(&self, out: &mut [StereoSample]) -> RenderStatus {
        out.fill(StereoSample::silence());

        if self.state() != PlayState::Playing {
            return RenderStatus::default();
        }

        let Ok(mut guard) = self.inner.try_lock() else {
            return RenderStatus::default();
        };
        let inner = &mut *guard;
        let Some(pcm) = inner.pcm.as_ref() else {
            return RenderStatus::default();
        };

        if self.eq_dirty.swap(false, Ordering::AcqRel) {
            inner
                .eq
                .set_gains(self.eq_low.load(), self.eq_mid.load(), self.eq_high.load());
        }

        let tempo = self.tempo_ratio.load();
        let pitch = self.pitch_semitones.load();
        let total = pcm.frames();
        let cursor = self.cursor.load(Ordering::Acquire);

        if cursor >= total {
            return self.finish_track(inner, total);
        }

        let fast_path = (tempo - 1.0).abs() < FAST_PATH_TEMPO_EPSILON
            && pitch.abs() < FAST_PATH_PITCH_EPSILON;

        let (consumed, produced) = if fast_path {
            if inner.last_path_stretched {
                // Drop latent stretcher samples from the previous position
                inner.stretcher.reset();
                inner.feed_frac = 0.0;
                inner.last_path_stretched = false;
            }
            let n = out.len().min((total - cursor) as usize);
            out[..n].copy_from_slice(&pcm.frames_slice()[cursor as usize..cursor as usize + n]);
            (n as u64, n)
        } else {
            inner.last_path_stretched = true;
            // The stretcher consumes tempo-scaled source frames per output
            // buffer; the fractional remainder carries over so the long-run
            // consumption rate is exact.
            let want = out.len() as f64 * tempo + inner.feed_frac;
            let feed = (want.floor() as u64).min(total - cursor);
            inner.feed_frac = want - want.floor();

            let input = &pcm.frames_slice()[cursor as usize..(cursor + feed) as usize];
            let input_interleaved = bytemuck::cast_slice::<StereoSample, f32>(input);
            let out_interleaved = bytemuck::cast_slice_mut::<StereoSample, f32>(out);
            inner.stretcher.process(input_interleaved, out_interleaved);
            (feed, out.len())
        };

        let new_cursor = cursor + consumed;
        self.cursor.store(new_cursor, Ordering::Release);

        inner.eq.process(&mut out[..produced]);
        let gain = self.gain.load();
        for sample in &mut out[..produced] {
            *sample *= gain;
        }

        if new_cursor >= total {
            self.finish_track(inner, total)
        } else {
            RenderStatus::default()
        }
    }

    /// Source exhausted: park the deck at end-of-track.
    fn finish_track(&self, inner: &mut DeckInner, total: u64) -> RenderStatus {
        self.cursor.store(total, Ordering::Release);
        self.state.store(PlayState::Paused as u8, Ordering::Release);
        inner.stretcher.reset();
        inner.feed_frac = 0.0;
        RenderStatus { ended: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;

    const SR: u32 = 44100;

    /// A track whose left channel encodes the frame index, for cursor checks.
    fn ramp_track(frames: usize) -> Arc<PcmBuffer> {
        let samples = (0..frames)
            .map(|i| StereoSample::new(i as Sample * 1e-6, 0.25))
            .collect();
        Arc::new(PcmBuffer::from_frames(samples, SR))
    }

    fn render_frames(deck: &Deck, frames: usize) -> (Vec<StereoSample>, RenderStatus) {
        let mut out = vec![StereoSample::silence(); frames];
        let status = deck.render(&mut out);
        (out, status)
    }

    #[test]
    fn test_empty_deck_renders_silence() {
        let deck = Deck::new(0, SR);
        deck.play(None); // no-op without a track
        assert!(!deck.is_playing());

        let (out, status) = render_frames(&deck, 128);
        assert!(!status.ended);
        assert!(out.iter().all(|s| s.left == 0.0 && s.right == 0.0));
    }

    #[test]
    fn test_state_machine() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(SR as usize));
        assert_eq!(deck.state(), PlayState::Stopped);

        deck.play(None);
        assert_eq!(deck.state(), PlayState::Playing);

        deck.pause();
        assert_eq!(deck.state(), PlayState::Paused);

        deck.play(None);
        assert_eq!(deck.state(), PlayState::Playing);

        render_frames(&deck, 512);
        assert!(deck.cursor_frames() > 0);

        deck.stop();
        assert_eq!(deck.state(), PlayState::Stopped);
        assert_eq!(deck.cursor_frames(), 0);

        deck.unload();
        assert!(!deck.has_track());
        assert_eq!(deck.duration_seconds(), 0.0);
    }

    #[test]
    fn test_fast_path_starts_at_requested_frame() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(SR as usize));
        deck.play(Some(1000));

        let (out, _) = render_frames(&deck, 64);
        assert!((out[0].left - 1000.0 * 1e-6).abs() < 1e-9);
        assert!((out[63].left - 1063.0 * 1e-6).abs() < 1e-9);
        assert_eq!(deck.cursor_frames(), 1064);
    }

    #[test]
    fn test_fast_path_applies_gain() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(SR as usize));
        deck.set_gain(0.5);
        deck.play(None);

        let (out, _) = render_frames(&deck, 16);
        assert!((out[4].right - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_position_round_trip() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(5 * SR as usize));

        deck.set_position(1.25);
        assert!((deck.position_seconds() - 1.25).abs() < 1.0 / SR as f64);
        assert_eq!(deck.cursor_frames(), (1.25 * SR as f64) as u64);
    }

    #[test]
    fn test_position_clamps_to_track() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(SR as usize));

        deck.set_position(-5.0);
        assert_eq!(deck.cursor_frames(), 0);

        deck.set_position(100.0);
        assert_eq!(deck.cursor_frames(), SR as u64);
    }

    #[test]
    fn test_end_of_track_pauses_and_reports() {
        let frames = 1000;
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(frames));
        deck.play(None);

        let (_, first) = render_frames(&deck, 512);
        assert!(!first.ended);

        let (out, second) = render_frames(&deck, 512);
        assert!(second.ended);
        // Tail after the 488 real frames is silence
        assert!(out[488..].iter().all(|s| s.left == 0.0 && s.right == 0.0));

        assert_eq!(deck.state(), PlayState::Paused);
        assert_eq!(deck.cursor_frames(), frames as u64);
        assert!((deck.position_seconds() - deck.duration_seconds()).abs() < 1e-9);

        // Further renders are silent and do not re-report the end
        let (out, third) = render_frames(&deck, 512);
        assert!(!third.ended);
        assert!(out.iter().all(|s| s.left == 0.0));
    }

    #[test]
    fn test_parameter_saturation() {
        let deck = Deck::new(0, SR);

        deck.set_tempo(0.0);
        assert_eq!(deck.tempo(), 0.5);
        deck.set_tempo(10.0);
        assert_eq!(deck.tempo(), 2.0);

        deck.set_pitch(100.0);
        assert_eq!(deck.pitch(), 12.0);
        deck.set_pitch(-100.0);
        assert_eq!(deck.pitch(), -12.0);

        deck.set_gain(3.0);
        assert_eq!(deck.gain(), 1.0);
        deck.set_gain(-1.0);
        assert_eq!(deck.gain(), 0.0);

        deck.set_eq_low(-1.0);
        deck.set_eq_mid(1e6);
        deck.set_eq_high(0.75);
        assert_eq!(deck.eq_gains(), (0.0, 2.0, 0.75));

        deck.set_bpm(-10.0);
        assert_eq!(deck.bpm(), 0.0);

        deck.set_beat_offset(-2.0);
        assert_eq!(deck.beat_offset(), 0.0);
    }

    #[test]
    fn test_phase_sawtooth() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(10 * SR as usize));
        deck.set_bpm(120.0); // 22050 frames per beat
        deck.set_beat_offset(0.1); // 4410 frames

        deck.set_cursor_frames(4410);
        assert!(deck.phase().abs() < 1e-9);

        deck.set_cursor_frames(4410 + 11025);
        assert!((deck.phase() - 0.5).abs() < 1e-6);

        // Before the first downbeat the phase still wraps into [0, 1)
        deck.set_cursor_frames(0);
        let phase = deck.phase();
        assert!((0.0..1.0).contains(&phase));
        assert!((phase - 0.8).abs() < 1e-6);

        deck.set_bpm(0.0);
        assert_eq!(deck.phase(), 0.0);
    }

    #[test]
    fn test_stretch_path_consumes_tempo_scaled_frames() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(4 * SR as usize));
        deck.set_tempo(1.5);
        deck.play(None);

        let buffers = 20;
        for _ in 0..buffers {
            render_frames(&deck, 512);
        }

        let expected = (buffers as f64 * 512.0 * 1.5) as u64;
        let cursor = deck.cursor_frames();
        assert!(
            cursor.abs_diff(expected) <= 1,
            "cursor {cursor} should track tempo-scaled consumption {expected}"
        );
    }

    #[test]
    fn test_cursor_bounds_invariant() {
        let deck = Deck::new(0, SR);
        deck.load_buffer(ramp_track(2000));
        deck.set_tempo(2.0);
        deck.play(None);

        for _ in 0..10 {
            render_frames(&deck, 512);
            assert!(deck.cursor_frames() <= deck.frames());
        }
    }
}
