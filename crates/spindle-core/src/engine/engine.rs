//! Main engine - ties together decks, mixer, sync and the output stream
//!
//! [`EngineCore`] is the audio-thread half: it owns the mixer and runs the
//! per-callback sequence (sync tempo update, deck renders, crossfade,
//! throttled position events). [`Engine`] is the host-thread half: it owns
//! the deck/sync handles, the output stream and the event consumer.

use std::sync::{Arc, Mutex};

use crate::audio::{self, AudioResult, OutputHandle};
use crate::types::{AtomicF32, StereoSample, MAX_BUFFER_SIZE, NUM_DECKS};

use super::deck::Deck;
use super::events::{event_channel, EngineEvent};
use super::mixer::Mixer;
use super::sync::SyncManager;

/// Default output rate when the host passes no preference
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
/// Default device buffer size in frames
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Capacity of the audio→host event ring. Position events drain at ~10 Hz
/// per deck, so this covers seconds of host stall.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Target rate for position notifications
const POSITION_RATE_HZ: f64 = 10.0;

/// The audio-thread side of the engine.
///
/// Everything `process` touches is either owned here, an atomic, or behind a
/// try-lock; a callback's work is bounded and never blocks or allocates.
pub struct EngineCore {
    decks: [Arc<Deck>; NUM_DECKS],
    sync: Arc<SyncManager>,
    mixer: Mixer,
    events: rtrb::Producer<EngineEvent>,
    tick: u32,
    ticks_per_position: u32,
}

impl EngineCore {
    /// Render one buffer: sync tempo update, deck renders, crossfade,
    /// throttled position reports.
    pub fn process(&mut self, out: &mut [StereoSample]) {
        self.sync.update(&self.decks);

        let statuses = self.mixer.mix(&self.decks[0], &self.decks[1], out);
        for (deck, status) in statuses.iter().enumerate() {
            if status.ended {
                let _ = self.events.push(EngineEvent::TrackEnded { deck });
            }
        }

        self.tick += 1;
        if self.tick >= self.ticks_per_position {
            self.tick = 0;
            for (deck, d) in self.decks.iter().enumerate() {
                let _ = self.events.push(EngineEvent::Position {
                    deck,
                    seconds: d.position_seconds(),
                });
            }
        }
    }
}

/// The host-facing engine: lifecycle, deck access, mixer and sync control.
pub struct Engine {
    decks: [Arc<Deck>; NUM_DECKS],
    sync: Arc<SyncManager>,
    crossfader: Arc<AtomicF32>,
    core: Arc<Mutex<EngineCore>>,
    events: rtrb::Consumer<EngineEvent>,
    output: Option<OutputHandle>,
    sample_rate: u32,
    buffer_size: u32,
}

impl Engine {
    /// Create an engine with two empty decks.
    ///
    /// `buffer_size` is the device period the render path is sized for;
    /// changing it requires recreating the engine.
    pub fn new(sample_rate: u32, buffer_size: u32) -> Self {
        let buffer_size = buffer_size.clamp(32, MAX_BUFFER_SIZE as u32);
        let decks = [
            Arc::new(Deck::new(0, sample_rate)),
            Arc::new(Deck::new(1, sample_rate)),
        ];
        let sync = Arc::new(SyncManager::new());
        let crossfader = Arc::new(AtomicF32::new(0.5));
        let (event_tx, event_rx) = event_channel(EVENT_QUEUE_CAPACITY);

        let ticks_per_position = (sample_rate as f64 / (POSITION_RATE_HZ * buffer_size as f64))
            .round()
            .max(1.0) as u32;

        let core = EngineCore {
            decks: [Arc::clone(&decks[0]), Arc::clone(&decks[1])],
            sync: Arc::clone(&sync),
            mixer: Mixer::new(Arc::clone(&crossfader)),
            events: event_tx,
            tick: 0,
            ticks_per_position,
        };

        log::info!(
            "engine created: {} Hz, {} frame buffers, position reports every {} callbacks",
            sample_rate,
            buffer_size,
            ticks_per_position
        );

        Self {
            decks,
            sync,
            crossfader,
            core: Arc::new(Mutex::new(core)),
            events: event_rx,
            output: None,
            sample_rate,
            buffer_size,
        }
    }

    /// Open the output device and begin callbacks
    pub fn start(&mut self) -> AudioResult<()> {
        if self.output.is_some() {
            return Err(audio::AudioError::AlreadyRunning);
        }
        let handle = audio::start_output(Arc::clone(&self.core), self.sample_rate, self.buffer_size)?;
        self.output = Some(handle);
        Ok(())
    }

    /// Stop callbacks and close the device
    pub fn stop(&mut self) {
        if self.output.take().is_some() {
            log::info!("audio output stopped");
        }
    }

    /// Whether the output stream is open and healthy
    pub fn is_running(&self) -> bool {
        match &self.output {
            Some(handle) => !handle.faulted(),
            None => false,
        }
    }

    /// Deck by index (0 or 1)
    pub fn deck(&self, id: usize) -> Option<&Arc<Deck>> {
        self.decks.get(id)
    }

    /// Both decks
    pub fn decks(&self) -> &[Arc<Deck>; NUM_DECKS] {
        &self.decks
    }

    /// The sync manager
    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    /// Crossfader position: 0 = full deck A, 1 = full deck B; saturates
    pub fn set_crossfader(&self, position: f32) {
        self.crossfader.store(position.clamp(0.0, 1.0));
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader.load()
    }

    /// Pop one pending notification, if any
    pub fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop().ok()
    }

    /// Render a block without a device (headless/offline processing).
    ///
    /// Must not be called while the output stream is running; the device
    /// callback owns the render cadence then.
    pub fn render(&self, out: &mut [StereoSample]) {
        let mut core = self.core.lock().unwrap();
        for chunk in out.chunks_mut(MAX_BUFFER_SIZE) {
            core.process(chunk);
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PcmBuffer;
    use crate::types::Sample;

    const SR: u32 = 44100;

    fn sine_track(seconds: f64, freq: f64, amplitude: f64) -> Arc<PcmBuffer> {
        let frames = (seconds * SR as f64) as usize;
        let samples = (0..frames)
            .map(|i| {
                let t = i as f64 / SR as f64;
                let v = (2.0 * std::f64::consts::PI * freq * t).sin() * amplitude;
                StereoSample::mono(v as Sample)
            })
            .collect();
        Arc::new(PcmBuffer::from_frames(samples, SR))
    }

    fn render_buffers(engine: &Engine, buffers: usize, frames: usize) -> Vec<StereoSample> {
        let mut collected = Vec::with_capacity(buffers * frames);
        let mut block = vec![StereoSample::silence(); frames];
        for _ in 0..buffers {
            engine.render(&mut block);
            collected.extend_from_slice(&block);
        }
        collected
    }

    #[test]
    fn test_fast_path_playthrough_rms_and_position() {
        let mut engine = Engine::new(SR, 512);
        let deck = Arc::clone(engine.deck(0).unwrap());
        deck.load_buffer(sine_track(5.0, 1000.0, 0.5));
        deck.set_gain(1.0);
        engine.set_crossfader(0.0);
        deck.play(None);

        // ~1.0 s of 512-frame buffers
        let buffers = (SR as usize).div_ceil(512);
        let rendered = render_buffers(&engine, buffers, 512);

        let expected_pos = (buffers * 512) as f64 / SR as f64;
        assert!((deck.position_seconds() - expected_pos).abs() < 1e-9);
        assert!((deck.position_seconds() - 1.0).abs() <= 512.0 / SR as f64);

        let rms = (rendered
            .iter()
            .map(|s| (s.left as f64).powi(2))
            .sum::<f64>()
            / rendered.len() as f64)
            .sqrt();
        let expected = 0.5 / std::f64::consts::SQRT_2;
        assert!(
            (rms - expected).abs() / expected < 0.01,
            "sine RMS {rms} should be within 1% of {expected}"
        );

        // Position events were throttled out at ~10 Hz
        let mut positions = 0;
        while let Some(event) = engine.poll_event() {
            if matches!(event, EngineEvent::Position { .. }) {
                positions += 1;
            }
        }
        assert!((positions / 2) >= 8 && (positions / 2) <= 12);
    }

    #[test]
    fn test_end_of_track_event_fires_once() {
        let mut engine = Engine::new(SR, 512);
        let deck = Arc::clone(engine.deck(0).unwrap());
        deck.load_buffer(sine_track(0.1, 440.0, 0.5));
        deck.play(None);

        // Render a full second into a 0.1 s track
        let rendered = render_buffers(&engine, 87, 512);

        assert!(!deck.is_playing());
        assert!((deck.position_seconds() - deck.duration_seconds()).abs() < 1e-9);

        let ended: Vec<_> = std::iter::from_fn(|| engine.poll_event())
            .filter(|e| matches!(e, EngineEvent::TrackEnded { deck: 0 }))
            .collect();
        assert_eq!(ended.len(), 1);

        // Tail past the end is exact silence
        let tail = &rendered[5000..];
        assert!(tail.iter().all(|s| s.left == 0.0 && s.right == 0.0));
    }

    #[test]
    fn test_align_now_keeps_decks_in_lockstep() {
        let engine = Engine::new(SR, 512);
        let deck_a = Arc::clone(engine.deck(0).unwrap());
        let deck_b = Arc::clone(engine.deck(1).unwrap());

        let track = sine_track(10.0, 220.0, 0.4);
        deck_a.load_buffer(Arc::clone(&track));
        deck_b.load_buffer(track);

        deck_a.play(None);
        render_buffers(&engine, 13, 512);

        engine.sync().align_now(&deck_b, &deck_a);
        deck_b.play(None);

        for _ in 0..20 {
            render_buffers(&engine, 1, 512);
            let diff = deck_a.cursor_frames().abs_diff(deck_b.cursor_frames());
            assert!(diff <= 1, "decks drifted {diff} frames apart");
        }
    }

    #[test]
    fn test_cued_start_downbeat_coincidence() {
        let engine = Engine::new(SR, 441);
        let master = Arc::clone(engine.deck(0).unwrap());
        let slave = Arc::clone(engine.deck(1).unwrap());

        master.load_buffer(sine_track(30.0, 55.0, 0.3));
        slave.load_buffer(sine_track(30.0, 55.0, 0.3));

        master.set_bpm(120.0);
        master.set_beat_offset(0.050);
        slave.set_bpm(128.0);
        slave.set_beat_offset(0.200);

        master.play(None);
        master.set_position(3.200);

        engine.sync().play_synced(&slave, &master);
        assert!(slave.is_playing());

        // Δt = 0.350 s of wall clock = 35 buffers of 441 frames
        render_buffers(&engine, 35, 441);

        // Master lands exactly on a beat boundary...
        assert!(master.phase() < 1e-6 || master.phase() > 1.0 - 1e-6);
        // ...and the slave's cursor sits on its own downbeat grid.
        let spb = slave.sample_rate() as f64 / (128.0 / 60.0);
        let phase = slave.phase();
        let frames_off = phase.min(1.0 - phase) * spb;
        assert!(
            frames_off <= 1.0,
            "slave downbeat missed by {frames_off:.2} frames"
        );
    }

    #[test]
    fn test_crossfader_saturates() {
        let engine = Engine::new(SR, 512);

        engine.set_crossfader(-1.0);
        assert_eq!(engine.crossfader(), 0.0);

        engine.set_crossfader(2.0);
        assert_eq!(engine.crossfader(), 1.0);
    }

    #[test]
    fn test_load_unload_load_duration_round_trip() {
        let engine = Engine::new(SR, 512);
        let deck = engine.deck(0).unwrap();
        let track = sine_track(2.5, 330.0, 0.2);

        deck.load_buffer(Arc::clone(&track));
        let first = deck.duration_seconds();

        deck.unload();
        assert_eq!(deck.duration_seconds(), 0.0);

        deck.load_buffer(track);
        assert_eq!(deck.duration_seconds(), first);
    }
}
