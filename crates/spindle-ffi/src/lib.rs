//! Flat C ABI for the spindle DJ mixing engine
//!
//! Mirrors the classic two-deck engine header: lifecycle, per-deck transport
//! and parameters, mixer, sync and analysis entry points, all returning
//! `0`/negative status codes where a status is meaningful. Deck ids are 0
//! (deck A) and 1 (deck B).
//!
//! The engine lives in a hidden single-instance slot created by
//! [`engine_init`]. UI callbacks are never invoked from the audio thread:
//! the render callback enqueues events and a host-side worker spawned here
//! drains the queue every few milliseconds and calls the registered
//! function pointers.

#![allow(clippy::not_unsafe_ptr_arg_deref)] // FFI functions receive raw pointers from C

use std::ffi::{c_char, c_double, c_float, c_int, CStr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use spindle_core::engine::{Deck, Engine, EngineEvent};
use spindle_core::{analysis, NUM_DECKS};

/// UI notification signatures, identical to the original header
pub type PositionCallback = extern "C" fn(deck_id: c_int, position_seconds: c_double);
pub type TrackEndedCallback = extern "C" fn(deck_id: c_int);

/// How often the host worker drains pending engine events. Position events
/// are produced at ~10 Hz, so this keeps UI latency well under one report.
const DRAIN_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Clone, Copy, Default)]
struct Callbacks {
    position: Option<PositionCallback>,
    track_ended: Option<TrackEndedCallback>,
}

struct EngineSlot {
    engine: Engine,
    drain_stop: Arc<AtomicBool>,
    drain_thread: Option<JoinHandle<()>>,
}

static ENGINE: Mutex<Option<EngineSlot>> = Mutex::new(None);
static CALLBACKS: Mutex<Callbacks> = Mutex::new(Callbacks {
    position: None,
    track_ended: None,
});

fn with_engine<T>(f: impl FnOnce(&mut Engine) -> T) -> Option<T> {
    let mut slot = ENGINE.lock();
    slot.as_mut().map(|s| f(&mut s.engine))
}

fn with_deck<T>(deck_id: c_int, f: impl FnOnce(&Arc<Deck>) -> T) -> Option<T> {
    if deck_id < 0 || deck_id as usize >= NUM_DECKS {
        return None;
    }
    with_engine(|engine| engine.deck(deck_id as usize).map(Arc::clone)).flatten().map(|d| f(&d))
}

/// Drain pending events and fan them out to the registered callbacks.
///
/// Events are collected under the engine lock but callbacks run outside it,
/// so host code is free to call back into this ABI.
fn drain_events(stop: &AtomicBool) {
    let mut pending: Vec<EngineEvent> = Vec::new();
    while !stop.load(Ordering::Acquire) {
        pending.clear();
        {
            let mut slot = ENGINE.lock();
            if let Some(slot) = slot.as_mut() {
                while let Some(event) = slot.engine.poll_event() {
                    pending.push(event);
                }
            }
        }

        let callbacks = *CALLBACKS.lock();
        for event in &pending {
            match *event {
                EngineEvent::Position { deck, seconds } => {
                    if let Some(cb) = callbacks.position {
                        cb(deck as c_int, seconds);
                    }
                }
                EngineEvent::TrackEnded { deck } => {
                    if let Some(cb) = callbacks.track_ended {
                        cb(deck as c_int);
                    }
                }
            }
        }

        std::thread::sleep(DRAIN_INTERVAL);
    }
}

// ─────────────────────────────────────────────────────────────
// Engine lifecycle
// ─────────────────────────────────────────────────────────────

/// Create the engine. Returns 0 on success, -1 if already initialised or
/// the parameters are out of range.
#[no_mangle]
pub extern "C" fn engine_init(sample_rate: c_int, buffer_size: c_int) -> c_int {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init();

    if sample_rate <= 0 || buffer_size <= 0 {
        return -1;
    }

    let mut slot = ENGINE.lock();
    if slot.is_some() {
        return -1;
    }

    let engine = Engine::new(sample_rate as u32, buffer_size as u32);
    let drain_stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&drain_stop);
    let drain_thread = std::thread::Builder::new()
        .name("spindle-events".to_string())
        .spawn(move || drain_events(&stop_flag))
        .ok();

    *slot = Some(EngineSlot {
        engine,
        drain_stop,
        drain_thread,
    });
    0
}

/// Stop everything and free the engine
#[no_mangle]
pub extern "C" fn engine_shutdown() {
    let slot = ENGINE.lock().take();
    if let Some(mut slot) = slot {
        slot.engine.stop();
        slot.drain_stop.store(true, Ordering::Release);
        if let Some(handle) = slot.drain_thread.take() {
            let _ = handle.join();
        }
    }
    *CALLBACKS.lock() = Callbacks::default();
}

/// Open the output device and begin rendering. Returns 0 on success.
#[no_mangle]
pub extern "C" fn engine_start() -> c_int {
    match with_engine(|engine| engine.start()) {
        Some(Ok(())) => 0,
        Some(Err(e)) => {
            log::error!("engine start failed: {e}");
            -1
        }
        None => -1,
    }
}

/// Halt rendering and close the output device
#[no_mangle]
pub extern "C" fn engine_stop() {
    with_engine(|engine| engine.stop());
}

// ─────────────────────────────────────────────────────────────
// Deck operations
// ─────────────────────────────────────────────────────────────

/// Load a track into a deck. Returns 0 on success, -1 on any failure.
#[no_mangle]
pub extern "C" fn deck_load_track(deck_id: c_int, file_path: *const c_char) -> c_int {
    if file_path.is_null() {
        return -1;
    }
    let Ok(path) = unsafe { CStr::from_ptr(file_path) }.to_str() else {
        return -1;
    };

    match with_deck(deck_id, |deck| deck.load(Path::new(path))) {
        Some(Ok(())) => 0,
        Some(Err(e)) => {
            log::error!("deck {deck_id}: load failed: {e}");
            -1
        }
        None => -1,
    }
}

#[no_mangle]
pub extern "C" fn deck_unload_track(deck_id: c_int) {
    with_deck(deck_id, |deck| deck.unload());
}

#[no_mangle]
pub extern "C" fn deck_play(deck_id: c_int) {
    with_deck(deck_id, |deck| deck.play(None));
}

/// Start `deck_id` so that its first downbeat lands on the master's next
/// downbeat (cued start).
#[no_mangle]
pub extern "C" fn deck_play_synced(deck_id: c_int, master_deck_id: c_int) {
    if deck_id < 0
        || deck_id as usize >= NUM_DECKS
        || master_deck_id < 0
        || master_deck_id as usize >= NUM_DECKS
        || deck_id == master_deck_id
    {
        return;
    }
    with_engine(|engine| {
        let slave = Arc::clone(engine.deck(deck_id as usize).unwrap());
        let master = Arc::clone(engine.deck(master_deck_id as usize).unwrap());
        engine.sync().play_synced(&slave, &master);
    });
}

#[no_mangle]
pub extern "C" fn deck_pause(deck_id: c_int) {
    with_deck(deck_id, |deck| deck.pause());
}

#[no_mangle]
pub extern "C" fn deck_stop(deck_id: c_int) {
    with_deck(deck_id, |deck| deck.stop());
}

#[no_mangle]
pub extern "C" fn deck_set_position(deck_id: c_int, position_seconds: c_double) {
    if position_seconds.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_position(position_seconds));
}

#[no_mangle]
pub extern "C" fn deck_get_position(deck_id: c_int) -> c_double {
    with_deck(deck_id, |deck| deck.position_seconds()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn deck_get_duration(deck_id: c_int) -> c_double {
    with_deck(deck_id, |deck| deck.duration_seconds()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn deck_is_playing(deck_id: c_int) -> c_int {
    match with_deck(deck_id, |deck| deck.is_playing()) {
        Some(true) => 1,
        _ => 0,
    }
}

// ─────────────────────────────────────────────────────────────
// Deck parameters (out-of-range values saturate; NaN is ignored)
// ─────────────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn deck_set_volume(deck_id: c_int, volume: c_float) {
    if volume.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_gain(volume));
}

#[no_mangle]
pub extern "C" fn deck_set_tempo(deck_id: c_int, tempo: c_double) {
    if tempo.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_tempo(tempo));
}

#[no_mangle]
pub extern "C" fn deck_set_pitch(deck_id: c_int, semitones: c_double) {
    if semitones.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_pitch(semitones));
}

#[no_mangle]
pub extern "C" fn deck_set_bpm(deck_id: c_int, bpm: c_double) {
    if bpm.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_bpm(bpm));
}

#[no_mangle]
pub extern "C" fn deck_get_bpm(deck_id: c_int) -> c_double {
    with_deck(deck_id, |deck| deck.bpm()).unwrap_or(0.0)
}

#[no_mangle]
pub extern "C" fn deck_set_beat_offset(deck_id: c_int, offset_seconds: c_double) {
    if offset_seconds.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_beat_offset(offset_seconds));
}

#[no_mangle]
pub extern "C" fn deck_set_eq_low(deck_id: c_int, gain: c_float) {
    if gain.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_eq_low(gain));
}

#[no_mangle]
pub extern "C" fn deck_set_eq_mid(deck_id: c_int, gain: c_float) {
    if gain.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_eq_mid(gain));
}

#[no_mangle]
pub extern "C" fn deck_set_eq_high(deck_id: c_int, gain: c_float) {
    if gain.is_nan() {
        return;
    }
    with_deck(deck_id, |deck| deck.set_eq_high(gain));
}

// ─────────────────────────────────────────────────────────────
// Mixer
// ─────────────────────────────────────────────────────────────

/// Crossfader position: 0.0 = full deck A, 1.0 = full deck B
#[no_mangle]
pub extern "C" fn mixer_set_crossfader(position: c_float) {
    if position.is_nan() {
        return;
    }
    with_engine(|engine| engine.set_crossfader(position));
}

// ─────────────────────────────────────────────────────────────
// Sync
// ─────────────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn sync_enable(slave_deck_id: c_int, master_deck_id: c_int) {
    if slave_deck_id < 0 || master_deck_id < 0 {
        return;
    }
    with_engine(|engine| {
        engine
            .sync()
            .enable(slave_deck_id as usize, master_deck_id as usize)
    });
}

#[no_mangle]
pub extern "C" fn sync_disable(deck_id: c_int) {
    if deck_id < 0 {
        return;
    }
    with_engine(|engine| engine.sync().disable(deck_id as usize));
}

/// Immediate one-time alignment of the slave onto the master
#[no_mangle]
pub extern "C" fn sync_align_now(slave_deck_id: c_int, master_deck_id: c_int) {
    if slave_deck_id < 0
        || slave_deck_id as usize >= NUM_DECKS
        || master_deck_id < 0
        || master_deck_id as usize >= NUM_DECKS
        || slave_deck_id == master_deck_id
    {
        return;
    }
    with_engine(|engine| {
        let slave = Arc::clone(engine.deck(slave_deck_id as usize).unwrap());
        let master = Arc::clone(engine.deck(master_deck_id as usize).unwrap());
        engine.sync().align_now(&slave, &master);
    });
}

// ─────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────

/// Analyze the loaded track for tempo. Returns 0.0 on failure.
#[no_mangle]
pub extern "C" fn audio_analyze_bpm(deck_id: c_int) -> c_double {
    with_deck(deck_id, |deck| deck.pcm())
        .flatten()
        .map(|pcm| analysis::analyze_bpm(&pcm))
        .unwrap_or(0.0)
}

/// Analyze the loaded track for its first downbeat. Returns seconds, 0.0 on
/// failure or unknown BPM.
#[no_mangle]
pub extern "C" fn audio_analyze_beat_offset(deck_id: c_int, bpm: c_double) -> c_double {
    if bpm.is_nan() {
        return 0.0;
    }
    with_deck(deck_id, |deck| deck.pcm())
        .flatten()
        .map(|pcm| analysis::analyze_beat_offset(&pcm, bpm))
        .unwrap_or(0.0)
}

// ─────────────────────────────────────────────────────────────
// Callbacks (invoked from the host-side drain worker, never the
// audio thread)
// ─────────────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn set_position_callback(callback: Option<PositionCallback>) {
    CALLBACKS.lock().position = callback;
}

#[no_mangle]
pub extern "C" fn set_track_ended_callback(callback: Option<TrackEndedCallback>) {
    CALLBACKS.lock().track_ended = callback;
}
