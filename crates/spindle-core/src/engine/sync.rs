//! Beat synchronization between the two decks
//!
//! Three distinct timing contracts:
//!
//! - **Steady-state tempo match** runs once per render callback on the audio
//!   thread and only matches tempo. Continuous phase correction is absent;
//!   chasing phase during playback clicks.
//! - **One-shot alignment** (`align_now`) runs on a host thread: tempo match
//!   plus a cursor copy with a stretcher flush.
//! - **Cued start** (`play_synced`) launches the slave at a computed cursor
//!   so its first downbeat lands on the master's next downbeat.

use std::sync::{Arc, Mutex};

use crate::types::NUM_DECKS;

use super::deck::Deck;

/// Tempo ratios this close to 1.0 are treated as equal; running the cued
/// start arithmetic on near-equal tempos just magnifies float error.
const EQUAL_TEMPO_EPSILON: f64 = 0.01;

/// The active (slave, master) pair, if any
#[derive(Debug, Clone, Copy, Default)]
struct SyncPair {
    enabled: bool,
    master: i32,
    slave: i32,
}

/// Owns the sync pair and performs all alignment operations
pub struct SyncManager {
    pair: Mutex<SyncPair>,
}

impl SyncManager {
    pub fn new() -> Self {
        Self {
            pair: Mutex::new(SyncPair {
                enabled: false,
                master: -1,
                slave: -1,
            }),
        }
    }

    /// Install a (slave, master) pair. At most one pair is active at a time.
    pub fn enable(&self, slave: usize, master: usize) {
        if slave >= NUM_DECKS || master >= NUM_DECKS || slave == master {
            log::warn!("sync enable rejected: slave={slave} master={master}");
            return;
        }
        let mut pair = self.pair.lock().unwrap();
        pair.enabled = true;
        pair.slave = slave as i32;
        pair.master = master as i32;
        log::info!("sync enabled: deck {slave} follows deck {master}");
    }

    /// Clear the pair, but only if `deck` is the current slave.
    pub fn disable(&self, deck: usize) {
        let mut pair = self.pair.lock().unwrap();
        if pair.slave == deck as i32 {
            pair.enabled = false;
            pair.slave = -1;
            pair.master = -1;
            log::info!("sync disabled for deck {deck}");
        }
    }

    /// The active (slave, master) pair, if sync is enabled
    pub fn active_pair(&self) -> Option<(usize, usize)> {
        let pair = self.pair.lock().unwrap();
        if pair.enabled && pair.slave >= 0 && pair.master >= 0 {
            Some((pair.slave as usize, pair.master as usize))
        } else {
            None
        }
    }

    /// Steady-state tempo match; called once per render callback.
    ///
    /// The pair mutex is only try-locked and released before any deck work:
    /// if the host is mid-enable, this callback simply skips the update.
    pub fn update(&self, decks: &[Arc<Deck>; NUM_DECKS]) {
        let snapshot = match self.pair.try_lock() {
            Ok(pair) => *pair,
            Err(_) => return,
        };

        if !snapshot.enabled {
            return;
        }
        let (Ok(slave), Ok(master)) = (
            usize::try_from(snapshot.slave),
            usize::try_from(snapshot.master),
        ) else {
            return;
        };
        if slave >= NUM_DECKS || master >= NUM_DECKS {
            return;
        }

        let master_bpm = decks[master].bpm();
        let slave_bpm = decks[slave].bpm();
        if master_bpm <= 0.0 || slave_bpm <= 0.0 {
            return;
        }

        decks[slave].set_tempo(master_bpm / slave_bpm);
    }

    /// One-shot alignment: match tempo, then jump the slave's cursor onto the
    /// master's and flush the slave's stretcher.
    ///
    /// Meant for same-song alignment and as the simplest possible cue. The
    /// cursor copy happens regardless of BPM knowledge; the tempo match
    /// needs both BPMs.
    pub fn align_now(&self, slave: &Deck, master: &Deck) {
        let master_bpm = master.bpm();
        let slave_bpm = slave.bpm();
        if master_bpm > 0.0 && slave_bpm > 0.0 {
            slave.set_tempo(master_bpm / slave_bpm);
        }
        slave.set_cursor_frames(master.cursor_frames());
        log::debug!(
            "align_now: deck {} cursor -> {}",
            slave.id(),
            master.cursor_frames()
        );
    }

    /// Cued start: begin slave playback at a cursor chosen so that its first
    /// downbeat coincides in real time with the master's next downbeat.
    ///
    /// With either BPM unknown the slave just starts from its current cursor;
    /// with near-equal tempos the arithmetic degenerates and `align_now`
    /// does the job instead.
    pub fn play_synced(&self, slave: &Deck, master: &Deck) {
        let master_bpm = master.bpm();
        let slave_bpm = slave.bpm();

        if master_bpm <= 0.0 || slave_bpm <= 0.0 {
            log::debug!("play_synced without BPM, starting deck {} plain", slave.id());
            slave.play(None);
            return;
        }

        let ratio = master_bpm / slave_bpm;
        slave.set_tempo(ratio);

        if (ratio - 1.0).abs() < EQUAL_TEMPO_EPSILON {
            self.align_now(slave, master);
            slave.play(None);
            return;
        }

        let master_spb = 60.0 / master_bpm;
        let slave_spb = 60.0 / slave_bpm;

        // Where the master is in its beat cycle, and the real time left
        // until its next downbeat.
        let master_phase =
            (master.position_seconds() - master.beat_offset()).rem_euclid(master_spb);
        let time_to_kick = master_spb - master_phase;

        // The slave plays at `ratio` speed, so in that real-time window it
        // advances `time_to_kick * ratio` source-seconds. Launching it that
        // far before its first downbeat lands the downbeats together.
        let mut start = slave.beat_offset() - time_to_kick * ratio;
        while start < 0.0 {
            start += slave_spb;
        }

        let start_frame = (start * slave.sample_rate() as f64).round() as u64;
        log::info!(
            "cued start: deck {} at {:.4}s (ratio {:.4}, master kick in {:.1}ms)",
            slave.id(),
            start,
            ratio,
            time_to_kick * 1000.0
        );
        slave.play(Some(start_frame));
    }
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}
