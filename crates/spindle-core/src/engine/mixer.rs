//! Mixer - combines the two deck outputs
//!
//! Equal-power crossfade between deck A and deck B followed by a saturating
//! soft clip. The crossfader position is a shared atomic written by the host
//! and read here on the audio thread. Scratch buffers are owned by the mixer
//! and sized once; the render path never allocates.

use std::sync::Arc;

use crate::types::{AtomicF32, Sample, StereoBuffer, StereoSample, MAX_BUFFER_SIZE, NUM_DECKS};

use super::deck::{Deck, RenderStatus};

/// Saturating soft clip: bounded output for any finite input, monotone,
/// identity inside `[-1, 1]`.
#[inline]
pub fn soft_clip(x: Sample) -> Sample {
    if x > 1.0 {
        1.0 - (1.0 - x).exp()
    } else if x < -1.0 {
        -1.0 + (1.0 + x).exp()
    } else {
        x
    }
}

/// Two-channel crossfading mixer
pub struct Mixer {
    crossfader: Arc<AtomicF32>,
    scratch_a: StereoBuffer,
    scratch_b: StereoBuffer,
}

impl Mixer {
    /// Create a mixer sharing `crossfader` with the host side.
    ///
    /// Scratch capacity covers every device buffer size the engine accepts.
    pub fn new(crossfader: Arc<AtomicF32>) -> Self {
        Self {
            crossfader,
            scratch_a: StereoBuffer::silence(MAX_BUFFER_SIZE),
            scratch_b: StereoBuffer::silence(MAX_BUFFER_SIZE),
        }
    }

    /// Current crossfader position (0 = full A, 1 = full B)
    pub fn crossfader(&self) -> f32 {
        self.crossfader.load()
    }

    /// Render both decks and crossfade them into `out`.
    ///
    /// Returns each deck's render status so the caller can queue
    /// track-ended notifications. `out.len()` must not exceed
    /// [`MAX_BUFFER_SIZE`].
    pub fn mix(
        &mut self,
        deck_a: &Deck,
        deck_b: &Deck,
        out: &mut [StereoSample],
    ) -> [RenderStatus; NUM_DECKS] {
        let frames = out.len();
        debug_assert!(frames <= MAX_BUFFER_SIZE);

        self.scratch_a.set_len_from_capacity(frames);
        self.scratch_b.set_len_from_capacity(frames);

        let status_a = deck_a.render(self.scratch_a.as_mut_slice());
        let status_b = deck_b.render(self.scratch_b.as_mut_slice());

        // Equal-power law: gains trace a quarter circle, so uncorrelated
        // sources keep constant summed power across the fader travel.
        let angle = self.crossfader.load().clamp(0.0, 1.0) * std::f32::consts::FRAC_PI_2;
        let gain_a = angle.cos();
        let gain_b = angle.sin();

        for ((o, a), b) in out
            .iter_mut()
            .zip(self.scratch_a.iter())
            .zip(self.scratch_b.iter())
        {
            o.left = soft_clip(a.left * gain_a + b.left * gain_b);
            o.right = soft_clip(a.right * gain_a + b.right * gain_b);
        }

        [status_a, status_b]
    }
}
