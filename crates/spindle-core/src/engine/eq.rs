//! Three-band deck EQ
//!
//! Low shelf / peaking / high shelf biquads with band crossovers at 250 Hz
//! and 4 kHz. Band gains are linear in `[0, 2]`: 1.0 is flat, 0.0 kills the
//! band (mapped to −60 dB), 2.0 boosts it by +6 dB. Flat bands collapse to
//! passthrough coefficients so the common all-flat case costs nothing.

use crate::types::StereoSample;

/// Low shelf corner frequency
const EQ_LOW_FREQ: f32 = 250.0;
/// Mid peak center (geometric middle of the 250 Hz – 4 kHz band)
const EQ_MID_FREQ: f32 = 1000.0;
/// High shelf corner frequency
const EQ_HIGH_FREQ: f32 = 4000.0;
/// Q for the mid peaking filter
const EQ_MID_Q: f32 = 0.7;

/// Biquad filter state for one stereo band
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, coeffs: &BiquadCoeffs) -> (f32, f32) {
        let out_l = coeffs.b0 * input_l + coeffs.b1 * self.x1_l + coeffs.b2 * self.x2_l
            - coeffs.a1 * self.y1_l - coeffs.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = coeffs.b0 * input_r + coeffs.b1 * self.x1_r + coeffs.b2 * self.x2_r
            - coeffs.a1 * self.y1_r - coeffs.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Biquad filter coefficients
#[derive(Debug, Clone)]
struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

impl BiquadCoeffs {
    /// Low shelf at `freq` with `gain_db` boost/cut
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / 0.9 - 1.0) + 2.0).sqrt();

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha) / a0,
        }
    }

    /// Peaking EQ at `freq` with `gain_db` boost/cut
    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    /// High shelf at `freq` with `gain_db` boost/cut
    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / 2.0 * ((a + 1.0 / a) * (1.0 / 0.9 - 1.0) + 2.0).sqrt();

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * a.sqrt() * alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * a.sqrt() * alpha) / a0,
        }
    }

    /// Passthrough (unity gain, no filtering)
    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    fn is_passthrough(gain_db: f32) -> bool {
        gain_db.abs() < 0.1
    }
}

/// Convert a linear band gain in `[0, 2]` to dB, with 0 treated as a kill.
fn band_gain_to_db(gain: f32) -> f32 {
    if gain < 0.001 {
        -60.0
    } else {
        20.0 * gain.log10()
    }
}

/// Stateful three-band EQ for one deck.
///
/// Lives behind the deck mutex; `process` runs on the audio thread,
/// `set_gains` on whichever thread holds the guard.
pub struct ThreeBandEq {
    sample_rate: f32,
    low_coeffs: BiquadCoeffs,
    mid_coeffs: BiquadCoeffs,
    high_coeffs: BiquadCoeffs,
    low_state: BiquadState,
    mid_state: BiquadState,
    high_state: BiquadState,
}

impl ThreeBandEq {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            low_coeffs: BiquadCoeffs::passthrough(),
            mid_coeffs: BiquadCoeffs::passthrough(),
            high_coeffs: BiquadCoeffs::passthrough(),
            low_state: BiquadState::default(),
            mid_state: BiquadState::default(),
            high_state: BiquadState::default(),
        }
    }

    /// Recompute coefficients for new band gains (each linear in `[0, 2]`)
    pub fn set_gains(&mut self, low: f32, mid: f32, high: f32) {
        let low_db = band_gain_to_db(low);
        let mid_db = band_gain_to_db(mid);
        let high_db = band_gain_to_db(high);

        self.low_coeffs = if BiquadCoeffs::is_passthrough(low_db) {
            BiquadCoeffs::passthrough()
        } else {
            BiquadCoeffs::low_shelf(EQ_LOW_FREQ, low_db, self.sample_rate)
        };
        self.mid_coeffs = if BiquadCoeffs::is_passthrough(mid_db) {
            BiquadCoeffs::passthrough()
        } else {
            BiquadCoeffs::peaking(EQ_MID_FREQ, mid_db, EQ_MID_Q, self.sample_rate)
        };
        self.high_coeffs = if BiquadCoeffs::is_passthrough(high_db) {
            BiquadCoeffs::passthrough()
        } else {
            BiquadCoeffs::high_shelf(EQ_HIGH_FREQ, high_db, self.sample_rate)
        };
    }

    /// Filter a block in place
    pub fn process(&mut self, buffer: &mut [StereoSample]) {
        for sample in buffer.iter_mut() {
            let (mut l, mut r) = (sample.left, sample.right);
            (l, r) = self.low_state.process(l, r, &self.low_coeffs);
            (l, r) = self.mid_state.process(l, r, &self.mid_coeffs);
            (l, r) = self.high_state.process(l, r, &self.high_coeffs);
            *sample = StereoSample::new(l, r);
        }
    }

    /// Clear filter memory (after seeks and loads)
    pub fn reset(&mut self) {
        self.low_state.reset();
        self.mid_state.reset();
        self.high_state.reset();
    }
}
