//! BPM and first-beat analysis
//!
//! Tempo estimation via autocorrelation of an onset-energy envelope over a
//! mono down-mix, and first-downbeat detection via a windowed-energy search
//! over the opening beat periods. Both return 0.0 when no estimate can be
//! made; the engine treats 0 BPM as "unknown" throughout.

use crate::decode::PcmBuffer;
use crate::types::Sample;

/// Tempo search range
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;

/// DJ-friendly reporting range; octave errors fold into it
const FOLD_LOW: f64 = 70.0;
const FOLD_HIGH: f64 = 180.0;

/// Energy window of ~10 ms, advanced by half a window
const WINDOW_SECONDS: f64 = 0.01;

/// Cap the analysed span; a minute of material pins the tempo
const MAX_ANALYSIS_SECONDS: f64 = 60.0;

/// Average the two channels into a mono signal, capped to the analysis span.
fn downmix(pcm: &PcmBuffer) -> Vec<Sample> {
    let cap = (MAX_ANALYSIS_SECONDS * pcm.sample_rate() as f64) as usize;
    pcm.frames_slice()
        .iter()
        .take(cap)
        .map(|s| (s.left + s.right) * 0.5)
        .collect()
}

/// Short-time energy envelope: one value per hop of half a window.
fn energy_envelope(mono: &[Sample], sample_rate: u32) -> (Vec<f64>, f64) {
    let window = ((sample_rate as f64 * WINDOW_SECONDS) as usize).max(1);
    let hop = (window / 2).max(1);
    let hop_seconds = hop as f64 / sample_rate as f64;

    let mut envelope = Vec::with_capacity(mono.len() / hop + 1);
    let mut start = 0;
    while start < mono.len() {
        let end = (start + window).min(mono.len());
        let energy: f64 = mono[start..end].iter().map(|&s| (s as f64) * (s as f64)).sum();
        envelope.push(energy);
        start += hop;
    }
    (envelope, hop_seconds)
}

/// Positive energy increases between neighbouring hops; silence and sustains
/// contribute nothing, attacks spike.
fn onset_strength(envelope: &[f64]) -> Vec<f64> {
    let mut onsets = vec![0.0; envelope.len()];
    for i in 1..envelope.len() {
        onsets[i] = (envelope[i] - envelope[i - 1]).max(0.0);
    }
    onsets
}

/// Fold a raw tempo estimate into the reporting octave.
fn fold_bpm(mut bpm: f64) -> f64 {
    if bpm <= 0.0 {
        return 0.0;
    }
    while bpm >= FOLD_HIGH {
        bpm /= 2.0;
    }
    while bpm < FOLD_LOW {
        bpm *= 2.0;
    }
    bpm
}

/// Estimate the tempo of a decoded track in BPM.
///
/// Returns 0.0 for tracks too short or too quiet to analyse. The estimate is
/// rounded to the nearest integer BPM, which is what beat-matched material
/// is mastered at anyway.
pub fn analyze_bpm(pcm: &PcmBuffer) -> f64 {
    let mono = downmix(pcm);
    if mono.is_empty() {
        return 0.0;
    }

    let (envelope, hop_seconds) = energy_envelope(&mono, pcm.sample_rate());
    let onsets = onset_strength(&envelope);

    let min_lag = (60.0 / MAX_BPM / hop_seconds).round() as usize;
    let max_lag = (60.0 / MIN_BPM / hop_seconds).round() as usize;
    if min_lag == 0 || onsets.len() < max_lag * 2 {
        return 0.0;
    }

    let mut best_lag = 0usize;
    let mut best_score = 0.0f64;
    for lag in min_lag..=max_lag {
        let terms = onsets.len() - lag;
        let mut score = 0.0;
        for i in 0..terms {
            score += onsets[i] * onsets[i + lag];
        }
        score /= terms as f64;
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_score <= 0.0 {
        return 0.0;
    }

    let bpm = fold_bpm(60.0 / (best_lag as f64 * hop_seconds));
    let rounded = bpm.round();
    log::info!("tempo estimate: {:.2} BPM (reported {})", bpm, rounded);
    rounded
}

/// Find the first downbeat of a decoded track, in seconds.
///
/// Scans the opening two beat periods for the window with the highest
/// energy. Returns 0.0 when the BPM is unknown or the track is empty.
pub fn analyze_beat_offset(pcm: &PcmBuffer, bpm: f64) -> f64 {
    if bpm <= 0.0 || pcm.frames() == 0 {
        return 0.0;
    }

    let sample_rate = pcm.sample_rate();
    let frames = pcm.frames_slice();
    let samples_per_beat = (60.0 / bpm * sample_rate as f64) as usize;
    let window = ((sample_rate as f64 * WINDOW_SECONDS) as usize).max(1);
    let hop = (window / 2).max(1);

    // The first kick must land within the first two beats of the grid.
    let search_end = frames.len().min(samples_per_beat * 2);

    let mut best_energy = 0.0f64;
    let mut best_pos = 0usize;
    let mut start = 0;
    while start < search_end {
        let end = (start + window).min(frames.len());
        let energy: f64 = frames[start..end]
            .iter()
            .map(|s| (s.left as f64).powi(2) + (s.right as f64).powi(2))
            .sum();
        if energy > best_energy {
            best_energy = energy;
            best_pos = start;
        }
        start += hop;
    }

    best_pos as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    const SR: u32 = 44100;

    /// Click track: short full-scale bursts on a fixed beat grid.
    fn click_track(seconds: f64, bpm: f64, first_beat: f64) -> PcmBuffer {
        let frames = (seconds * SR as f64) as usize;
        let mut samples = vec![StereoSample::silence(); frames];
        let period = 60.0 / bpm;

        let mut t = first_beat;
        while t < seconds {
            let start = (t * SR as f64) as usize;
            for i in start..(start + 32).min(frames) {
                samples[i] = StereoSample::mono(1.0);
            }
            t += period;
        }
        PcmBuffer::from_frames(samples, SR)
    }

    #[test]
    fn test_bpm_of_click_track() {
        let pcm = click_track(30.0, 120.0, 0.0);
        let bpm = analyze_bpm(&pcm);
        assert!((bpm - 120.0).abs() <= 2.0, "got {bpm}");
    }

    #[test]
    fn test_bpm_folds_octaves() {
        assert_eq!(fold_bpm(240.0), 120.0);
        assert_eq!(fold_bpm(60.0), 120.0);
        assert_eq!(fold_bpm(0.0), 0.0);
        assert_eq!(fold_bpm(128.0), 128.0);
    }

    #[test]
    fn test_bpm_of_silence_is_unknown() {
        let pcm = PcmBuffer::from_frames(vec![StereoSample::silence(); SR as usize * 5], SR);
        assert_eq!(analyze_bpm(&pcm), 0.0);
    }

    #[test]
    fn test_bpm_of_short_clip_is_unknown() {
        let pcm = PcmBuffer::from_frames(vec![StereoSample::mono(0.5); 1000], SR);
        assert_eq!(analyze_bpm(&pcm), 0.0);
    }

    #[test]
    fn test_beat_offset_finds_first_kick() {
        let pcm = click_track(10.0, 120.0, 0.2);
        let offset = analyze_beat_offset(&pcm, 120.0);
        assert!(
            (offset - 0.2).abs() <= WINDOW_SECONDS,
            "offset {offset} should be near 0.2"
        );
    }

    #[test]
    fn test_beat_offset_without_bpm() {
        let pcm = click_track(10.0, 120.0, 0.2);
        assert_eq!(analyze_beat_offset(&pcm, 0.0), 0.0);
    }
}
