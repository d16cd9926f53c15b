//! Audio file decoding via symphonia
//!
//! Decodes MP3/WAV/FLAC files into an immutable in-memory [`PcmBuffer`] of
//! interleaved stereo f32. Mono sources are up-mixed by channel duplication;
//! sources with more than two channels are rejected.

use std::path::Path;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::types::{Sample, StereoSample};

/// Errors that can occur while loading a track
#[derive(Error, Debug)]
pub enum DecodeError {
    /// File not found or couldn't be opened
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    /// Container/codec probe failed (unsupported or corrupt file)
    #[error("unsupported or corrupt file: {0}")]
    Probe(String),

    /// No decodable audio track in the container
    #[error("no audio track found")]
    NoTrack,

    /// Track is missing required parameters
    #[error("missing stream parameter: {0}")]
    MissingParameter(&'static str),

    /// Channel layouts beyond stereo are not supported
    #[error("unsupported channel count: {0}")]
    UnsupportedChannelCount(usize),

    /// Decoder failed to produce audio
    #[error("decode failed: {0}")]
    Decode(String),

    /// File decoded to zero frames
    #[error("file contains no audio")]
    Empty,
}

/// A decoded track: interleaved stereo f32 frames at the source's native rate.
///
/// Immutable after load. Decks hold it behind an `Arc` so the host can swap
/// buffers while the audio thread keeps rendering the old one.
#[derive(Debug)]
pub struct PcmBuffer {
    samples: Vec<StereoSample>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Build a buffer from already-interleaved stereo samples
    pub fn from_interleaved(interleaved: &[Sample], sample_rate: u32) -> Self {
        let samples = interleaved
            .chunks_exact(2)
            .map(|c| StereoSample::new(c[0], c[1]))
            .collect();
        Self { samples, sample_rate }
    }

    /// Build a buffer from stereo frames
    pub fn from_frames(samples: Vec<StereoSample>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Number of stereo frames
    #[inline]
    pub fn frames(&self) -> u64 {
        self.samples.len() as u64
    }

    /// Native sample rate of the source in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Track duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// All frames of the track
    #[inline]
    pub fn frames_slice(&self) -> &[StereoSample] {
        &self.samples
    }
}

/// Decode an entire audio file to a stereo [`PcmBuffer`].
///
/// The container and codec are probed from the file contents with the
/// extension as a hint. The whole file is decoded up front; a DJ deck seeks
/// constantly, so compressed-domain streaming buys nothing here.
pub fn decode_file(path: &Path) -> Result<Arc<PcmBuffer>, DecodeError> {
    let file = std::fs::File::open(path).map_err(|e| DecodeError::Open {
        path: path.display().to_string(),
        source: e,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Probe(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or(DecodeError::MissingParameter("sample rate"))?;
    let channels = codec_params
        .channels
        .map(|c| c.count())
        .ok_or(DecodeError::MissingParameter("channel count"))?;

    if channels == 0 || channels > 2 {
        return Err(DecodeError::UnsupportedChannelCount(channels));
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Decode(e.to_string()))?;

    let mut interleaved: Vec<Sample> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<Sample>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                // Recoverable: skip the damaged packet
                log::warn!("decode error in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(DecodeError::Decode(e.to_string())),
        }
    }

    if interleaved.is_empty() {
        return Err(DecodeError::Empty);
    }

    let samples: Vec<StereoSample> = match channels {
        1 => interleaved.iter().map(|&s| StereoSample::mono(s)).collect(),
        _ => interleaved
            .chunks_exact(2)
            .map(|c| StereoSample::new(c[0], c[1]))
            .collect(),
    };

    log::info!(
        "decoded {}: {} frames @ {} Hz ({} ch source)",
        path.display(),
        samples.len(),
        sample_rate,
        channels
    );

    Ok(Arc::new(PcmBuffer::from_frames(samples, sample_rate)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Write a minimal PCM16 WAV file for decoder tests.
    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let byte_rate = sample_rate * channels as u32 * 2;
        let block_align = channels * 2;

        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(b"RIFF").unwrap();
        f.write_all(&(36 + data_len).to_le_bytes()).unwrap();
        f.write_all(b"WAVE").unwrap();
        f.write_all(b"fmt ").unwrap();
        f.write_all(&16u32.to_le_bytes()).unwrap();
        f.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
        f.write_all(&channels.to_le_bytes()).unwrap();
        f.write_all(&sample_rate.to_le_bytes()).unwrap();
        f.write_all(&byte_rate.to_le_bytes()).unwrap();
        f.write_all(&block_align.to_le_bytes()).unwrap();
        f.write_all(&16u16.to_le_bytes()).unwrap();
        f.write_all(b"data").unwrap();
        f.write_all(&data_len.to_le_bytes()).unwrap();
        for s in samples {
            f.write_all(&s.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn test_decode_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");

        let frames = 441usize;
        let mut samples = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            samples.push(8192i16);
            samples.push(-8192i16);
        }
        write_wav(&path, 2, 44100, &samples);

        let pcm = decode_file(&path).unwrap();
        assert_eq!(pcm.frames(), frames as u64);
        assert_eq!(pcm.sample_rate(), 44100);
        assert!((pcm.duration_seconds() - 0.01).abs() < 1e-6);

        let first = pcm.frames_slice()[0];
        assert!((first.left - 0.25).abs() < 0.001);
        assert!((first.right + 0.25).abs() < 0.001);
    }

    #[test]
    fn test_decode_mono_upmix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");

        let samples: Vec<i16> = vec![16384; 100];
        write_wav(&path, 1, 22050, &samples);

        let pcm = decode_file(&path).unwrap();
        assert_eq!(pcm.frames(), 100);
        assert_eq!(pcm.sample_rate(), 22050);

        let frame = pcm.frames_slice()[50];
        assert_eq!(frame.left, frame.right);
        assert!((frame.left - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_file(Path::new("/nonexistent/track.mp3")).unwrap_err();
        assert!(matches!(err, DecodeError::Open { .. }));
    }

    #[test]
    fn test_decode_garbage_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not a wav file at all").unwrap();

        assert!(decode_file(&path).is_err());
    }

    #[test]
    fn test_pcm_buffer_from_interleaved() {
        let pcm = PcmBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4], 48000);
        assert_eq!(pcm.frames(), 2);
        assert_eq!(pcm.frames_slice()[1], StereoSample::new(0.3, 0.4));
    }
}
