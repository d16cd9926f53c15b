//! Output device handling via CPAL
//!
//! Opens a stereo f32 output stream at the engine's configured sample rate
//! and buffer size and drives [`EngineCore::process`] from the device
//! callback. Pro-audio hosts (JACK, ASIO) are preferred when present, the
//! platform default otherwise.

mod error;

pub use error::{AudioError, AudioResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};

use crate::engine::EngineCore;
use crate::types::{StereoBuffer, MAX_BUFFER_SIZE};

/// Wrapper making the stream handle Send.
///
/// cpal marks `Stream` `!Send` conservatively; this handle is only ever
/// touched by one host thread at a time, under the engine's own locking.
struct StreamHolder(Stream);

// SAFETY: the holder is created, kept and dropped by host-side control code
// that never shares it across threads concurrently.
unsafe impl Send for StreamHolder {}

/// Keeps the output stream alive; dropping it stops the callbacks.
pub struct OutputHandle {
    _stream: StreamHolder,
    fault: Arc<AtomicBool>,
}

impl OutputHandle {
    /// Whether the device reported a mid-stream fault
    pub fn faulted(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }
}

/// Pick the output device, preferring a pro-audio host when one is present.
fn pick_output_device() -> AudioResult<cpal::Device> {
    for host_id in cpal::available_hosts() {
        // Host IDs are platform-specific enums; match on the variant name so
        // this builds everywhere.
        let name = format!("{host_id:?}");
        if name != "Jack" && name != "Asio" {
            continue;
        }
        if let Ok(host) = cpal::host_from_id(host_id) {
            if let Some(device) = host.default_output_device() {
                log::info!("using pro-audio host {:?}", host_id);
                return Ok(device);
            }
        }
    }
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDevice)
}

/// Find a stereo f32 output configuration at the requested rate.
fn find_stream_config(
    device: &cpal::Device,
    sample_rate: u32,
    buffer_size: u32,
) -> AudioResult<StreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    if supported.is_empty() {
        return Err(AudioError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() >= 2)
        .find(|c| sample_rate >= c.min_sample_rate().0 && sample_rate <= c.max_sample_rate().0)
        .or_else(|| supported.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported.first())
        .ok_or_else(|| AudioError::ConfigError("No usable output configuration".to_string()))?;

    let rate = if sample_rate >= best.min_sample_rate().0 && sample_rate <= best.max_sample_rate().0
    {
        SampleRate(sample_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "device doesn't support {} Hz, falling back to {} Hz",
            sample_rate,
            fallback.0
        );
        fallback
    };

    Ok(StreamConfig {
        channels: best.channels(),
        sample_rate: rate,
        buffer_size: BufferSize::Fixed(buffer_size),
    })
}

/// Open the output stream and start driving the engine.
///
/// The callback locks the shared engine state; the host side never takes
/// that lock, so the render path stays uncontended.
pub fn start_output(
    core: Arc<Mutex<EngineCore>>,
    sample_rate: u32,
    buffer_size: u32,
) -> AudioResult<OutputHandle> {
    let device = pick_output_device()?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("using audio device: {}", device_name);

    let config = find_stream_config(&device, sample_rate, buffer_size)?;
    let channels = config.channels as usize;
    log::info!(
        "audio config: {} channels, {} Hz, {} frames (~{:.1}ms latency)",
        config.channels,
        config.sample_rate.0,
        buffer_size,
        buffer_size as f32 / config.sample_rate.0 as f32 * 1000.0
    );

    let fault = Arc::new(AtomicBool::new(false));
    let fault_flag = Arc::clone(&fault);

    let mut scratch = StereoBuffer::silence(MAX_BUFFER_SIZE);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut core) = core.lock() else {
                    data.fill(0.0);
                    return;
                };
                // Devices can hand over more frames than requested; chunking
                // keeps the per-process work within the pre-sized scratch.
                for chunk in data.chunks_mut(channels * MAX_BUFFER_SIZE) {
                    let frames = chunk.len() / channels;
                    scratch.set_len_from_capacity(frames);
                    core.process(scratch.as_mut_slice());

                    for (frame, sample) in chunk.chunks_mut(channels).zip(scratch.iter()) {
                        frame[0] = sample.left;
                        if channels > 1 {
                            frame[1] = sample.right;
                        }
                        for ch in frame.iter_mut().skip(2) {
                            *ch = 0.0;
                        }
                    }
                }
            },
            move |err| {
                log::error!("audio stream error: {}", err);
                fault_flag.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("audio stream started");
    Ok(OutputHandle {
        _stream: StreamHolder(stream),
        fault,
    })
}
