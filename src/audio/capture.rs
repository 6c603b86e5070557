//! Audio device streams via cpal.
//!
//! Opens the microphone and, when configured, a loopback "reference" input
//! that receives a clean copy of what the OS is about to play. Both streams
//! are resampled to 16 kHz mono and chunked into 1600-sample `Frame`s before
//! being pushed into a ring buffer. Callbacks are real-time-safe: no
//! allocation beyond the fixed accumulator, no locks, no blocking calls.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{error, info};

use super::frame::{Frame, FRAME_SAMPLES, SAMPLE_RATE};
use super::ring_buffer::FrameProducer;

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig, String> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| format!("failed to enumerate input devices: {e}"))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("input device not found: {name}"))?
    } else {
        host.default_input_device()
            .ok_or_else(|| "no default input device available".to_string())?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| format!("failed to get default input config: {e}"))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(native_rate, channels, target = SAMPLE_RATE, "input device config");

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler from `from_rate` to `to_rate`, mono f32.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Convert f32 samples in [-1.0, 1.0] to i16, applying `gain` with
/// saturation clipping to the int16 range.
fn to_i16_with_gain(samples: &[f32], gain: f32) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = (s * gain * i16::MAX as f32).round();
            scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

/// A running device capture. `cpal::Stream` is not guaranteed `Send`, so the
/// stream itself never leaves the thread that built it; this handle is the
/// `Send`-safe remote control for it. Dropping the handle stops the stream
/// and joins the thread.
pub struct CaptureHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Start the microphone stream on a dedicated thread: applies `gain` and
/// saturation clipping. `device_name` of `None` uses the system default
/// input.
pub fn start_mic_capture(
    producer: FrameProducer,
    device_name: Option<&str>,
    gain: f32,
) -> Result<CaptureHandle, String> {
    spawn_capture_thread(producer, device_name.map(str::to_string), gain)
}

/// Start the reference (loopback) stream on a dedicated thread: unmodified,
/// gain fixed at 1.0.
pub fn start_reference_capture(
    producer: FrameProducer,
    device_name: Option<&str>,
) -> Result<CaptureHandle, String> {
    spawn_capture_thread(producer, device_name.map(str::to_string), 1.0)
}

/// Builds and plays the stream on its own thread, then blocks until told to
/// stop. The stream is constructed, played, and dropped entirely within that
/// thread, so its non-`Send` handle never has to cross into async code.
fn spawn_capture_thread(
    producer: FrameProducer,
    device_name: Option<String>,
    gain: f32,
) -> Result<CaptureHandle, String> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

    let join = std::thread::spawn(move || {
        let stream = match build_and_play(producer, device_name.as_deref(), gain) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = stop_rx.recv();
        drop(stream);
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err("capture thread exited before starting the stream".to_string())
        }
    }
}

fn build_and_play(
    mut producer: FrameProducer,
    device_name: Option<&str>,
    gain: f32,
) -> Result<cpal::Stream, String> {
    let cfg = resolve_device(device_name)?;
    let native_rate = cfg.native_rate;
    let channels = cfg.stream_config.channels;
    let needs_resample = native_rate != SAMPLE_RATE;
    let needs_downmix = channels > 1;

    let mut chunk_buf: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if needs_downmix {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };
                let resampled = if needs_resample {
                    resample_linear(&mono, native_rate, SAMPLE_RATE)
                } else {
                    mono
                };
                let pcm = to_i16_with_gain(&resampled, gain);

                chunk_buf.extend_from_slice(&pcm);
                while chunk_buf.len() >= FRAME_SAMPLES {
                    let chunk: Vec<i16> = chunk_buf.drain(..FRAME_SAMPLES).collect();
                    producer.push(Frame::from_slice(&chunk));
                }
            },
            move |err| {
                error!("audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("failed to build input stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("failed to start input stream: {e}"))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_clips_to_i16_range() {
        let out = to_i16_with_gain(&[10.0, -10.0], 8.0);
        assert_eq!(out[0], i16::MAX);
        assert_eq!(out[1], i16::MIN);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0, -1.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.0, 0.5]);
    }
}
