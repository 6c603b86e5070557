//! Adaptive linear echo cancellation.
//!
//! A normalized-LMS filter models the room's impulse response from the
//! reference (loopback) signal to the microphone and subtracts the
//! estimate, leaving the residual — ideally just the user's own voice. Pure
//! Rust, no FFI and no dynamic symbol lookup, with explicit frame-size and
//! sample-rate contracts checked on every call.

use crate::audio::frame::{Frame, FRAME_SAMPLES, SAMPLE_RATE};

/// 300 ms of taps at 16 kHz is the default filter length.
const DEFAULT_FILTER_MS: u32 = 300;

/// NLMS step size. Small enough to converge without blowing up on loud
/// reference signal.
const STEP_SIZE: f32 = 0.5;
const REGULARIZATION: f32 = 1e-6;

/// Adaptive filter state, created at session start and destroyed at session
/// end.
pub struct AecState {
    taps: Vec<f32>,
    history: Vec<f32>,
    history_pos: usize,
    sample_rate: u32,
    pub failures: u64,
}

impl AecState {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_filter_len_ms(sample_rate, DEFAULT_FILTER_MS)
    }

    pub fn with_filter_len_ms(sample_rate: u32, filter_ms: u32) -> Self {
        let taps_len = (sample_rate as u64 * filter_ms as u64 / 1000) as usize;
        Self {
            taps: vec![0.0; taps_len.max(1)],
            history: vec![0.0; taps_len.max(1)],
            history_pos: 0,
            sample_rate,
            failures: 0,
        }
    }

    /// Cancel echo in `mic` using `reference` as the far-end model input.
    /// On a frame-size or rate mismatch the raw mic frame passes through
    /// unchanged and `failures` is incremented.
    pub fn process(&mut self, mic: &Frame, reference: &Frame) -> Frame {
        if self.sample_rate != SAMPLE_RATE
            || mic.samples.len() != FRAME_SAMPLES
            || reference.samples.len() != FRAME_SAMPLES
        {
            self.failures += 1;
            return mic.clone();
        }

        let mut out = [0i16; FRAME_SAMPLES];
        for i in 0..FRAME_SAMPLES {
            let ref_sample = reference.samples[i] as f32 / i16::MAX as f32;
            self.push_history(ref_sample);

            let estimate = self.estimate_echo();
            let mic_sample = mic.samples[i] as f32 / i16::MAX as f32;
            let error = mic_sample - estimate;

            self.adapt(error);

            let clipped = (error * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32);
            out[i] = clipped as i16;
        }

        Frame { samples: out }
    }

    fn push_history(&mut self, sample: f32) {
        let len = self.history.len();
        self.history_pos = (self.history_pos + len - 1) % len;
        self.history[self.history_pos] = sample;
    }

    fn estimate_echo(&self) -> f32 {
        let len = self.history.len();
        let mut acc = 0.0f32;
        for (k, &tap) in self.taps.iter().enumerate() {
            let idx = (self.history_pos + k) % len;
            acc += tap * self.history[idx];
        }
        acc
    }

    fn adapt(&mut self, error: f32) {
        let len = self.history.len();
        let energy: f32 = self.history.iter().map(|h| h * h).sum::<f32>() + REGULARIZATION;
        let mu = STEP_SIZE / energy;
        for (k, tap) in self.taps.iter_mut().enumerate() {
            let idx = (self.history_pos + k) % len;
            *tap += mu * error * self.history[idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_frame(amplitude: i16) -> Frame {
        Frame::from_slice(&vec![amplitude; FRAME_SAMPLES])
    }

    #[test]
    fn mismatched_rate_falls_back_to_raw_mic() {
        let mut aec = AecState::new(8_000);
        let mic = tone_frame(1000);
        let reference = tone_frame(1000);
        let out = aec.process(&mic, &reference);
        assert_eq!(out.samples[0], mic.samples[0]);
        assert_eq!(aec.failures, 1);
    }

    #[test]
    fn converges_toward_silence_on_identical_reference() {
        let mut aec = AecState::new(SAMPLE_RATE);
        let reference = tone_frame(5000);
        let mic = tone_frame(5000);

        let first_energy: f64 = aec
            .process(&mic, &reference)
            .samples
            .iter()
            .map(|&s| (s as f64).powi(2))
            .sum();

        let mut last_out = Frame::silence();
        for _ in 0..50 {
            last_out = aec.process(&mic, &reference);
        }
        let last_energy: f64 = last_out.samples.iter().map(|&s| (s as f64).powi(2)).sum();

        assert!(
            last_energy < first_energy,
            "residual energy should shrink after adaptation: first={first_energy} last={last_energy}"
        );
    }
}
