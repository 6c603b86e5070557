//! Calibrated-baseline barge-in (double-talk) detector.
//!
//! Active only while TTS is playing and a reference stream is available.
//! Runs one step per 100 ms mic frame.
//! Chosen over a mic/reference-ratio (Geigel) test: a live-measured baseline
//! adapts to any speaker/mic pairing without needing a calibrated reference
//! level.

use std::time::{Duration, Instant};

use crate::audio::frame::Frame;

const GRACE_PERIOD: Duration = Duration::from_millis(500);
const CALIBRATION_FRAMES: u32 = 8;
const SPIKE_TRIGGER: u32 = 4;
const REPLAY_FRAMES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Grace,
    Calibrating,
    Detecting,
}

pub struct BargeInDetector {
    started_at: Instant,
    phase: Phase,
    calibration_samples: Vec<f64>,
    threshold: f64,
    spike_count: u32,
    aec_active: bool,
    buffered_frames: Vec<Frame>,
}

impl BargeInDetector {
    pub fn new(aec_active: bool) -> Self {
        Self {
            started_at: Instant::now(),
            phase: Phase::Grace,
            calibration_samples: Vec::with_capacity(CALIBRATION_FRAMES as usize),
            threshold: 0.0,
            spike_count: 0,
            aec_active,
            buffered_frames: Vec::new(),
        }
    }

    /// Feed one mic frame. Every frame is appended to the replay buffer.
    /// Returns `true` the instant barge-in is declared.
    pub fn step(&mut self, mic: &Frame) -> bool {
        self.buffered_frames.push(mic.clone());

        match self.phase {
            Phase::Grace => {
                if self.started_at.elapsed() >= GRACE_PERIOD {
                    self.phase = Phase::Calibrating;
                }
                false
            }
            Phase::Calibrating => {
                self.calibration_samples.push(mic.rms());
                if self.calibration_samples.len() as u32 >= CALIBRATION_FRAMES {
                    let baseline = self.calibration_samples.iter().sum::<f64>()
                        / self.calibration_samples.len() as f64;
                    self.threshold = if self.aec_active {
                        (baseline * 3.0).max(400.0)
                    } else {
                        (baseline * 2.5).max(1200.0)
                    };
                    self.phase = Phase::Detecting;
                }
                false
            }
            Phase::Detecting => {
                let rms = mic.rms();
                if rms > self.threshold {
                    self.spike_count += 1;
                } else {
                    self.spike_count = self.spike_count.saturating_sub(1);
                }
                self.spike_count >= SPIKE_TRIGGER
            }
        }
    }

    /// The last three buffered mic frames, to be re-queued on the mic ring
    /// once barge-in fires. Earlier frames are echo-contaminated and
    /// discarded.
    pub fn take_replay_frames(&mut self) -> Vec<Frame> {
        let len = self.buffered_frames.len();
        let start = len.saturating_sub(REPLAY_FRAMES);
        self.buffered_frames.split_off(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_frame() -> Frame {
        Frame::from_slice(&vec![20_000i16; crate::audio::frame::FRAME_SAMPLES])
    }

    fn quiet_frame() -> Frame {
        Frame::from_slice(&vec![50i16; crate::audio::frame::FRAME_SAMPLES])
    }

    fn fast_forward_through_grace_and_calibration(det: &mut BargeInDetector) {
        det.started_at = Instant::now() - GRACE_PERIOD - Duration::from_millis(1);
        assert!(!det.step(&quiet_frame())); // exits grace
        for _ in 0..(CALIBRATION_FRAMES - 1) {
            assert!(!det.step(&quiet_frame()));
        }
        assert!(matches!(det.phase, Phase::Detecting));
    }

    #[test]
    fn sustained_energy_triggers_barge_in() {
        let mut det = BargeInDetector::new(true);
        fast_forward_through_grace_and_calibration(&mut det);

        let mut triggered = false;
        for _ in 0..SPIKE_TRIGGER {
            triggered = det.step(&loud_frame());
        }
        assert!(triggered);
    }

    #[test]
    fn transient_spikes_do_not_trigger() {
        let mut det = BargeInDetector::new(true);
        fast_forward_through_grace_and_calibration(&mut det);

        assert!(!det.step(&loud_frame()));
        assert!(!det.step(&loud_frame()));
        // back to quiet before reaching the trigger count
        assert!(!det.step(&quiet_frame()));
        assert!(!det.step(&quiet_frame()));
        assert!(!det.step(&loud_frame()));
    }

    #[test]
    fn replay_returns_last_three_frames_only() {
        let mut det = BargeInDetector::new(false);
        for i in 0..10i16 {
            det.step(&Frame::from_slice(&vec![i; crate::audio::frame::FRAME_SAMPLES]));
        }
        let replay = det.take_replay_frames();
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[0].samples[0], 7);
        assert_eq!(replay[2].samples[0], 9);
    }
}
