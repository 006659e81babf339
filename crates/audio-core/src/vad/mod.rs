//! Voice Activity Detection
//!
//! Energy-based detector with hysteresis. Each frame is classified by its
//! normalized RMS energy against a threshold; the SILENCE→SPEECH transition
//! requires `speech_frames` consecutive loud frames and SPEECH→SILENCE requires
//! `silence_frames` consecutive quiet ones. Exactly one event is emitted per
//! transition.

use crate::error::{AudioError, AudioResult};
use crate::types::AudioFrame;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Detector tuning. The defaults suit 20 ms telephony frames; live deployments
/// are expected to calibrate these per audio source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Normalized RMS (0.0 to 1.0) above which a frame counts as speech
    pub energy_threshold: f32,
    /// Consecutive speech frames needed to enter SPEECH
    pub speech_frames: u32,
    /// Consecutive silent frames needed to return to SILENCE
    pub silence_frames: u32,
    /// When set, the effective threshold becomes
    /// `max(energy_threshold, baseline * adaptive_margin)`
    pub adaptive_margin: Option<f32>,
    /// Learning rate of the energy baseline (0.0 to 1.0)
    pub baseline_smoothing: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            speech_frames: 6,
            silence_frames: 10,
            adaptive_margin: None,
            baseline_smoothing: 0.05,
        }
    }
}

impl VadConfig {
    /// Reject values the state machine cannot work with
    pub fn validate(&self) -> AudioResult<()> {
        if !(self.energy_threshold > 0.0 && self.energy_threshold <= 1.0) {
            return Err(AudioError::invalid_config(format!(
                "energy_threshold must be in (0, 1], got {}",
                self.energy_threshold
            )));
        }
        if self.speech_frames == 0 || self.silence_frames == 0 {
            return Err(AudioError::invalid_config(
                "speech_frames and silence_frames must be at least 1",
            ));
        }
        if !(self.baseline_smoothing > 0.0 && self.baseline_smoothing <= 1.0) {
            return Err(AudioError::invalid_config(format!(
                "baseline_smoothing must be in (0, 1], got {}",
                self.baseline_smoothing
            )));
        }
        if let Some(margin) = self.adaptive_margin {
            if !(margin.is_finite() && margin >= 1.0) {
                return Err(AudioError::invalid_config(format!(
                    "adaptive_margin must be >= 1.0, got {}",
                    margin
                )));
            }
        }
        Ok(())
    }
}

/// Current classification of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Silence,
    Speech,
}

/// Transition events emitted by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// SILENCE→SPEECH, raised on the frame that completed the debounce
    SpeechStarted { sequence: u64 },
    /// SPEECH→SILENCE, raised on the frame that completed the debounce
    SpeechEnded {
        sequence: u64,
        /// Frames between the two transitions, both debounce windows included
        speech_frames: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct VadState {
    classification: Classification,
    consecutive_speech: u32,
    consecutive_silence: u32,
    energy_baseline: Option<f32>,
}

impl VadState {
    fn new() -> Self {
        Self {
            classification: Classification::Silence,
            consecutive_speech: 0,
            consecutive_silence: 0,
            energy_baseline: None,
        }
    }
}

/// Per-call voice activity detector
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    segment_frames: u64,
    frames_processed: u64,
    dropped_frames: u64,
    last_energy: f32,
}

impl VoiceActivityDetector {
    /// Create a detector, validating the configuration
    pub fn new(config: VadConfig) -> AudioResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: VadState::new(),
            segment_frames: 0,
            frames_processed: 0,
            dropped_frames: 0,
            last_energy: 0.0,
        })
    }

    /// Classify one PCM16 frame
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        self.process_energy(frame.sequence(), rms_energy(frame.samples()))
    }

    /// Classify one frame of normalized float samples.
    ///
    /// Float sources can carry NaN or infinite values; such frames are dropped.
    pub fn process_f32(&mut self, sequence: u64, samples: &[f32]) -> Option<VadEvent> {
        self.process_energy(sequence, rms_energy_f32(samples))
    }

    /// Advance the state machine with a precomputed frame energy
    pub fn process_energy(&mut self, sequence: u64, energy: f32) -> Option<VadEvent> {
        if !energy.is_finite() {
            self.dropped_frames += 1;
            trace!(sequence, "dropping frame with non-finite energy");
            return None;
        }

        self.frames_processed += 1;
        self.last_energy = energy;
        let is_speech = energy > self.effective_threshold();

        match self.state.classification {
            Classification::Silence => {
                if is_speech {
                    self.state.consecutive_speech += 1;
                    if self.state.consecutive_speech >= self.config.speech_frames {
                        self.state.classification = Classification::Speech;
                        self.state.consecutive_speech = 0;
                        self.state.consecutive_silence = 0;
                        self.segment_frames = self.config.speech_frames as u64;
                        return Some(VadEvent::SpeechStarted { sequence });
                    }
                } else {
                    self.state.consecutive_speech = 0;
                    self.update_baseline(energy);
                }
            }
            Classification::Speech => {
                self.segment_frames += 1;
                if is_speech {
                    self.state.consecutive_silence = 0;
                } else {
                    self.state.consecutive_silence += 1;
                    if self.state.consecutive_silence >= self.config.silence_frames {
                        self.state.classification = Classification::Silence;
                        self.state.consecutive_silence = 0;
                        self.state.consecutive_speech = 0;
                        let speech_frames = self.segment_frames;
                        self.segment_frames = 0;
                        return Some(VadEvent::SpeechEnded {
                            sequence,
                            speech_frames,
                        });
                    }
                }
            }
        }
        None
    }

    /// Threshold in effect for the next frame
    pub fn effective_threshold(&self) -> f32 {
        match (self.config.adaptive_margin, self.state.energy_baseline) {
            (Some(margin), Some(baseline)) => self.config.energy_threshold.max(baseline * margin),
            _ => self.config.energy_threshold,
        }
    }

    fn update_baseline(&mut self, energy: f32) {
        let alpha = self.config.baseline_smoothing;
        self.state.energy_baseline = Some(match self.state.energy_baseline {
            None => energy,
            Some(baseline) => baseline + alpha * (energy - baseline),
        });
    }

    pub fn classification(&self) -> Classification {
        self.state.classification
    }

    pub fn is_speaking(&self) -> bool {
        self.state.classification == Classification::Speech
    }

    /// Noise floor estimate learned from silent frames
    pub fn energy_baseline(&self) -> Option<f32> {
        self.state.energy_baseline
    }

    /// Energy of the last accepted frame
    pub fn last_energy(&self) -> f32 {
        self.last_energy
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Frames discarded because their energy was not finite
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Return to SILENCE, forgetting counters and the learned baseline
    pub fn reset(&mut self) {
        self.state = VadState::new();
        self.segment_frames = 0;
    }
}

/// Normalized RMS energy of PCM16 samples (0.0 to 1.0). Empty input is silent.
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// RMS energy of float samples; propagates NaN and infinity.
pub fn rms_energy_f32(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioFormat, FrameDirection};

    fn frame(seq: u64, amplitude: i16) -> AudioFrame {
        AudioFrame::new(
            vec![amplitude; 320],
            AudioFormat::pcm_16khz_mono(),
            seq,
            FrameDirection::Inbound,
        )
    }

    fn config(speech_frames: u32, silence_frames: u32) -> VadConfig {
        VadConfig {
            energy_threshold: 0.05,
            speech_frames,
            silence_frames,
            ..Default::default()
        }
    }

    #[test]
    fn test_rms_energy() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&[0; 160]), 0.0);
        let loud = rms_energy(&[16384; 160]);
        assert!((loud - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_silent_input_emits_nothing() {
        let mut vad = VoiceActivityDetector::new(config(3, 3)).unwrap();
        for seq in 0..200 {
            assert_eq!(vad.process(&frame(seq, 100)), None);
        }
        assert_eq!(vad.classification(), Classification::Silence);
        assert_eq!(vad.frames_processed(), 200);
    }

    #[test]
    fn test_zero_length_frames_stay_silent() {
        let mut vad = VoiceActivityDetector::new(config(1, 1)).unwrap();
        let empty = AudioFrame::new(vec![], AudioFormat::pcm_16khz_mono(), 0, FrameDirection::Inbound);
        for _ in 0..10 {
            assert_eq!(vad.process(&empty), None);
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_transient_burst_is_debounced() {
        let mut vad = VoiceActivityDetector::new(config(4, 3)).unwrap();
        let mut events = Vec::new();
        // Three loud frames, one quiet, three loud: never four in a row
        for (seq, amp) in [8000, 8000, 8000, 0, 8000, 8000, 8000, 0].into_iter().enumerate() {
            events.extend(vad.process(&frame(seq as u64, amp)));
        }
        assert!(events.is_empty());
    }

    #[test]
    fn test_brief_pause_does_not_end_speech() {
        let mut vad = VoiceActivityDetector::new(config(2, 5)).unwrap();
        let mut events = Vec::new();
        let pattern = [8000, 8000, 0, 0, 0, 0, 8000, 8000];
        for (seq, amp) in pattern.into_iter().enumerate() {
            events.extend(vad.process(&frame(seq as u64, amp)));
        }
        assert_eq!(events, vec![VadEvent::SpeechStarted { sequence: 1 }]);
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_single_start_and_end_in_order() {
        let mut vad = VoiceActivityDetector::new(config(8, 10)).unwrap();
        let mut events = Vec::new();
        let mut seq = 0;
        for _ in 0..12 {
            events.extend(vad.process(&frame(seq, 8000)));
            seq += 1;
        }
        for _ in 0..15 {
            events.extend(vad.process(&frame(seq, 0)));
            seq += 1;
        }
        assert_eq!(
            events,
            vec![
                VadEvent::SpeechStarted { sequence: 7 },
                VadEvent::SpeechEnded {
                    sequence: 21,
                    speech_frames: 22
                },
            ]
        );
    }

    #[test]
    fn test_non_finite_frame_is_dropped_without_touching_state() {
        let mut vad = VoiceActivityDetector::new(config(8, 4)).unwrap();
        let loud = vec![0.5f32; 320];
        for seq in 0..5 {
            assert_eq!(vad.process_f32(seq, &loud), None);
        }
        let mut corrupted = loud.clone();
        corrupted[10] = f32::NAN;
        assert_eq!(vad.process_f32(5, &corrupted), None);
        assert_eq!(vad.dropped_frames(), 1);

        // The five loud frames before the corrupted one still count
        assert_eq!(vad.process_f32(6, &loud), None);
        assert_eq!(vad.process_f32(7, &loud), None);
        assert_eq!(
            vad.process_f32(8, &loud),
            Some(VadEvent::SpeechStarted { sequence: 8 })
        );
        assert_eq!(vad.frames_processed(), 8);
    }

    #[test]
    fn test_adaptive_baseline_raises_threshold() {
        let mut vad = VoiceActivityDetector::new(VadConfig {
            energy_threshold: 0.01,
            speech_frames: 2,
            silence_frames: 2,
            adaptive_margin: Some(3.0),
            baseline_smoothing: 1.0,
        })
        .unwrap();

        // Noise floor around 0.0092 (amplitude 300) stays below the static threshold
        for seq in 0..10 {
            assert_eq!(vad.process(&frame(seq, 300)), None);
        }
        let baseline = vad.energy_baseline().unwrap();
        assert!(vad.effective_threshold() > 0.01);
        assert!((vad.effective_threshold() - baseline * 3.0).abs() < 1e-6);

        // Amplitude 600 clears the static threshold but not the adapted one
        for seq in 10..20 {
            assert_eq!(vad.process(&frame(seq, 600)), None);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(VoiceActivityDetector::new(config(0, 3)).is_err());
        assert!(VoiceActivityDetector::new(VadConfig {
            energy_threshold: 0.0,
            ..Default::default()
        })
        .is_err());
        assert!(VoiceActivityDetector::new(VadConfig {
            adaptive_margin: Some(0.5),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_reset_returns_to_silence() {
        let mut vad = VoiceActivityDetector::new(config(1, 5)).unwrap();
        assert!(vad.process(&frame(0, 8000)).is_some());
        vad.reset();
        assert_eq!(vad.classification(), Classification::Silence);
        assert!(vad.energy_baseline().is_none());
    }
}
