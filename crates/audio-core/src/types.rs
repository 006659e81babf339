//! Core audio value types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// PCM stream description: sample rate, channel count, bit depth and the
/// nominal frame duration used for framing and VAD decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Nominal frame duration in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_size_ms: u32,
}

fn default_frame_ms() -> u32 {
    20
}

impl AudioFormat {
    /// Create a new format
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16, frame_size_ms: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            frame_size_ms,
        }
    }

    /// Narrowband telephony (slin 8 kHz)
    pub fn pcm_8khz_mono() -> Self {
        Self::new(8000, 1, 16, 20)
    }

    /// Wideband telephony (slin16), also the usual AI input format
    pub fn pcm_16khz_mono() -> Self {
        Self::new(16000, 1, 16, 20)
    }

    /// Typical AI speech output format
    pub fn pcm_24khz_mono() -> Self {
        Self::new(24000, 1, 16, 20)
    }

    /// Bytes occupied by one sample across all channels
    pub fn bytes_per_sample_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Interleaved samples in one nominal frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_size_ms as usize / 1000) * self.channels as usize
    }

    /// Bytes in one nominal frame
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * (self.bits_per_sample as usize / 8)
    }

    /// Same sample layout (frame duration may differ)
    pub fn is_compatible_with(&self, other: &AudioFormat) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.bits_per_sample == other.bits_per_sample
    }

    /// MIME type used by the AI streaming protocol
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Human readable description
    pub fn description(&self) -> String {
        format!(
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm_16khz_mono()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Which way a frame travels through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameDirection {
    /// Caller audio, telephony → AI
    Inbound,
    /// Assistant audio, AI → telephony
    Outbound,
}

/// One fixed-duration slice of PCM audio.
///
/// Frames are immutable once built. Each pipeline stage takes ownership of the
/// frame it consumes and either drops it or produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    format: AudioFormat,
    sequence: u64,
    direction: FrameDirection,
}

impl AudioFrame {
    /// Create a new frame
    pub fn new(
        samples: Vec<i16>,
        format: AudioFormat,
        sequence: u64,
        direction: FrameDirection,
    ) -> Self {
        Self {
            samples,
            format,
            sequence,
            direction,
        }
    }

    /// Interleaved PCM samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Sample layout
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Monotonic sequence number within one direction of one call
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Actual audio duration carried by the samples
    pub fn duration(&self) -> Duration {
        let per_channel = self.samples.len() / self.format.channels.max(1) as usize;
        Duration::from_micros(per_channel as u64 * 1_000_000 / self.format.sample_rate.max(1) as u64)
    }

    /// Consume the frame, keeping only its samples
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes_for_telephony_formats() {
        let narrow = AudioFormat::pcm_8khz_mono();
        assert_eq!(narrow.samples_per_frame(), 160);
        assert_eq!(narrow.frame_bytes(), 320);
        assert_eq!(narrow.bytes_per_sample_frame(), 2);

        let wide = AudioFormat::pcm_16khz_mono();
        assert_eq!(wide.samples_per_frame(), 320);
        assert_eq!(wide.mime_type(), "audio/pcm;rate=16000");

        let stereo = AudioFormat::new(8000, 2, 16, 20);
        assert_eq!(stereo.bytes_per_sample_frame(), 4);
        assert_eq!(stereo.samples_per_frame(), 320);
    }

    #[test]
    fn test_compatibility_ignores_frame_duration() {
        let a = AudioFormat::new(16000, 1, 16, 20);
        let b = AudioFormat::new(16000, 1, 16, 40);
        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&AudioFormat::pcm_8khz_mono()));
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(
            vec![0; 320],
            AudioFormat::pcm_16khz_mono(),
            7,
            FrameDirection::Inbound,
        );
        assert_eq!(frame.duration(), Duration::from_millis(20));
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.direction(), FrameDirection::Inbound);
    }
}
