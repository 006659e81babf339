//! Audio format conversion
//!
//! Stateless helpers for channel mapping and sample rate conversion. Every
//! function here is a pure function of its inputs: the same frame always
//! converts to the same output, and no history is carried between frames.

use crate::error::{AudioError, AudioResult};
use crate::types::{AudioFormat, AudioFrame};

/// Convert a frame to `target`, mapping channels first and then resampling.
///
/// Only 16-bit PCM is supported on either side.
pub fn convert_frame(frame: &AudioFrame, target: &AudioFormat) -> AudioResult<AudioFrame> {
    let source = frame.format();
    if source.bits_per_sample != 16 || target.bits_per_sample != 16 {
        return Err(AudioError::FormatConversionFailed {
            source_format: source.description(),
            target_format: target.description(),
            reason: "Only 16-bit audio currently supported".to_string(),
        });
    }

    if source.is_compatible_with(target) {
        return Ok(AudioFrame::new(
            frame.samples().to_vec(),
            *target,
            frame.sequence(),
            frame.direction(),
        ));
    }

    let mut samples = convert_channels(frame.samples(), source.channels, target.channels)?;

    if source.sample_rate != target.sample_rate {
        samples = resample_linear(&samples, target.channels, source.sample_rate, target.sample_rate);
    }

    Ok(AudioFrame::new(samples, *target, frame.sequence(), frame.direction()))
}

/// Convert between channel configurations
pub fn convert_channels(samples: &[i16], from: u16, to: u16) -> AudioResult<Vec<i16>> {
    match (from, to) {
        (a, b) if a == b => Ok(samples.to_vec()),
        (1, 2) => {
            // Mono to stereo: duplicate each sample
            let mut stereo = Vec::with_capacity(samples.len() * 2);
            for &sample in samples {
                stereo.push(sample);
                stereo.push(sample);
            }
            Ok(stereo)
        }
        (2, 1) => {
            // Stereo to mono: average left and right channels
            let mut mono = Vec::with_capacity(samples.len() / 2);
            for chunk in samples.chunks_exact(2) {
                let mixed = (chunk[0] as i32 + chunk[1] as i32) / 2;
                mono.push(mixed as i16);
            }
            Ok(mono)
        }
        (a, b) => Err(AudioError::FormatConversionFailed {
            source_format: format!("{} channels", a),
            target_format: format!("{} channels", b),
            reason: "Unsupported channel configuration".to_string(),
        }),
    }
}

/// Number of per-channel samples produced when resampling `input_len` samples.
pub fn resampled_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    (input_len as u64 * to_rate as u64 / from_rate as u64) as usize
}

/// Resample interleaved PCM using linear interpolation.
///
/// Each channel is interpolated independently. Output sample `i` is taken at
/// source position `i * from_rate / to_rate`; the last source sample is held
/// past the end of the input.
pub fn resample_linear(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let channels = channels.max(1) as usize;
    let input_frames = samples.len() / channels;
    let output_frames = resampled_len(input_frames, from_rate, to_rate);
    let step = from_rate as f64 / to_rate as f64;

    let mut output = Vec::with_capacity(output_frames * channels);
    for i in 0..output_frames {
        let position = i as f64 * step;
        let index = position.floor() as usize;
        let fraction = position - index as f64;
        let next = (index + 1).min(input_frames - 1);
        let index = index.min(input_frames - 1);

        for ch in 0..channels {
            let s0 = samples[index * channels + ch] as f64;
            let s1 = samples[next * channels + ch] as f64;
            let value = s0 + (s1 - s0) * fraction;
            output.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameDirection;

    #[test]
    fn test_channel_conversion_mono_to_stereo() {
        let output = convert_channels(&[100, 200, 300], 1, 2).unwrap();
        assert_eq!(output, vec![100, 100, 200, 200, 300, 300]);
    }

    #[test]
    fn test_channel_conversion_stereo_to_mono() {
        let output = convert_channels(&[100, 200, 300, 400], 2, 1).unwrap();
        assert_eq!(output, vec![150, 350]);
    }

    #[test]
    fn test_unsupported_channel_layout() {
        assert!(convert_channels(&[0; 6], 3, 1).is_err());
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let output = resample_linear(&[0, 100, 200, 300], 1, 8000, 16000);
        assert_eq!(output, vec![0, 50, 100, 150, 200, 250, 300, 300]);
    }

    #[test]
    fn test_downsample_picks_every_other_sample() {
        let output = resample_linear(&[0, 10, 20, 30, 40, 50], 1, 16000, 8000);
        assert_eq!(output, vec![0, 20, 40]);
    }

    #[test]
    fn test_resampling_is_deterministic() {
        let input: Vec<i16> = (0..480).map(|i| ((i * 37) % 2000) as i16 - 1000).collect();
        let first = resample_linear(&input, 1, 24000, 8000);
        let second = resample_linear(&input, 1, 24000, 8000);
        assert_eq!(first, second);
        assert_eq!(first.len(), 160);
    }

    #[test]
    fn test_convert_frame_keeps_sequence_and_direction() {
        let frame = AudioFrame::new(
            vec![0; 480],
            AudioFormat::pcm_24khz_mono(),
            42,
            FrameDirection::Outbound,
        );
        let converted = convert_frame(&frame, &AudioFormat::pcm_8khz_mono()).unwrap();
        assert_eq!(converted.samples().len(), 160);
        assert_eq!(converted.sequence(), 42);
        assert_eq!(converted.direction(), FrameDirection::Outbound);
        assert_eq!(converted.format().sample_rate, 8000);
    }

    #[test]
    fn test_convert_frame_rejects_non_16_bit() {
        let frame = AudioFrame::new(
            vec![0; 160],
            AudioFormat::new(8000, 1, 8, 20),
            0,
            FrameDirection::Inbound,
        );
        let result = convert_frame(&frame, &AudioFormat::pcm_16khz_mono());
        assert!(matches!(result, Err(AudioError::FormatConversionFailed { .. })));
    }
}
