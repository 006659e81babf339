//! Telephony wire codec
//!
//! The media channel carries raw signed 16-bit little-endian PCM in a fixed
//! format negotiated when the channel opens. [`FrameCodec`] turns wire bytes
//! into [`AudioFrame`]s and back, converting sample rate and channel layout
//! when the frame being encoded was produced in a different format.

use crate::error::{AudioError, AudioResult};
use crate::format;
use crate::types::{AudioFormat, AudioFrame, FrameDirection};

/// Stateless converter between wire bytes and PCM frames for one wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    wire_format: AudioFormat,
}

impl FrameCodec {
    /// Create a codec for the given wire format. Only 16-bit PCM is accepted.
    pub fn new(wire_format: AudioFormat) -> AudioResult<Self> {
        if wire_format.bits_per_sample != 16 {
            return Err(AudioError::unsupported(
                wire_format.description(),
                "wire format must be 16-bit PCM",
            ));
        }
        if wire_format.channels == 0 || wire_format.sample_rate == 0 {
            return Err(AudioError::unsupported(
                wire_format.description(),
                "sample rate and channel count must be non-zero",
            ));
        }
        Ok(Self { wire_format })
    }

    /// The format of bytes on the wire
    pub fn wire_format(&self) -> &AudioFormat {
        &self.wire_format
    }

    /// Decode wire bytes into a frame in the wire format.
    ///
    /// Fails with [`AudioError::MalformedFrame`] when the length is not an exact
    /// multiple of the sample frame size. An empty payload decodes to an empty frame.
    pub fn decode(
        &self,
        wire: &[u8],
        sequence: u64,
        direction: FrameDirection,
    ) -> AudioResult<AudioFrame> {
        let samples = bytes_to_pcm16(wire, &self.wire_format)?;
        Ok(AudioFrame::new(samples, self.wire_format, sequence, direction))
    }

    /// Encode a frame for the wire, converting from the frame's own format first.
    pub fn encode(&self, frame: &AudioFrame) -> AudioResult<Vec<u8>> {
        if frame.format().is_compatible_with(&self.wire_format) {
            return Ok(pcm16_to_bytes(frame.samples()));
        }
        let converted = format::convert_frame(frame, &self.wire_format)?;
        Ok(pcm16_to_bytes(converted.samples()))
    }

    /// Convert a frame into another PCM format without serializing it
    pub fn convert(&self, frame: &AudioFrame, target: &AudioFormat) -> AudioResult<AudioFrame> {
        format::convert_frame(frame, target)
    }
}

/// Parse little-endian PCM16 bytes, validating whole sample frames for `format`.
pub fn bytes_to_pcm16(bytes: &[u8], format: &AudioFormat) -> AudioResult<Vec<i16>> {
    let frame_size = format.bytes_per_sample_frame();
    if frame_size == 0 || bytes.len() % frame_size != 0 {
        return Err(AudioError::malformed(bytes.len(), frame_size));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize PCM16 samples as little-endian bytes
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_little_endian() {
        let codec = FrameCodec::new(AudioFormat::pcm_8khz_mono()).unwrap();
        let frame = codec
            .decode(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80], 3, FrameDirection::Inbound)
            .unwrap();
        assert_eq!(frame.samples(), &[1, -1, i16::MIN]);
        assert_eq!(frame.sequence(), 3);
    }

    #[test]
    fn test_decode_rejects_partial_sample() {
        let codec = FrameCodec::new(AudioFormat::pcm_8khz_mono()).unwrap();
        let err = codec.decode(&[0u8; 321], 0, FrameDirection::Inbound).unwrap_err();
        assert_eq!(err, AudioError::MalformedFrame { length: 321, frame_size: 2 });
    }

    #[test]
    fn test_decode_rejects_partial_stereo_frame() {
        let codec = FrameCodec::new(AudioFormat::new(8000, 2, 16, 20)).unwrap();
        // Whole 16-bit samples but half a stereo frame
        let err = codec.decode(&[0u8; 6], 0, FrameDirection::Inbound).unwrap_err();
        assert_eq!(err, AudioError::MalformedFrame { length: 6, frame_size: 4 });
    }

    #[test]
    fn test_empty_payload_decodes_to_empty_frame() {
        let codec = FrameCodec::new(AudioFormat::pcm_16khz_mono()).unwrap();
        let frame = codec.decode(&[], 0, FrameDirection::Inbound).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_encode_resamples_to_wire_format() {
        let codec = FrameCodec::new(AudioFormat::pcm_8khz_mono()).unwrap();
        let ai_frame = AudioFrame::new(
            vec![1000; 480],
            AudioFormat::pcm_24khz_mono(),
            0,
            FrameDirection::Outbound,
        );
        let wire = codec.encode(&ai_frame).unwrap();
        assert_eq!(wire.len(), 320);
        assert_eq!(&wire[..2], &1000i16.to_le_bytes());
    }

    #[test]
    fn test_rejects_non_16_bit_wire_format() {
        assert!(FrameCodec::new(AudioFormat::new(8000, 1, 8, 20)).is_err());
    }
}
