//! Property tests for the wire codec, the resampler and the detector

use callbridge_audio_core::{
    format::resample_linear, AudioFormat, AudioFrame, FrameCodec, FrameDirection, VadConfig,
    VadEvent, VoiceActivityDetector,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn wire_round_trip_preserves_samples(samples in prop::collection::vec(any::<i16>(), 0..1024)) {
        let codec = FrameCodec::new(AudioFormat::pcm_8khz_mono()).unwrap();
        let frame = AudioFrame::new(samples, AudioFormat::pcm_8khz_mono(), 3, FrameDirection::Inbound);

        let wire = codec.encode(&frame).unwrap();
        prop_assert_eq!(wire.len(), frame.samples().len() * 2);
        let decoded = codec.decode(&wire, 3, FrameDirection::Inbound).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn odd_length_payloads_are_rejected(len in (0usize..512).prop_map(|n| n * 2 + 1)) {
        let codec = FrameCodec::new(AudioFormat::pcm_16khz_mono()).unwrap();
        prop_assert!(codec.decode(&vec![0u8; len], 0, FrameDirection::Inbound).is_err());
    }

    #[test]
    fn doubling_then_halving_the_rate_is_lossless(samples in prop::collection::vec(any::<i16>(), 1..400)) {
        let up = resample_linear(&samples, 1, 8000, 16000);
        prop_assert_eq!(up.len(), samples.len() * 2);
        let down = resample_linear(&up, 1, 16000, 8000);
        prop_assert_eq!(down, samples);
    }

    #[test]
    fn vad_events_alternate(amplitudes in prop::collection::vec(prop_oneof![Just(0i16), Just(12000i16)], 0..300)) {
        let mut vad = VoiceActivityDetector::new(VadConfig {
            energy_threshold: 0.05,
            speech_frames: 3,
            silence_frames: 4,
            ..Default::default()
        })
        .unwrap();

        let mut expect_start = true;
        for (seq, amplitude) in amplitudes.into_iter().enumerate() {
            let frame = AudioFrame::new(
                vec![amplitude; 320],
                AudioFormat::pcm_16khz_mono(),
                seq as u64,
                FrameDirection::Inbound,
            );
            match vad.process(&frame) {
                Some(VadEvent::SpeechStarted { .. }) => {
                    prop_assert!(expect_start);
                    expect_start = false;
                }
                Some(VadEvent::SpeechEnded { speech_frames, .. }) => {
                    prop_assert!(!expect_start);
                    prop_assert!(speech_frames >= 7);
                    expect_start = true;
                }
                None => {}
            }
        }
    }
}
