//! Shared helpers for bridge integration tests

#![allow(dead_code)]

use callbridge_ai_copilot::{AiConnector, AiEvent, InMemoryConnector, RetryPolicy};
use callbridge_audio_core::{AudioFormat, AudioFrame, FrameDirection};
use callbridge_session_core::{BridgeConfig, BridgeService, LifecycleState, SessionSnapshot};
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Samples per 20 ms frame at 16 kHz
pub const WIRE_SAMPLES: usize = 320;

pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.vad.speech_frames = 8;
    config.vad.silence_frames = 10;
    config.ai.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
    };
    config
}

pub fn service_with(config: BridgeConfig) -> (Arc<BridgeService>, Arc<InMemoryConnector>, tokio::sync::mpsc::UnboundedReceiver<callbridge_ai_copilot::AiPeer>) {
    let (connector, peers) = InMemoryConnector::new();
    let connector = Arc::new(connector);
    let service = BridgeService::new(config, connector.clone() as Arc<dyn AiConnector>).unwrap();
    (Arc::new(service), connector, peers)
}

/// One wire frame of digital silence
pub fn silence() -> Vec<u8> {
    vec![0u8; WIRE_SAMPLES * 2]
}

/// One wire frame of a loud 440 Hz tone
pub fn tone() -> Vec<u8> {
    (0..WIRE_SAMPLES)
        .map(|i| ((2.0 * PI * 440.0 * i as f32 / 16_000.0).sin() * 16_000.0) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// A 20 ms assistant chunk in the AI output format (24 kHz)
pub fn assistant_chunk(sequence: u64) -> AiEvent {
    let samples = (0..480)
        .map(|i| ((2.0 * PI * 220.0 * i as f32 / 24_000.0).sin() * 8_000.0) as i16)
        .collect();
    AiEvent::AudioChunk(AudioFrame::new(
        samples,
        AudioFormat::pcm_24khz_mono(),
        sequence,
        FrameDirection::Outbound,
    ))
}

/// Wait until a published snapshot satisfies `predicate`
pub async fn wait_until<F>(snapshots: &mut watch::Receiver<SessionSnapshot>, predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), snapshots.wait_for(predicate))
        .await
        .expect("timed out waiting for session snapshot")
        .expect("session publisher dropped")
        .clone()
}

pub async fn wait_for_state(
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    state: LifecycleState,
) -> SessionSnapshot {
    wait_until(snapshots, |s| s.state == state).await
}
