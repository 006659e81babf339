//! AI stream integration tests
//!
//! The in-memory endpoint covers handle semantics; a local tokio-tungstenite
//! server covers the real wire protocol.

use callbridge_ai_copilot::{
    connect_with_retry, AiConfig, AiConnector, AiError, AiEvent, AiSessionConfig,
    InMemoryConnector, Outbound, RetryPolicy, Role, WebSocketConnector,
};
use callbridge_audio_core::{AudioFormat, AudioFrame, FrameDirection};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

fn caller_frame(seq: u64) -> AudioFrame {
    AudioFrame::new(
        vec![500; 320],
        AudioFormat::pcm_16khz_mono(),
        seq,
        FrameDirection::Inbound,
    )
}

fn session(endpoint: String) -> AiSessionConfig {
    AiSessionConfig::new(
        "call-test",
        AiConfig {
            endpoint,
            setup_timeout_ms: 2_000,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 10,
                max_backoff_ms: 20,
            },
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod handle_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connector, mut peers) = InMemoryConnector::new();
        let config = AiSessionConfig::new("call-1", AiConfig::default());
        let other = AiSessionConfig::new("call-2", AiConfig::default());

        let first = connector.open(&config).await.unwrap();
        let _second = connector.open(&other).await.unwrap();
        let _peer1 = peers.recv().await.unwrap();
        let _peer2 = peers.recv().await.unwrap();
        assert_eq!(connector.open_connections(), 2);

        first.handle.close();
        first.handle.close();
        assert_eq!(connector.open_connections(), 1);

        drop(first);
        assert_eq!(connector.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (connector, mut peers) = InMemoryConnector::new();
        let stream = connector
            .open(&AiSessionConfig::new("call-1", AiConfig::default()))
            .await
            .unwrap();
        let peer = peers.recv().await.unwrap();

        stream.handle.close();
        assert!(peer.is_closed());
        assert!(matches!(
            stream.handle.send_audio(caller_frame(0)),
            Err(AiError::ClosedConnection)
        ));
        assert!(matches!(
            stream.handle.cancel_response(),
            Err(AiError::ClosedConnection)
        ));
    }

    #[tokio::test]
    async fn test_full_buffer_drops_oldest() {
        let (connector, mut peers) = InMemoryConnector::new();
        let config = AiSessionConfig::new(
            "call-1",
            AiConfig {
                send_buffer_frames: 4,
                ..Default::default()
            },
        );
        let stream = connector.open(&config).await.unwrap();
        let peer = peers.recv().await.unwrap();

        for seq in 0..10 {
            stream.handle.send_audio(caller_frame(seq)).unwrap();
        }
        assert_eq!(stream.handle.dropped_frames(), 6);

        let sequences: Vec<u64> = peer
            .drain()
            .into_iter()
            .map(|item| match item {
                Outbound::Audio(frame) => frame.sequence(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(sequences, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_caller_audio_is_converted_to_input_format() {
        let (connector, mut peers) = InMemoryConnector::new();
        let stream = connector
            .open(&AiSessionConfig::new("call-1", AiConfig::default()))
            .await
            .unwrap();
        let peer = peers.recv().await.unwrap();

        let narrowband = AudioFrame::new(
            vec![0; 160],
            AudioFormat::pcm_8khz_mono(),
            0,
            FrameDirection::Inbound,
        );
        stream.handle.send_audio(narrowband).unwrap();
        match peer.recv().await {
            Some(Outbound::Audio(frame)) => {
                assert_eq!(frame.format().sample_rate, 16000);
                assert_eq!(frame.samples().len(), 320);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_end_when_endpoint_goes_away() {
        let (connector, mut peers) = InMemoryConnector::new();
        let stream = connector
            .open(&AiSessionConfig::new("call-1", AiConfig::default()))
            .await
            .unwrap();
        let (handle, mut events) = stream.into_parts();
        let peer = peers.recv().await.unwrap();

        assert!(peer.send(AiEvent::TurnComplete));
        drop(peer);

        assert_eq!(events.recv().await, Some(AiEvent::TurnComplete));
        assert_eq!(events.recv().await, None);
        assert!(handle.is_closed());
        assert_eq!(connector.open_connections(), 0);
        handle.close();
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_transient_failures() {
        let (connector, mut peers) = InMemoryConnector::new();
        connector.fail_next(AiError::connect_transient("refused"));
        connector.fail_next(AiError::connect_transient("refused"));

        let config = AiSessionConfig::new("call-1", AiConfig::default());
        let stream = connect_with_retry(&connector, &config).await.unwrap();
        assert_eq!(connector.attempts(), 3);
        assert_eq!(stream.handle.session_id(), "call-1");
        assert!(peers.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_attempts() {
        let (connector, _peers) = InMemoryConnector::new();
        for _ in 0..5 {
            connector.fail_next(AiError::connect_transient("refused"));
        }
        let result = connect_with_retry(&connector, &AiSessionConfig::new("call-1", AiConfig::default())).await;
        assert!(matches!(result, Err(AiError::ConnectError { .. })));
        assert_eq!(connector.attempts(), RetryPolicy::default().max_attempts);
        assert_eq!(connector.open_connections(), 0);
    }
}

#[cfg(test)]
mod websocket_tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_audio_and_events_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let setup = ws.next().await.unwrap().unwrap();
            let setup: serde_json::Value = serde_json::from_str(setup.to_text().unwrap()).unwrap();
            assert_eq!(setup["setup"]["sessionId"], "call-test");
            assert_eq!(setup["setup"]["audioFormat"]["sampleRate"], 16000);
            ws.send(Message::text(r#"{"setupComplete":{}}"#)).await.unwrap();

            let audio = ws.next().await.unwrap().unwrap();
            let audio: serde_json::Value = serde_json::from_str(audio.to_text().unwrap()).unwrap();
            assert_eq!(
                audio["realtimeInput"]["mediaChunks"][0]["mimeType"],
                "audio/pcm;rate=16000"
            );

            ws.send(Message::text(
                r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQD//w=="}}]}}}"#,
            ))
            .await
            .unwrap();
            ws.send(Message::text(
                r#"{"serverContent":{"outputTranscription":{"text":"hello","finished":true},"turnComplete":true}}"#,
            ))
            .await
            .unwrap();

            let cancel = ws.next().await.unwrap().unwrap();
            assert_eq!(cancel.to_text().unwrap(), r#"{"responseCancel":{}}"#);

            // Client close handshake
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let connector = WebSocketConnector::new();
        let stream = connector
            .open(&session(format!("ws://{}/v1/realtime", addr)))
            .await
            .unwrap();
        assert_eq!(connector.open_connections(), 1);
        let (handle, mut events) = stream.into_parts();

        handle.send_audio(caller_frame(0)).unwrap();

        match events.recv().await {
            Some(AiEvent::AudioChunk(frame)) => {
                assert_eq!(frame.samples(), &[1, -1]);
                assert_eq!(frame.format().sample_rate, 24000);
            }
            other => panic!("expected audio chunk, got {:?}", other),
        }
        assert_eq!(
            events.recv().await,
            Some(AiEvent::TranscriptFinal {
                role: Role::Assistant,
                text: "hello".to_string()
            })
        );
        assert_eq!(events.recv().await, Some(AiEvent::TurnComplete));

        handle.cancel_response().unwrap();
        // Give the connection task a chance to flush the cancel before closing
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.close();
        assert_eq!(connector.open_connections(), 0);

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events.recv().await, None);
    }

    /// Accept one websocket and acknowledge its setup
    async fn accept_session(listener: &TcpListener) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let setup = ws.next().await.unwrap().unwrap();
        assert!(setup.to_text().unwrap().contains("\"setup\""));
        ws.send(Message::text(r#"{"setupComplete":{}}"#)).await.unwrap();
        ws
    }

    #[tokio::test]
    async fn test_transport_loss_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // Drop the first connection without a close handshake
            let first = accept_session(&listener).await;
            drop(first);

            let mut second = accept_session(&listener).await;
            second
                .send(Message::text(r#"{"serverContent":{"turnComplete":true}}"#))
                .await
                .unwrap();
            while let Some(Ok(message)) = second.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let connector = WebSocketConnector::new();
        let stream = connector
            .open(&session(format!("ws://{}/v1/realtime", addr)))
            .await
            .unwrap();
        let (handle, mut events) = stream.into_parts();

        let next = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(next, Some(AiEvent::Reconnected));
        let next = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(next, Some(AiEvent::TurnComplete));
        assert_eq!(connector.open_connections(), 1);

        handle.close();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_stops_reconnect_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (rejected_tx, mut rejected) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let first = accept_session(&listener).await;
            drop(first);
            // Every reconnect attempt gets a retryable server error
            while let Ok((tcp, _)) = listener.accept().await {
                let unavailable = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                    Err(http::Response::builder()
                        .status(http::StatusCode::SERVICE_UNAVAILABLE)
                        .body(None)
                        .unwrap())
                };
                let _ = tokio_tungstenite::accept_hdr_async(tcp, unavailable).await;
                let _ = rejected_tx.send(());
            }
        });

        let mut config = session(format!("ws://{}/v1/realtime", addr));
        config.ai.retry = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 200,
        };
        let connector = WebSocketConnector::new();
        let (handle, mut events) = connector.open(&config).await.unwrap().into_parts();

        tokio::time::timeout(Duration::from_secs(5), rejected.recv())
            .await
            .unwrap()
            .unwrap();
        handle.close();

        // The task notices the close before its next attempt and ends the stream
        let end = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(end, None);
        tokio::time::sleep(Duration::from_millis(600)).await;
        let mut more = 0;
        while rejected.try_recv().is_ok() {
            more += 1;
        }
        assert_eq!(more, 0);
    }

    #[tokio::test]
    async fn test_auth_rejection_is_connect_error_without_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut handshakes = 0;
            while let Ok(Ok((tcp, _))) =
                tokio::time::timeout(Duration::from_millis(500), listener.accept()).await
            {
                handshakes += 1;
                let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                    Err(http::Response::builder()
                        .status(http::StatusCode::UNAUTHORIZED)
                        .body(None)
                        .unwrap())
                };
                let _ = tokio_tungstenite::accept_hdr_async(tcp, reject).await;
            }
            handshakes
        });

        let connector = WebSocketConnector::new();
        let result = connect_with_retry(&connector, &session(format!("ws://{}/", addr))).await;
        match result {
            Err(AiError::ConnectError { retryable, reason }) => {
                assert!(!retryable);
                assert!(reason.contains("401"), "reason was {}", reason);
            }
            other => panic!("expected ConnectError, got {:?}", other.map(|_| ())),
        }
        assert_eq!(server.await.unwrap(), 1);
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_setup_timeout_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts the websocket but never acknowledges setup
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let mut config = session(format!("ws://{}/", addr));
        config.ai.setup_timeout_ms = 100;
        let result = WebSocketConnector::new().open(&config).await;
        assert!(matches!(
            result,
            Err(AiError::ConnectError { retryable: true, .. })
        ));
    }
}
