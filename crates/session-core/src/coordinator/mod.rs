//! Bridge coordinator
//!
//! One coordinator task runs per call. It owns the [`CallSession`], the
//! media channel and the AI stream, and interleaves inbound media and AI
//! events in a single `select!` loop. Every write it makes is a non-blocking
//! enqueue to a connection's writer task, so neither direction ever waits on
//! the other's network I/O.
//!
//! Each loop iteration handles one *tick*: whatever media messages and AI
//! events are ready at that moment, media first. A caller `SpeechStarted`
//! and a new-turn assistant chunk in the same tick resolve in the caller's
//! favour: the chunk is discarded and a barge-in is sent.

use crate::config::BridgeConfig;
use crate::errors::Result;
use crate::media::{MediaChannel, MediaInbound, MediaMessage, MediaSender};
use crate::registry::{NewSession, RegistryGuard, SessionCommand};
use crate::session::{CallSession, CloseReason, LifecycleState};
use bytes::Bytes;
use callbridge_ai_copilot::{
    connect_with_retry, AiConnector, AiError, AiEvent, AiEvents, AiSessionConfig, AiStreamHandle,
    Role,
};
use callbridge_audio_core::{AudioFrame, FrameCodec, FrameDirection, VadEvent, VoiceActivityDetector};
use callbridge_infra_common::LogContext;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn, Instrument, Level};

/// Upper bound on messages taken from each source in one tick
const MAX_BATCH: usize = 64;

/// Outcome of one processing step; `Err` carries the reason to close the session
type Step = std::result::Result<(), CloseReason>;

/// Messages and events that were ready in one tick
#[derive(Default)]
struct Tick {
    media: Vec<Result<MediaMessage>>,
    media_ended: bool,
    events: Vec<AiEvent>,
    ai_ended: bool,
    /// The caller started speaking during this tick
    speech_started: bool,
}

/// Owns one call from setup to teardown
pub struct BridgeCoordinator {
    session: CallSession,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    guard: RegistryGuard,
    inbound: MediaInbound,
    media: MediaSender,
    connector: Arc<dyn AiConnector>,
    config: Arc<BridgeConfig>,
    codec: FrameCodec,
    vad: VoiceActivityDetector,
    preroll: VecDeque<AudioFrame>,
    /// Discard assistant audio until the cancelled response is finished
    suppress_assistant: bool,
    speech_ended_at: Option<Instant>,
    inbound_sequence: u64,
}

impl BridgeCoordinator {
    pub fn new(
        registered: NewSession,
        channel: MediaChannel,
        connector: Arc<dyn AiConnector>,
        config: Arc<BridgeConfig>,
    ) -> Result<Self> {
        let codec = FrameCodec::new(config.media.wire_format)?;
        let vad = VoiceActivityDetector::new(config.vad)?;
        let (inbound, media) = channel.into_parts();
        let NewSession {
            session,
            commands,
            guard,
        } = registered;
        Ok(Self {
            session,
            commands,
            guard,
            inbound,
            media,
            connector,
            preroll: VecDeque::with_capacity(config.media.preroll_frames),
            config,
            codec,
            vad,
            suppress_assistant: false,
            speech_ended_at: None,
            inbound_sequence: 0,
        })
    }

    /// Drive the call until it closes and return why it closed.
    ///
    /// The session is unregistered when this returns, on every path.
    pub async fn run(self) -> CloseReason {
        let span = LogContext::for_call("coordinator", self.session.id()).span(Level::INFO);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> CloseReason {
        self.session.publish();
        let ai_config = AiSessionConfig::new(self.session.id(), self.config.ai.clone());

        // The media side stays live while the AI connects, so a hangup does
        // not wait out the connect retries.
        let connector = self.connector.clone();
        let outcome = {
            let connect = connect_with_retry(connector.as_ref(), &ai_config);
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    biased;

                    command = self.commands.recv() => break Err(command_reason(command)),
                    message = self.inbound.recv() => {
                        let step = self.on_setup_media(message);
                        self.session.publish_if_changed();
                        if let Err(reason) = step {
                            break Err(reason);
                        }
                    }
                    result = &mut connect => break result.map_err(|e| {
                        warn!(error = %e, "AI connection failed, session never became active");
                        CloseReason::ConnectFailed(e.to_string())
                    }),
                }
            }
        };
        let stream = match outcome {
            Ok(stream) => stream,
            Err(reason) => return self.finish(None, reason).await,
        };

        let (ai, mut events) = stream.into_parts();
        self.set_state(LifecycleState::Active);
        self.session.touch();
        self.session.publish();
        info!("session active");

        let reason = self.conversation(&ai, &mut events).await;
        self.finish(Some(ai), reason).await
    }

    async fn conversation(&mut self, ai: &AiStreamHandle, events: &mut AiEvents) -> CloseReason {
        let timeouts = self.config.timeouts.clone();
        let period = timeouts.watchdog_interval();
        let mut watchdog = interval_at(Instant::now() + period, period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let mut tick = Tick::default();

            tokio::select! {
                biased;

                command = self.commands.recv() => return command_reason(command),
                message = self.inbound.recv() => match message {
                    Some(message) => tick.media.push(message),
                    None => tick.media_ended = true,
                },
                event = events.recv() => match event {
                    Some(event) => tick.events.push(event),
                    None => tick.ai_ended = true,
                },
                _ = watchdog.tick() => {
                    let idle = self.session.idle_for();
                    if idle >= timeouts.inactivity() {
                        info!(idle_ms = idle.as_millis() as u64, "no activity, closing");
                        return CloseReason::InactivityTimeout;
                    }
                    continue;
                }
            }

            while tick.media.len() < MAX_BATCH {
                match self.inbound.try_recv() {
                    Some(message) => tick.media.push(message),
                    None => break,
                }
            }
            while tick.events.len() < MAX_BATCH {
                match events.try_recv() {
                    Ok(event) => tick.events.push(event),
                    Err(_) => break,
                }
            }

            let step = self.process_tick(ai, &mut tick);
            self.sync_metrics(Some(ai));
            self.session.publish_if_changed();
            if let Err(reason) = step {
                return reason;
            }
        }
    }

    fn process_tick(&mut self, ai: &AiStreamHandle, tick: &mut Tick) -> Step {
        let media = std::mem::take(&mut tick.media);
        for message in media {
            self.on_media(ai, message, tick)?;
        }
        if tick.media_ended {
            info!("media channel ended");
            return Err(CloseReason::MediaClosed);
        }

        let events = std::mem::take(&mut tick.events);
        for event in events {
            self.on_ai_event(ai, event, tick)?;
        }
        if tick.ai_ended {
            info!("AI event stream ended");
            return Err(CloseReason::AiClosed);
        }
        Ok(())
    }

    fn on_media(&mut self, ai: &AiStreamHandle, message: Result<MediaMessage>, tick: &mut Tick) -> Step {
        self.session.touch();
        match message {
            Ok(MediaMessage::Audio(payload)) => self.on_inbound_audio(ai, &payload, tick),
            Ok(MediaMessage::Hangup) => {
                info!("caller hung up");
                Err(CloseReason::Hangup)
            }
            Ok(MediaMessage::Mark(label)) => {
                trace!(mark = ?label, "playback mark");
                Ok(())
            }
            Ok(MediaMessage::StopPlayback) => {
                debug!("ignoring stop-playback from media peer");
                Ok(())
            }
            Err(e) => {
                self.session.metrics_mut().malformed_frames += 1;
                debug!(error = %e, "dropping malformed media message");
                Ok(())
            }
        }
    }

    /// Media that arrives before the AI stream is up. Audio is kept for the
    /// pre-roll; nothing reaches the AI yet.
    fn on_setup_media(&mut self, message: Option<Result<MediaMessage>>) -> Step {
        let Some(message) = message else {
            info!("media channel ended while connecting");
            return Err(CloseReason::MediaClosed);
        };
        self.session.touch();
        match message {
            Ok(MediaMessage::Audio(payload)) => {
                self.session.metrics_mut().frames_in += 1;
                let sequence = self.inbound_sequence;
                self.inbound_sequence += 1;
                match self.codec.decode(&payload, sequence, FrameDirection::Inbound) {
                    Ok(frame) => self.push_preroll(frame),
                    Err(e) => {
                        self.session.metrics_mut().malformed_frames += 1;
                        debug!(sequence, error = %e, "dropping malformed audio frame");
                    }
                }
                Ok(())
            }
            Ok(MediaMessage::Hangup) => {
                info!("caller hung up while connecting");
                Err(CloseReason::Hangup)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                self.session.metrics_mut().malformed_frames += 1;
                debug!(error = %e, "dropping malformed media message");
                Ok(())
            }
        }
    }

    fn push_preroll(&mut self, frame: AudioFrame) {
        if self.config.media.preroll_frames == 0 {
            return;
        }
        if self.preroll.len() >= self.config.media.preroll_frames {
            self.preroll.pop_front();
        }
        self.preroll.push_back(frame);
    }

    fn on_inbound_audio(&mut self, ai: &AiStreamHandle, payload: &Bytes, tick: &mut Tick) -> Step {
        self.session.metrics_mut().frames_in += 1;
        let sequence = self.inbound_sequence;
        self.inbound_sequence += 1;

        let frame = match self.codec.decode(payload, sequence, FrameDirection::Inbound) {
            Ok(frame) => frame,
            Err(e) => {
                self.session.metrics_mut().malformed_frames += 1;
                debug!(sequence, error = %e, "dropping malformed audio frame");
                return Ok(());
            }
        };

        match self.vad.process(&frame) {
            Some(VadEvent::SpeechStarted { sequence }) => {
                debug!(sequence, "caller speech started");
                tick.speech_started = true;
                self.on_speech_started(ai)?;
            }
            Some(VadEvent::SpeechEnded {
                sequence,
                speech_frames,
            }) => {
                debug!(sequence, speech_frames, "caller speech ended");
                self.on_speech_ended(ai)?;
            }
            None => {}
        }

        if self.session.state() == LifecycleState::CallerSpeaking {
            ai_step(ai.send_audio(frame))
        } else {
            self.push_preroll(frame);
            Ok(())
        }
    }

    fn on_speech_started(&mut self, ai: &AiStreamHandle) -> Step {
        self.session.metrics_mut().speech_segments += 1;
        if self.session.state() == LifecycleState::AiSpeaking {
            self.interrupt(ai)?;
        }
        self.set_state(LifecycleState::CallerSpeaking);
        self.session.open_turn(Role::Caller);
        self.speech_ended_at = None;

        ai_step(ai.activity_start())?;
        while let Some(frame) = self.preroll.pop_front() {
            ai_step(ai.send_audio(frame))?;
        }
        Ok(())
    }

    fn on_speech_ended(&mut self, ai: &AiStreamHandle) -> Step {
        ai_step(ai.activity_end())?;
        self.session.close_turn(Role::Caller, false);
        if self.session.state() == LifecycleState::CallerSpeaking {
            self.set_state(LifecycleState::Active);
        }
        self.speech_ended_at = Some(Instant::now());
        Ok(())
    }

    /// Caller barge-in while the assistant is speaking
    fn interrupt(&mut self, ai: &AiStreamHandle) -> Step {
        self.media
            .stop_playback()
            .map_err(|_| CloseReason::MediaClosed)?;
        ai_step(ai.cancel_response())?;
        self.session.metrics_mut().interruptions += 1;
        self.session.close_turn(Role::Assistant, true);
        self.suppress_assistant = true;
        info!(
            interruptions = self.session.metrics().interruptions,
            "caller interrupted assistant"
        );
        Ok(())
    }

    fn on_ai_event(&mut self, ai: &AiStreamHandle, event: AiEvent, tick: &Tick) -> Step {
        self.session.touch();
        match event {
            AiEvent::AudioChunk(frame) => self.on_assistant_audio(ai, frame, tick),
            AiEvent::TranscriptPartial { role, text } => {
                trace!(%role, text = %text, "partial transcript");
                Ok(())
            }
            AiEvent::TranscriptFinal { role, text } => {
                debug!(%role, text = %text, "transcript");
                self.session.set_transcript(role, &text);
                Ok(())
            }
            AiEvent::TurnComplete => {
                if self.suppress_assistant {
                    debug!("cancelled response finished");
                    self.suppress_assistant = false;
                } else {
                    self.session.close_turn(Role::Assistant, false);
                }
                if self.session.state() == LifecycleState::AiSpeaking {
                    self.set_state(LifecycleState::Active);
                }
                Ok(())
            }
            AiEvent::Interrupted => {
                self.suppress_assistant = false;
                if self.session.close_turn(Role::Assistant, true) {
                    debug!("AI endpoint interrupted its response");
                }
                if self.session.state() == LifecycleState::AiSpeaking {
                    self.media
                        .stop_playback()
                        .map_err(|_| CloseReason::MediaClosed)?;
                    self.set_state(LifecycleState::Active);
                }
                Ok(())
            }
            AiEvent::Reconnected => self.on_ai_reconnected(),
            AiEvent::Error {
                message,
                fatal: true,
            } => {
                warn!(error = %message, "fatal AI error");
                Err(CloseReason::AiError(message))
            }
            AiEvent::Error {
                message,
                fatal: false,
            } => {
                warn!(error = %message, "AI endpoint reported an error");
                Ok(())
            }
        }
    }

    /// The response in flight died with the old connection: stop its
    /// playback and start the next turn from a clean slate.
    fn on_ai_reconnected(&mut self) -> Step {
        warn!("AI connection re-established, response in progress lost");
        self.suppress_assistant = false;
        self.session.close_turn(Role::Assistant, true);
        if self.session.state() == LifecycleState::AiSpeaking {
            self.media
                .stop_playback()
                .map_err(|_| CloseReason::MediaClosed)?;
            self.set_state(LifecycleState::Active);
        }
        Ok(())
    }

    fn on_assistant_audio(&mut self, ai: &AiStreamHandle, frame: AudioFrame, tick: &Tick) -> Step {
        if self.suppress_assistant {
            self.session.metrics_mut().suppressed_chunks += 1;
            return Ok(());
        }

        if !self.session.has_open_turn(Role::Assistant) {
            if tick.speech_started {
                debug!("assistant turn started as caller began speaking, discarding");
                self.session.metrics_mut().suppressed_chunks += 1;
                self.suppress_assistant = true;
                return ai_step(ai.cancel_response());
            }
            self.session.close_turn(Role::Caller, false);
            self.set_state(LifecycleState::AiSpeaking);
            self.session.open_turn(Role::Assistant);
            if let Some(ended) = self.speech_ended_at.take() {
                let latency = ended.elapsed();
                debug!(latency_ms = latency.as_millis() as u64, "first assistant audio");
                self.session.metrics_mut().record_latency(latency);
            }
        }

        let wire = match self.codec.encode(&frame) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "cannot encode assistant audio, dropping chunk");
                return Ok(());
            }
        };
        self.media
            .send_audio(Bytes::from(wire))
            .map_err(|_| CloseReason::MediaClosed)?;
        self.session.metrics_mut().frames_out += 1;
        Ok(())
    }

    fn set_state(&mut self, next: LifecycleState) {
        if let Err(e) = self.session.transition(next) {
            warn!(error = %e, "ignoring state change");
        }
    }

    fn sync_metrics(&mut self, ai: Option<&AiStreamHandle>) {
        let dropped = self.vad.dropped_frames();
        let outbound_dropped = self.media.dropped_frames();
        let metrics = self.session.metrics_mut();
        metrics.dropped_frames = dropped;
        metrics.outbound_dropped = outbound_dropped;
        if let Some(ai) = ai {
            metrics.ai_send_dropped = ai.dropped_frames();
        }
    }

    /// Release both connections and publish the terminal snapshot
    async fn finish(mut self, ai: Option<AiStreamHandle>, reason: CloseReason) -> CloseReason {
        self.session.begin_closing(reason.clone());
        self.sync_metrics(ai.as_ref());
        self.session.publish();

        if let Some(ai) = ai {
            ai.close();
        }

        let Self {
            mut session,
            media,
            guard,
            config,
            ..
        } = self;
        if !media.shutdown(config.timeouts.close_grace()).await {
            warn!("media channel did not close within the grace period");
        }

        session.mark_closed();
        session.publish();
        info!(reason = %reason, "session closed");
        drop(guard);
        reason
    }
}

/// Closing reason for a command, or for the registry dropping the session
fn command_reason(command: Option<SessionCommand>) -> CloseReason {
    match command {
        Some(SessionCommand::Hangup) => CloseReason::Hangup,
        Some(SessionCommand::CallEnded) => CloseReason::CallEnded,
        None => CloseReason::Shutdown,
    }
}

fn ai_step(result: callbridge_ai_copilot::Result<()>) -> Step {
    match result {
        Ok(()) => Ok(()),
        Err(AiError::ClosedConnection) => Err(CloseReason::AiClosed),
        Err(e) => {
            warn!(error = %e, "AI send failed");
            Ok(())
        }
    }
}
