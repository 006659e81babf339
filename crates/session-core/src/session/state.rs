//! Lifecycle states, close reasons and the per-call data model

use callbridge_ai_copilot::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Most recent AI round-trip latency samples kept per call
pub const MAX_LATENCY_SAMPLES: usize = 256;

/// Lifecycle of one bridged call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Media and AI connections are being established
    Connecting,
    /// Both connections up, nobody speaking
    Active,
    /// Assistant audio is being played to the caller
    AiSpeaking,
    /// Caller speech is being forwarded to the AI
    CallerSpeaking,
    /// Connections are being released
    Closing,
    /// Terminal
    Closed,
}

impl LifecycleState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Closing)
                | (Active, AiSpeaking)
                | (Active, CallerSpeaking)
                | (Active, Closing)
                | (AiSpeaking, Active)
                | (AiSpeaking, CallerSpeaking)
                | (AiSpeaking, Closing)
                | (CallerSpeaking, Active)
                | (CallerSpeaking, AiSpeaking)
                | (CallerSpeaking, Closing)
                | (Closing, Closed)
        )
    }

    /// Media and AI are both up and the call is in conversation
    pub fn is_established(self) -> bool {
        matches!(
            self,
            LifecycleState::Active | LifecycleState::AiSpeaking | LifecycleState::CallerSpeaking
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Closed
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Connecting => "Connecting",
            LifecycleState::Active => "Active",
            LifecycleState::AiSpeaking => "AiSpeaking",
            LifecycleState::CallerSpeaking => "CallerSpeaking",
            LifecycleState::Closing => "Closing",
            LifecycleState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The media channel sent a hangup message
    Hangup,
    /// Call control reported the call ended
    CallEnded,
    /// The media connection closed or failed
    MediaClosed,
    /// The AI event sequence ended
    AiClosed,
    /// The AI endpoint reported a fatal error
    AiError(String),
    /// No audio and no events within the inactivity timeout
    InactivityTimeout,
    /// The AI connection could not be set up; the session never became active
    ConnectFailed(String),
    /// The bridge is shutting down
    Shutdown,
}

impl CloseReason {
    /// Whether the session ended because something went wrong
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::MediaClosed
                | CloseReason::AiClosed
                | CloseReason::AiError(_)
                | CloseReason::ConnectFailed(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Hangup => f.write_str("hangup"),
            CloseReason::CallEnded => f.write_str("call ended"),
            CloseReason::MediaClosed => f.write_str("media channel closed"),
            CloseReason::AiClosed => f.write_str("AI connection closed"),
            CloseReason::AiError(message) => write!(f, "AI error: {}", message),
            CloseReason::InactivityTimeout => f.write_str("inactivity timeout"),
            CloseReason::ConnectFailed(message) => write!(f, "connect failed: {}", message),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Caller details handed over by call control
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    pub number: Option<String>,
    pub display_name: Option<String>,
}

impl CallerInfo {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: Some(number.into()),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// The turn was cut short by a barge-in
    pub interrupted: bool,
    /// Final transcript reported by the AI endpoint, if any
    pub transcript: Option<String>,
}

impl Turn {
    pub fn open(role: Role) -> Self {
        Self {
            role,
            started_at: Utc::now(),
            ended_at: None,
            interrupted: false,
            transcript: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Per-call counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Inbound media audio messages received
    pub frames_in: u64,
    /// Audio frames written to the media channel
    pub frames_out: u64,
    /// Caller utterances detected
    pub speech_segments: u64,
    /// Caller barge-ins during assistant speech
    pub interruptions: u64,
    /// Frames the detector dropped for non-finite energy
    pub dropped_frames: u64,
    /// Inbound media messages that could not be decoded
    pub malformed_frames: u64,
    /// Frames dropped from the AI send buffer
    pub ai_send_dropped: u64,
    /// Outbound frames dropped because the media writer was behind
    pub outbound_dropped: u64,
    /// Assistant chunks discarded after a barge-in
    pub suppressed_chunks: u64,
    /// Time from end of caller speech to first assistant audio, oldest first
    pub latency_samples: VecDeque<Duration>,
}

impl SessionMetrics {
    pub fn record_latency(&mut self, latency: Duration) {
        if self.latency_samples.len() == MAX_LATENCY_SAMPLES {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency);
    }

    pub fn average_latency(&self) -> Option<Duration> {
        if self.latency_samples.is_empty() {
            return None;
        }
        let total: Duration = self.latency_samples.iter().sum();
        Some(total / self.latency_samples.len() as u32)
    }
}

/// Read-only copy of a session, published by its coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub caller_info: CallerInfo,
    pub state: LifecycleState,
    pub close_reason: Option<CloseReason>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub turns: Arc<Vec<Turn>>,
    pub metrics: SessionMetrics,
}

impl SessionSnapshot {
    pub fn open_turn(&self, role: Role) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == role && t.is_open())
    }

    pub fn turns_for(&self, role: Role) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(move |t| t.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_transitions() {
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Closing));
        assert!(!Connecting.can_transition_to(CallerSpeaking));
        assert!(AiSpeaking.can_transition_to(CallerSpeaking));
        assert!(CallerSpeaking.can_transition_to(AiSpeaking));
        assert!(!Active.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Closed));

        for next in [Connecting, Active, AiSpeaking, CallerSpeaking, Closing, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_latency_samples_bounded() {
        let mut metrics = SessionMetrics::default();
        for ms in 0..(MAX_LATENCY_SAMPLES as u64 + 10) {
            metrics.record_latency(Duration::from_millis(ms));
        }
        assert_eq!(metrics.latency_samples.len(), MAX_LATENCY_SAMPLES);
        assert_eq!(metrics.latency_samples.front(), Some(&Duration::from_millis(10)));
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::InactivityTimeout.to_string(), "inactivity timeout");
        assert_eq!(
            CloseReason::AiError("quota".to_string()).to_string(),
            "AI error: quota"
        );
        assert!(CloseReason::ConnectFailed("refused".to_string()).is_error());
        assert!(!CloseReason::Hangup.is_error());
    }
}
