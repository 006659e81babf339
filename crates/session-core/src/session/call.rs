//! The owned per-call session

use super::state::{
    CallerInfo, CloseReason, LifecycleState, SessionMetrics, SessionSnapshot, Turn,
};
use crate::errors::{BridgeError, Result};
use callbridge_ai_copilot::Role;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Mutable state of one call.
///
/// Owned by exactly one coordinator; everyone else sees the
/// [`SessionSnapshot`] it publishes through a watch channel.
#[derive(Debug)]
pub struct CallSession {
    id: String,
    caller_info: CallerInfo,
    state: LifecycleState,
    close_reason: Option<CloseReason>,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    last_activity: Instant,
    /// Shared with published snapshots; copied only when a turn changes
    turns: Arc<Vec<Turn>>,
    metrics: SessionMetrics,
    /// Something observers can see changed since the last publish
    changed: bool,
    publisher: watch::Sender<SessionSnapshot>,
}

impl CallSession {
    pub fn new(id: impl Into<String>, caller_info: CallerInfo) -> Self {
        let now = Utc::now();
        let id = id.into();
        let snapshot = SessionSnapshot {
            id: id.clone(),
            caller_info: caller_info.clone(),
            state: LifecycleState::Connecting,
            close_reason: None,
            started_at: now,
            last_activity_at: now,
            turns: Arc::default(),
            metrics: SessionMetrics::default(),
        };
        let (publisher, _) = watch::channel(snapshot);
        Self {
            id,
            caller_info,
            state: LifecycleState::Connecting,
            close_reason: None,
            started_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
            turns: Arc::default(),
            metrics: SessionMetrics::default(),
            changed: false,
            publisher,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn turns(&self) -> &[Turn] {
        self.turns.as_slice()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut SessionMetrics {
        self.changed = true;
        &mut self.metrics
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    /// Moving to the current state is a no-op.
    pub fn transition(&mut self, next: LifecycleState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(call_id = %self.id, from = %self.state, to = %next, "session state change");
        self.state = next;
        self.changed = true;
        Ok(())
    }

    /// Record activity (a frame or an event) now
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Open a turn for `role`. Returns false when one is already open; the
    /// caller's frames then belong to that turn.
    pub fn open_turn(&mut self, role: Role) -> bool {
        if self.open_turn_index(role).is_some() {
            return false;
        }
        Arc::make_mut(&mut self.turns).push(Turn::open(role));
        self.changed = true;
        true
    }

    /// Close the open turn for `role`, if any
    pub fn close_turn(&mut self, role: Role, interrupted: bool) -> bool {
        match self.open_turn_index(role) {
            Some(index) => {
                let turn = &mut Arc::make_mut(&mut self.turns)[index];
                turn.ended_at = Some(Utc::now());
                turn.interrupted = interrupted;
                self.changed = true;
                true
            }
            None => false,
        }
    }

    pub fn has_open_turn(&self, role: Role) -> bool {
        self.open_turn_index(role).is_some()
    }

    /// Attach a final transcript to the latest turn for `role`
    pub fn set_transcript(&mut self, role: Role, text: &str) {
        let Some(index) = self.turns.iter().rposition(|t| t.role == role) else {
            return;
        };
        let turn = &mut Arc::make_mut(&mut self.turns)[index];
        match &mut turn.transcript {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(text);
            }
            None => turn.transcript = Some(text.to_string()),
        }
        self.changed = true;
    }

    fn open_turn_index(&self, role: Role) -> Option<usize> {
        self.turns
            .iter()
            .rposition(|t| t.role == role && t.is_open())
    }

    /// Enter Closing with `reason`. The first reason wins; later calls are no-ops.
    pub fn begin_closing(&mut self, reason: CloseReason) {
        if matches!(self.state, LifecycleState::Closing | LifecycleState::Closed) {
            return;
        }
        debug!(call_id = %self.id, from = %self.state, reason = %reason, "session closing");
        self.state = LifecycleState::Closing;
        self.close_reason = Some(reason);
        self.changed = true;
    }

    /// Enter the terminal state, closing any turn still open
    pub fn mark_closed(&mut self) {
        if self.state != LifecycleState::Closing {
            self.begin_closing(CloseReason::Shutdown);
        }
        let now = Utc::now();
        if self.turns.iter().any(Turn::is_open) {
            for turn in Arc::make_mut(&mut self.turns).iter_mut().filter(|t| t.is_open()) {
                turn.ended_at = Some(now);
            }
        }
        self.state = LifecycleState::Closed;
        self.changed = true;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            caller_info: self.caller_info.clone(),
            state: self.state,
            close_reason: self.close_reason.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            turns: self.turns.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Publish the current snapshot to observers
    pub fn publish(&mut self) {
        self.changed = false;
        self.publisher.send_replace(self.snapshot());
    }

    /// Publish only if state, turns or metrics changed since the last publish.
    /// Activity timestamps alone do not count.
    pub fn publish_if_changed(&mut self) -> bool {
        if !self.changed {
            return false;
        }
        self.publish();
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }
}
