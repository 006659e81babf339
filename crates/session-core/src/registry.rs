//! Session registry
//!
//! The only state shared between calls: a concurrent map from call id to a
//! handle on the coordinator that owns the session.

use crate::errors::{BridgeError, Result};
use crate::session::{CallSession, CallerInfo, LifecycleState, SessionSnapshot};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Requests from outside the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Hang up from the bridge side
    Hangup,
    /// Call control reported the call ended
    CallEnded,
}

/// Cheap, cloneable view of a live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    call_id: String,
    instance: u64,
    snapshot: watch::Receiver<SessionSnapshot>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Latest snapshot published by the owning coordinator
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.snapshot.borrow().state
    }

    /// Receiver notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Ask the coordinator to end the call. Returns false if it has already stopped.
    pub fn hangup(&self) -> bool {
        self.commands.send(SessionCommand::Hangup).is_ok()
    }

    pub fn call_ended(&self) -> bool {
        self.commands.send(SessionCommand::CallEnded).is_ok()
    }
}

/// A freshly registered session and what its coordinator needs to own
#[derive(Debug)]
pub struct NewSession {
    pub session: CallSession,
    pub commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub guard: RegistryGuard,
}

/// Removes the registry entry when dropped, so every exit path of a
/// coordinator unregisters its session
#[derive(Debug)]
pub struct RegistryGuard {
    registry: Arc<SessionRegistry>,
    call_id: String,
    instance: u64,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        let instance = self.instance;
        if self
            .registry
            .sessions
            .remove_if(&self.call_id, |_, handle| handle.instance == instance)
            .is_some()
        {
            self.registry.total_removed.fetch_add(1, Ordering::Relaxed);
            debug!(call_id = %self.call_id, "session unregistered");
        }
    }
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active: usize,
    pub by_state: HashMap<LifecycleState, usize>,
    pub total_created: u64,
    pub total_removed: u64,
}

/// Concurrent map of live sessions; in memory only
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    next_instance: AtomicU64,
    total_created: AtomicU64,
    total_removed: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `call_id`.
    ///
    /// Fails with [`BridgeError::DuplicateSession`] if one is already registered.
    pub fn create(self: &Arc<Self>, call_id: &str, caller_info: CallerInfo) -> Result<NewSession> {
        match self.sessions.entry(call_id.to_string()) {
            Entry::Occupied(_) => Err(BridgeError::duplicate(call_id)),
            Entry::Vacant(slot) => {
                let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
                let session = CallSession::new(call_id, caller_info);
                let (commands_tx, commands_rx) = mpsc::unbounded_channel();
                slot.insert(SessionHandle {
                    call_id: call_id.to_string(),
                    instance,
                    snapshot: session.subscribe(),
                    commands: commands_tx,
                });
                self.total_created.fetch_add(1, Ordering::Relaxed);
                info!(call_id = %call_id, "session registered");
                Ok(NewSession {
                    session,
                    commands: commands_rx,
                    guard: RegistryGuard {
                        registry: Arc::clone(self),
                        call_id: call_id.to_string(),
                        instance,
                    },
                })
            }
        }
    }

    pub fn get(&self, call_id: &str) -> Result<SessionHandle> {
        self.sessions
            .get(call_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BridgeError::not_found(call_id))
    }

    /// Drop the entry for `call_id`. The coordinator keeps running until it
    /// notices its peers are gone; use [`SessionHandle::hangup`] to end a call.
    pub fn remove(&self, call_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.remove(call_id).map(|(_, handle)| handle);
        if removed.is_some() {
            self.total_removed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.sessions.contains_key(call_id)
    }

    /// Snapshots of every live session
    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_state = HashMap::new();
        for entry in self.sessions.iter() {
            *by_state.entry(entry.value().state()).or_insert(0) += 1;
        }
        RegistryStats {
            active: self.sessions.len(),
            by_state,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
        }
    }
}
