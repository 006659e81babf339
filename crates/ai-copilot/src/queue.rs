//! Bounded outbound queue between a stream handle and its connection task
//!
//! Audio is lossy under back-pressure: when the buffered audio reaches
//! capacity, the oldest unsent audio frame is discarded and counted. Control
//! messages are never dropped and keep their position relative to audio.

use callbridge_audio_core::AudioFrame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// Item waiting to be written to the endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(AudioFrame),
    ActivityStart,
    ActivityEnd,
    CancelResponse,
}

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest buffered audio frame
    DroppedOldest,
    /// The queue is closed; the item was discarded
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Outbound>,
    audio_len: usize,
    closed: bool,
}

/// Single-consumer queue with drop-oldest audio semantics
#[derive(Debug)]
pub struct SendQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SendQueue {
    /// `capacity` bounds buffered audio frames; zero is treated as one
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without waiting
    pub fn push(&self, item: Outbound) -> PushOutcome {
        let mut outcome = PushOutcome::Queued;
        {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if matches!(item, Outbound::Audio(_)) {
                if state.audio_len >= self.capacity {
                    if let Some(pos) = state
                        .items
                        .iter()
                        .position(|queued| matches!(queued, Outbound::Audio(_)))
                    {
                        state.items.remove(pos);
                        state.audio_len -= 1;
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        outcome = PushOutcome::DroppedOldest;
                    }
                }
                state.audio_len += 1;
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next item. Returns `None` once the queue is closed; items
    /// still buffered at that point are abandoned.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    if matches!(item, Outbound::Audio(_)) {
                        state.audio_len -= 1;
                    }
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Remove the next item without waiting
    pub fn try_pop(&self) -> Option<Outbound> {
        let mut state = self.state.lock();
        let item = state.items.pop_front()?;
        if matches!(item, Outbound::Audio(_)) {
            state.audio_len -= 1;
        }
        Some(item)
    }

    /// Close the queue and wake the consumer. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let was_open = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        self.notify.notify_one();
        was_open
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Audio frames discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
