//! Trigger event fan-out.
//!
//! ```text
//! TriggerDispatcher → TriggerBus::publish(event) → [Consumer 1, Consumer 2, ...]
//!                                                      ↓             ↓
//!                                                  SSE stream    in-process executor
//! ```
//!
//! Delivery is fire-and-forget: each consumer owns a bounded channel, a
//! full channel drops the event for that consumer and a closed channel
//! detaches it. There is no replay for late subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::Schedule;

/// Default per-consumer channel capacity.
pub const DEFAULT_CONSUMER_BUFFER: usize = 64;

/// Payload handed to execution consumers when a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub run_id: String,
    pub schedule_id: String,
    pub title: String,
    pub prompt: String,
    pub model: String,
    pub frequency_text: String,
    pub cron: String,
    /// `null` means the host's local time.
    pub timezone: Option<String>,
}

impl TriggerEvent {
    /// Build the event for a run of `schedule`.
    pub fn for_run(run_id: impl Into<String>, schedule: &Schedule) -> Self {
        Self {
            run_id: run_id.into(),
            schedule_id: schedule.id.clone(),
            title: schedule.title.clone(),
            prompt: schedule.prompt.clone(),
            model: schedule.model.clone(),
            frequency_text: schedule.frequency_text.clone(),
            cron: schedule.cron.clone(),
            timezone: schedule.timezone.clone(),
        }
    }
}

/// Opaque consumer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

type Subscribers = RwLock<HashMap<ConsumerId, mpsc::Sender<TriggerEvent>>>;

/// Broadcast bus for trigger events.
#[derive(Debug)]
pub struct TriggerBus {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
    buffer: usize,
}

impl TriggerBus {
    /// Create a bus with `buffer` slots per consumer (minimum 1).
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a consumer. Events published from now on are delivered to it.
    pub fn subscribe(&self) -> TriggerSubscription {
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.write().insert(id, tx);
        tracing::debug!(consumer = id.0, "Trigger consumer subscribed");

        TriggerSubscription {
            id,
            receiver: rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Detach a consumer. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: ConsumerId) {
        if self.subscribers.write().remove(&id).is_some() {
            tracing::debug!(consumer = id.0, "Trigger consumer unsubscribed");
        }
    }

    /// Deliver `event` to every consumer without blocking.
    ///
    /// Returns the number of consumers that accepted the event.
    pub fn publish(&self, event: &TriggerEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            consumer = id.0,
                            run_id = %event.run_id,
                            schedule_id = %event.schedule_id,
                            "Trigger consumer is lagging; event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
                tracing::debug!(consumer = id.0, "Detached closed trigger consumer");
            }
        }
        delivered
    }

    /// Number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for TriggerBus {
    fn default() -> Self {
        Self::new(DEFAULT_CONSUMER_BUFFER)
    }
}

/// A consumer's end of the bus. Detaches itself when dropped.
#[derive(Debug)]
pub struct TriggerSubscription {
    id: ConsumerId,
    receiver: mpsc::Receiver<TriggerEvent>,
    subscribers: Weak<Subscribers>,
}

impl TriggerSubscription {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Wait for the next event. `None` once the bus is gone or this consumer
    /// was unsubscribed.
    pub async fn recv(&mut self) -> Option<TriggerEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<TriggerEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for TriggerSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.write().remove(&self.id);
        }
    }
}
