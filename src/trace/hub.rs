// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Update history and subscriber registry.
//!
//! The hub keeps a bounded history of every published [`TraceUpdate`] and
//! fans each update out to the bounded queues of live subscribers. Delivery
//! never blocks: a full queue is handled by the configured
//! [`OverflowPolicy`]. The hub has its own lock, so publishing is independent
//! of node tree mutation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::update::TraceUpdate;

/// Default number of updates retained in history.
pub const DEFAULT_HISTORY_LIMIT: usize = 4096;

/// Default capacity of each subscriber queue.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Skip the event for that subscriber and count it as dropped.
    #[default]
    DropEvent,
    /// Remove the subscriber; its receiver ends after draining.
    Disconnect,
}

/// Hub sizing and overflow behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub history_limit: usize,
    pub subscriber_buffer: usize,
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// A live feed of updates for one subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<TraceUpdate>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next update. Returns `None` once the subscriber has been
    /// removed from the hub and the queue is drained.
    pub async fn recv(&mut self) -> Option<TraceUpdate> {
        self.rx.recv().await
    }

    /// Take the next update if one is already queued.
    pub fn try_recv(&mut self) -> Option<TraceUpdate> {
        self.rx.try_recv().ok()
    }

    /// Take every update currently queued.
    pub fn drain(&mut self) -> Vec<TraceUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = self.rx.try_recv() {
            out.push(update);
        }
        out
    }

    pub fn into_receiver(self) -> mpsc::Receiver<TraceUpdate> {
        self.rx
    }
}

struct SubscriberSlot {
    tx: mpsc::Sender<TraceUpdate>,
    dropped: u64,
}

#[derive(Default)]
struct HubState {
    history: VecDeque<TraceUpdate>,
    subscribers: HashMap<String, SubscriberSlot>,
}

/// Bounded update history plus live subscriber queues.
pub struct UpdateHub {
    config: HubConfig,
    state: Mutex<HubState>,
}

impl UpdateHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config: HubConfig {
                history_limit: config.history_limit.max(1),
                subscriber_buffer: config.subscriber_buffer.max(1),
                overflow: config.overflow,
            },
            state: Mutex::new(HubState::default()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere does not invalidate it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an update in history and deliver it to every subscriber.
    pub fn publish(&self, update: TraceUpdate) {
        let mut state = self.lock();

        while state.history.len() >= self.config.history_limit {
            state.history.pop_front();
        }
        state.history.push_back(update.clone());

        trace!(
            update_type = %update.update_type,
            trace_id = %update.trace_id,
            subscribers = state.subscribers.len(),
            "publishing trace update"
        );

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_event_published();

        let mut removed = Vec::new();
        for (id, slot) in state.subscribers.iter_mut() {
            match slot.tx.try_send(update.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match self.config.overflow {
                    OverflowPolicy::DropEvent => {
                        slot.dropped += 1;
                        warn!(
                            subscriber = %id,
                            dropped = slot.dropped,
                            "subscriber queue full, dropping trace update"
                        );
                        #[cfg(feature = "telemetry")]
                        GLOBAL_METRICS.record_event_dropped();
                    }
                    OverflowPolicy::Disconnect => {
                        warn!(subscriber = %id, "subscriber queue full, disconnecting");
                        removed.push(id.clone());
                        #[cfg(feature = "telemetry")]
                        GLOBAL_METRICS.record_subscriber_disconnected();
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "subscriber receiver dropped, removing");
                    removed.push(id.clone());
                }
            }
        }

        for id in removed {
            state.subscribers.remove(&id);
        }
    }

    /// Register a subscriber. An existing subscriber with the same ID is
    /// replaced and its old receiver ends.
    ///
    /// History is not replayed; see [`UpdateHub::subscribe_with_history`].
    pub fn subscribe(&self, id: impl Into<String>) -> Subscription {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);
        let mut state = self.lock();
        if state
            .subscribers
            .insert(id.clone(), SubscriberSlot { tx, dropped: 0 })
            .is_some()
        {
            debug!(subscriber = %id, "replaced existing subscriber");
        }
        Subscription { id, rx }
    }

    /// Register a subscriber under a random ID.
    pub fn subscribe_anonymous(&self) -> Subscription {
        self.subscribe(uuid::Uuid::new_v4().to_string())
    }

    /// Snapshot history and register a subscriber in one step, so every
    /// update is seen exactly once across the snapshot and the live feed.
    pub fn subscribe_with_history(
        &self,
        id: impl Into<String>,
    ) -> (Vec<TraceUpdate>, Subscription) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);
        let mut state = self.lock();
        let history = state.history.iter().cloned().collect();
        state
            .subscribers
            .insert(id.clone(), SubscriberSlot { tx, dropped: 0 });
        (history, Subscription { id, rx })
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.lock().subscribers.remove(id).is_some()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.lock().subscribers.contains_key(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Number of updates dropped for a subscriber under [`OverflowPolicy::DropEvent`].
    pub fn dropped_events(&self, id: &str) -> Option<u64> {
        self.lock().subscribers.get(id).map(|slot| slot.dropped)
    }

    /// Copy of the retained history, oldest first.
    pub fn history(&self) -> Vec<TraceUpdate> {
        self.lock().history.iter().cloned().collect()
    }

    /// Retained updates with `timestamp >= since`; `since = 0` returns all.
    pub fn history_since(&self, since: i64) -> Vec<TraceUpdate> {
        self.lock()
            .history
            .iter()
            .filter(|u| u.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Remove every subscriber; their receivers end after draining.
    pub fn close_all(&self) {
        self.lock().subscribers.clear();
    }
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
