//! Durable, capacity-bounded event queue
//!
//! Buffers events until the transport confirms delivery, survives process
//! restarts through the key-value store, and never blocks the thread that
//! records an event. One mutex guards the entry collection and both status
//! flags; persistence writes happen outside the lock on a snapshot.
//!
//! Flush cycles are single-flight: the periodic driver, enqueue-triggered
//! flushes, and manual [`DurableQueue::flush`] calls all share the
//! `is_processing` guard, so at most one cycle runs per queue instance.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::store::{KeyValueStore, Scope};
use crate::types::{EventPayload, QueuedEvent};

use super::transport::{FailureClass, Transport};

/// Key under which the serialized queue lives in the general scope
pub const QUEUE_KEY: &str = "pipeline.queue";

/// Consistent point-in-time view of the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Events currently queued
    pub size: usize,
    /// Whether a flush cycle is running
    pub is_processing: bool,
    /// Last reachability status reported by the host
    pub is_online: bool,
    /// Age of the oldest queued event in seconds, `None` when empty
    pub oldest_event_age_secs: Option<u64>,
    /// Events evicted because the queue was full
    pub dropped_capacity: u64,
    /// Events dropped for terminal failures or an exhausted retry budget
    pub dropped_terminal: u64,
}

/// Everything the queue mutex guards
#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueuedEvent>,
    is_processing: bool,
    is_online: bool,
    dropped_capacity: u64,
    dropped_terminal: u64,
}

/// Clears `is_processing` when the owning flush cycle ends, including when
/// its future is dropped mid-await by cancellation.
struct ProcessingGuard<'a> {
    state: &'a Mutex<QueueState>,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().unwrap().is_processing = false;
    }
}

/// What one delivery attempt means for the queued entry
enum Outcome {
    Delivered,
    Retryable,
    Terminal,
    RateLimited,
}

/// The persistent delivery queue
///
/// Cheap to clone through its internal `Arc`; every producer and the
/// background driver share the same state.
pub struct DurableQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: PipelineConfig,
    store: Arc<KeyValueStore>,
    transport: Arc<dyn Transport>,
    state: Mutex<QueueState>,
    cancel: CancellationToken,
}

impl DurableQueue {
    /// Create a queue, reloading any persisted entries, and start the
    /// periodic flush driver.
    ///
    /// Must be called from within a tokio runtime; the driver is spawned at
    /// construction and runs until [`destroy`](Self::destroy).
    pub fn new(
        config: PipelineConfig,
        store: Arc<KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let entries = load_persisted(&store);
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Reloaded persisted queue");
        }

        let inner = Arc::new(QueueInner {
            config,
            store,
            transport,
            state: Mutex::new(QueueState {
                entries,
                is_online: true,
                ..Default::default()
            }),
            cancel: CancellationToken::new(),
        });

        spawn_driver(Arc::clone(&inner));

        Ok(Self { inner })
    }

    /// Append one event, evicting the oldest entry first when at capacity.
    ///
    /// Persists the updated collection before returning. If the queue is
    /// online and idle, a flush is scheduled but never awaited; the caller
    /// does not touch the network.
    pub fn enqueue(&self, payload: EventPayload) {
        let (snapshot, should_flush) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.entries.len() >= self.inner.config.max_queue_size {
                if let Some(evicted) = state.entries.pop_front() {
                    state.dropped_capacity += 1;
                    tracing::warn!(
                        event_id = %evicted.payload.event_id,
                        event = %evicted.payload.name,
                        "Queue at capacity, evicting oldest event"
                    );
                }
            }
            state.entries.push_back(QueuedEvent::new(payload));
            (
                state.entries.clone(),
                state.is_online && !state.is_processing,
            )
        };

        self.inner.persist(&snapshot);

        if should_flush {
            self.spawn_flush();
        }
    }

    /// Start a flush cycle in the background, tied to the queue's
    /// cancellation token so [`destroy`](Self::destroy) interrupts it.
    fn spawn_flush(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.run_flush() => {}
                _ = inner.cancel.cancelled() => {}
            }
        });
    }

    /// Run one flush cycle now, even while offline.
    ///
    /// No-op when the queue is empty or a cycle is already in flight.
    pub async fn flush(&self) {
        self.inner.run_flush().await;
    }

    /// Record the host's reachability status.
    ///
    /// An offline-to-online transition with queued events and no cycle in
    /// flight schedules a flush.
    pub fn set_online_status(&self, online: bool) {
        let should_flush = {
            let mut state = self.inner.state.lock().unwrap();
            let was_online = state.is_online;
            state.is_online = online;
            online && !was_online && !state.entries.is_empty() && !state.is_processing
        };

        if should_flush {
            tracing::debug!("Back online with queued events, scheduling flush");
            self.spawn_flush();
        }
    }

    /// Snapshot of the queue's current state, without side effects
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock().unwrap();
        let now = Utc::now().timestamp();
        QueueStats {
            size: state.entries.len(),
            is_processing: state.is_processing,
            is_online: state.is_online,
            oldest_event_age_secs: state.entries.front().map(|e| e.age_secs(now)),
            dropped_capacity: state.dropped_capacity,
            dropped_terminal: state.dropped_terminal,
        }
    }

    /// Empty the queue and remove its persisted representation.
    ///
    /// Used on user/session reset.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.entries.clear();
        }
        if let Err(e) = self.inner.store.delete(Scope::General, QUEUE_KEY) {
            tracing::error!(error = %e, "Failed to remove persisted queue");
        }
    }

    /// Stop the periodic driver and write a final snapshot.
    ///
    /// The timer never fires again after this returns, and any flush task
    /// the queue started is interrupted at its next await point; unconfirmed
    /// entries stay queued for the next process start.
    pub fn destroy(&self) {
        self.inner.cancel.cancel();
        let snapshot = {
            let state = self.inner.state.lock().unwrap();
            state.entries.clone()
        };
        self.inner.persist(&snapshot);
        tracing::info!(remaining = snapshot.len(), "Queue destroyed");
    }
}

impl QueueInner {
    /// One single-flight flush cycle.
    ///
    /// Takes up to `batch_size` oldest entries without removing them,
    /// attempts them in enqueue order, then applies all removals and retry
    /// increments in one pass before a single persistence write.
    async fn run_flush(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let batch: Vec<QueuedEvent> = {
            let mut state = self.state.lock().unwrap();
            if state.is_processing || state.entries.is_empty() {
                return;
            }
            state.is_processing = true;
            state
                .entries
                .iter()
                .take(self.config.batch_size)
                .cloned()
                .collect()
        };

        // Released on every exit path, including a dropped future
        let _processing = ProcessingGuard { state: &self.state };

        tracing::debug!(batch = batch.len(), "Flush cycle started");

        let mut outcomes: Vec<(String, Outcome)> = Vec::with_capacity(batch.len());
        for entry in &batch {
            let result = self.transport.send_event(&entry.payload).await;
            let outcome = if result.success {
                tracing::debug!(event_id = %entry.payload.event_id, "Event delivered");
                Outcome::Delivered
            } else {
                match result.failure {
                    Some(class) if class.is_retryable() => Outcome::Retryable,
                    Some(FailureClass::RateLimited) => {
                        // Stays queued with its counter untouched; the next
                        // cycle gets a fresh window
                        tracing::debug!(
                            event_id = %entry.payload.event_id,
                            "Rate limited, event stays queued"
                        );
                        Outcome::RateLimited
                    }
                    _ => {
                        tracing::warn!(
                            event_id = %entry.payload.event_id,
                            status = ?result.status,
                            failure = ?result.failure,
                            "Terminal delivery failure, dropping event"
                        );
                        Outcome::Terminal
                    }
                }
            };
            outcomes.push((entry.payload.event_id.clone(), outcome));
        }

        let snapshot = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let mut remove: Vec<&str> = Vec::new();

            for (event_id, outcome) in &outcomes {
                match outcome {
                    Outcome::Delivered => remove.push(event_id.as_str()),
                    Outcome::Terminal => {
                        state.dropped_terminal += 1;
                        remove.push(event_id.as_str());
                    }
                    Outcome::Retryable => {
                        // The entry may have been evicted by a concurrent
                        // enqueue; a missing id is not an error
                        if let Some(entry) = state
                            .entries
                            .iter_mut()
                            .find(|e| e.payload.event_id == *event_id)
                        {
                            entry.retry_count += 1;
                            if entry.retry_count >= self.config.max_retry_count {
                                tracing::warn!(
                                    event_id = %event_id,
                                    retry_count = entry.retry_count,
                                    "Retry budget exhausted, dropping event"
                                );
                                state.dropped_terminal += 1;
                                remove.push(event_id.as_str());
                            }
                        }
                    }
                    Outcome::RateLimited => {}
                }
            }

            state
                .entries
                .retain(|e| !remove.contains(&e.payload.event_id.as_str()));
            state.entries.clone()
        };

        self.persist(&snapshot);
        tracing::debug!(remaining = snapshot.len(), "Flush cycle finished");
    }

    /// Write one consistent snapshot; failures are logged, never raised
    fn persist(&self, entries: &VecDeque<QueuedEvent>) {
        match serde_json::to_vec(entries) {
            Ok(bytes) => {
                if let Err(e) = self.store.set_blob(Scope::General, QUEUE_KEY, &bytes) {
                    tracing::error!(error = %e, "Failed to persist queue");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize queue"),
        }
    }
}

/// Reload the persisted collection; a corrupt or missing blob starts empty
fn load_persisted(store: &KeyValueStore) -> VecDeque<QueuedEvent> {
    match store.get_blob(Scope::General, QUEUE_KEY) {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt persisted queue, starting empty");
                VecDeque::new()
            }
        },
        Ok(None) => VecDeque::new(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read persisted queue, starting empty");
            VecDeque::new()
        }
    }
}

/// Periodic flush driver.
///
/// Ticks at the configured interval, flushing only when online and
/// non-empty. Cancellation stops the timer and interrupts a cycle's waits;
/// unconfirmed entries stay queued.
fn spawn_driver(inner: Arc<QueueInner>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.config.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately; skip the zeroth tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ready = {
                        let state = inner.state.lock().unwrap();
                        state.is_online && !state.entries.is_empty()
                    };
                    if ready {
                        tokio::select! {
                            _ = inner.run_flush() => {}
                            _ = inner.cancel.cancelled() => break,
                        }
                    }
                }
                _ = inner.cancel.cancelled() => break,
            }
        }

        tracing::debug!("Flush driver stopped");
    });
}
