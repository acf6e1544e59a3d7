use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::SharedBackend;
use crate::engine::poll_loop::{spawn_poll_loop, PollHandle, RequestSequencer};
use crate::engine::registry::RegistryHandle;
use crate::error::AppError;
use crate::models::order::{OrderId, OrderStatus};
use crate::models::tracking::TrackingSnapshot;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusChange {
    pub order_id: OrderId,
    pub previous: OrderStatus,
    pub current: OrderStatus,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

/// The current snapshot plus when it was fetched, for locally decaying the
/// cancellation countdown between polls.
#[derive(Debug, Clone)]
pub struct TrackedSnapshot {
    pub snapshot: Arc<TrackingSnapshot>,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

impl TrackedSnapshot {
    /// Counts down from the value fetched; never extrapolated past the next poll,
    /// which replaces this snapshot.
    pub fn cancellation_seconds_remaining(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.fetched_at).as_secs();
        self.snapshot
            .cancellation_time_remaining_seconds
            .saturating_sub(elapsed)
    }

    pub fn can_cancel_now(&self, now: Instant) -> bool {
        self.snapshot.can_cancel && self.cancellation_seconds_remaining(now) > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Applied(Option<StatusChange>),
    /// A newer response already landed.
    Stale,
    /// The server reported an earlier pipeline stage than already observed.
    Regressed {
        observed: OrderStatus,
        reported: OrderStatus,
    },
    /// Tracking stopped or moved to another order while the request was out.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    order_id: OrderId,
    generation: u64,
}

type PollFuture = Shared<BoxFuture<'static, Result<PollOutcome, AppError>>>;

struct InFlight {
    target: Target,
    seq: u64,
    future: PollFuture,
}

struct PollerInner {
    backend: SharedBackend,
    metrics: Metrics,
    registry: Option<RegistryHandle>,
    snapshot_tx: watch::Sender<Option<TrackedSnapshot>>,
    events_tx: broadcast::Sender<StatusChange>,
    sequencer: RequestSequencer,
    generations: AtomicU64,
    target: Mutex<Option<Target>>,
    in_flight: Mutex<Option<InFlight>>,
    poll_loop: Mutex<Option<PollHandle>>,
    /// Last accepted snapshot per order for the lifetime of the poller, so a
    /// status regression is caught even after tracking moved away and back.
    seen: Mutex<HashMap<OrderId, TrackedSnapshot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls the tracking snapshot of one order at a time and publishes it.
#[derive(Clone)]
pub struct StatusPoller {
    inner: Arc<PollerInner>,
}

impl StatusPoller {
    pub fn new(
        backend: SharedBackend,
        metrics: Metrics,
        registry: Option<RegistryHandle>,
        event_buffer_size: usize,
    ) -> Self {
        let (snapshot_tx, _unused_rx) = watch::channel(None);
        let (events_tx, _unused_events) = broadcast::channel(event_buffer_size.max(1));

        Self {
            inner: Arc::new(PollerInner {
                backend,
                metrics,
                registry,
                snapshot_tx,
                events_tx,
                sequencer: RequestSequencer::default(),
                generations: AtomicU64::new(0),
                target: Mutex::new(None),
                in_flight: Mutex::new(None),
                poll_loop: Mutex::new(None),
                seen: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn current(&self) -> Option<TrackedSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TrackedSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.events_tx.subscribe()
    }

    pub fn tracked_order(&self) -> Option<OrderId> {
        lock(&self.inner.target).map(|target| target.order_id)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.poll_loop)
            .as_ref()
            .is_some_and(PollHandle::is_running)
    }

    /// Starts polling `order_id` every `period`, replacing any previous loop.
    /// Calling it again for the order already being polled is a no-op.
    /// Returning to an order seen earlier republishes its last snapshot.
    pub fn track(&self, order_id: OrderId, period: Duration) {
        if self.tracked_order() == Some(order_id) && self.is_running() {
            return;
        }
        self.stop();

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut target = lock(&self.inner.target);
            *target = Some(Target {
                order_id,
                generation,
            });
        }

        let keeps_snapshot = self
            .current()
            .is_some_and(|tracked| tracked.snapshot.order_id == order_id);
        if !keeps_snapshot {
            let restored = lock(&self.inner.seen).get(&order_id).cloned();
            self.inner.snapshot_tx.send_replace(restored);
        }

        let poller = self.clone();
        let handle = spawn_poll_loop("status", period, self.inner.metrics.clone(), move |_| {
            let poller = poller.clone();
            async move { poller.poll().await.map(|_| ()) }
        });
        *lock(&self.inner.poll_loop) = Some(handle);

        info!(order_id, period_secs = period.as_secs(), "status polling started");
    }

    /// Stops the loop. Responses still in flight are discarded when they land.
    pub fn stop(&self) {
        let previous = lock(&self.inner.target).take();
        if let Some(mut handle) = lock(&self.inner.poll_loop).take() {
            handle.stop();
        }
        lock(&self.inner.in_flight).take();

        if let Some(target) = previous {
            info!(order_id = target.order_id, "status polling stopped");
        }
    }

    /// Fetches a fresh snapshot for the tracked order. A poll already in flight
    /// for the same target is joined rather than duplicated.
    pub async fn poll(&self) -> Result<PollOutcome, AppError> {
        let target = (*lock(&self.inner.target))
            .ok_or_else(|| AppError::BadRequest("no order is being tracked".to_string()))?;

        let future = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.as_ref() {
                Some(running) if running.target == target => {
                    debug!(order_id = target.order_id, seq = running.seq, "joining in-flight poll");
                    running.future.clone()
                }
                _ => {
                    let seq = self.inner.sequencer.next();
                    let future = fetch_and_apply(self.inner.clone(), target, seq)
                        .boxed()
                        .shared();
                    *in_flight = Some(InFlight {
                        target,
                        seq,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }
}

async fn fetch_and_apply(
    inner: Arc<PollerInner>,
    target: Target,
    seq: u64,
) -> Result<PollOutcome, AppError> {
    let result = inner.backend.fetch_tracking(target.order_id).await;

    {
        let mut in_flight = lock(&inner.in_flight);
        if in_flight.as_ref().is_some_and(|running| running.seq == seq) {
            in_flight.take();
        }
    }

    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(order_id = target.order_id, error = %err, "tracking fetch failed; keeping last snapshot");
            return Err(err);
        }
    };

    inner.apply(target, seq, snapshot)
}

impl PollerInner {
    fn apply(
        &self,
        target: Target,
        seq: u64,
        snapshot: TrackingSnapshot,
    ) -> Result<PollOutcome, AppError> {
        // Held while publishing so `stop` cannot interleave with a late result.
        let current_target = lock(&self.target);
        if *current_target != Some(target) {
            debug!(order_id = target.order_id, seq, "discarding poll for detached target");
            return Ok(PollOutcome::Detached);
        }

        if !self.sequencer.try_apply(seq) {
            self.metrics
                .stale_responses_total
                .with_label_values(&["status"])
                .inc();
            debug!(order_id = target.order_id, seq, "discarding stale snapshot");
            return Ok(PollOutcome::Stale);
        }

        let mut seen = lock(&self.seen);
        let observed = seen
            .get(&target.order_id)
            .map(|tracked| tracked.snapshot.status);

        if let Some(observed) = observed {
            if !observed.can_advance_to(snapshot.status) {
                warn!(
                    order_id = target.order_id,
                    observed = ?observed,
                    reported = ?snapshot.status,
                    "status regression reported; keeping last snapshot"
                );
                return Ok(PollOutcome::Regressed {
                    observed,
                    reported: snapshot.status,
                });
            }
        }

        let change = observed
            .filter(|previous| *previous != snapshot.status)
            .map(|previous| StatusChange {
                order_id: target.order_id,
                previous,
                current: snapshot.status,
                message: snapshot.status.notification_message().to_string(),
                observed_at: Utc::now(),
            });

        if let Some(change) = &change {
            self.metrics.status_changes_total.inc();
            info!(
                order_id = change.order_id,
                previous = ?change.previous,
                current = ?change.current,
                notification = %change.message,
                "order status changed"
            );
            let _ = self.events_tx.send(change.clone());
            if let Some(registry) = &self.registry {
                registry.request_refresh();
            }
        }

        let tracked = TrackedSnapshot {
            snapshot: Arc::new(snapshot),
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        };
        seen.insert(target.order_id, tracked.clone());
        self.snapshot_tx.send_replace(Some(tracked));

        Ok(PollOutcome::Applied(change))
    }
}
