use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::observability::metrics::Metrics;

/// Stop handle for a polling task. Stopping (or dropping the handle) cancels the
/// token before aborting the task, so a tick already in flight never applies
/// its result.
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .task
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        if !self.token.is_cancelled() {
            debug!(poller = self.name, "poll loop stopped");
        }
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs `tick` immediately and then every `period` until cancelled. Errors are
/// logged and counted; the next tick retries.
pub fn spawn_poll_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    metrics: Metrics,
    mut tick: F,
) -> PollHandle
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let token = CancellationToken::new();
    let loop_token = token.clone();

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                outcome = tick(loop_token.clone()) => outcome,
            };
            let elapsed = start.elapsed().as_secs_f64();

            metrics
                .poll_latency_seconds
                .with_label_values(&[name])
                .observe(elapsed);

            match outcome {
                Ok(()) => metrics.polls_total.with_label_values(&[name, "success"]).inc(),
                Err(err) => {
                    metrics.polls_total.with_label_values(&[name, "error"]).inc();
                    warn!(poller = name, error = %err, "poll tick failed; retrying next tick");
                }
            }
        }
    });

    debug!(poller = name, period_ms = period.as_millis() as u64, "poll loop started");

    PollHandle {
        name,
        token,
        task: Some(task),
    }
}

/// Monotonic request numbering so a slower, older response never overwrites a
/// newer one that already landed.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl RequestSequencer {
    pub fn next(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Marks `seq` applied. Returns `false` if a newer request already applied.
    pub fn try_apply(&self, seq: u64) -> bool {
        let mut current = self.applied.load(Ordering::SeqCst);
        loop {
            if seq <= current {
                return false;
            }
            match self
                .applied
                .compare_exchange(current, seq, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn last_applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}
