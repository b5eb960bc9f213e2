//! Reliable delivery of events to an external sink.
//!
//! The dispatcher owns the only queue shared between the read path and the
//! delivery path. Intake is a bounded channel: when the outstanding queue is
//! at capacity the dispatcher stops receiving, the channel fills, and
//! upstream `enqueue` calls suspend until capacity recovers. Delivery is
//! strictly head-of-line, so enqueue order (and with it per-file line order)
//! is preserved through retries.

use crate::event::Event;
use std::collections::VecDeque;
use std::future::Future;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, trace, warn};
use vigil_types::DispatchConfig;

/// Placeholder deadline while the queue is empty; the timer arm is
/// disabled then and only intake or shutdown can wake the loop.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Failure classification returned by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink or the path to it is temporarily unavailable (transport
    /// errors, rate limiting, 5xx-class responses). Worth retrying.
    #[error("transient sink failure: {0}")]
    Transient(String),

    /// The sink rejected the event itself. Retrying cannot help.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

/// Downstream consumer contract: submit one event, get success or a
/// classified failure. Implementations are expected to bound their own
/// submission time; the dispatcher does not impose one.
pub trait EventSink: Send + Sync + 'static {
    fn submit(&self, event: &Event) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Delivery bookkeeping for one queued event.
#[derive(Debug)]
struct DeliveryState {
    attempts: u32,
    next_attempt_at: Instant,
    enqueued_at: Instant,
}

#[derive(Debug)]
struct Delivery {
    event: Event,
    state: DeliveryState,
}

/// Producer-side handle. Cheap to clone.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Event>,
}

impl DispatchHandle {
    /// Hand an event to the dispatcher, suspending while it is at capacity.
    /// Returns false if the dispatcher has shut down.
    pub async fn enqueue(&self, event: Event) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Delivers events to the sink with retry, backoff, and bounded buffering.
pub struct Dispatcher<S> {
    sink: S,
    cfg: DispatchConfig,
    rx: mpsc::Receiver<Event>,
    queue: VecDeque<Delivery>,
    delivered: u64,
    dropped: u64,
}

impl<S: EventSink> Dispatcher<S> {
    pub fn new(sink: S, cfg: DispatchConfig) -> (DispatchHandle, Self) {
        let (tx, rx) = mpsc::channel(cfg.intake_capacity.max(1));
        let dispatcher = Self {
            sink,
            cfg,
            rx,
            queue: VecDeque::new(),
            delivered: 0,
            dropped: 0,
        };
        (DispatchHandle { tx }, dispatcher)
    }

    /// Run until all producers drop their handles or the shutdown flag is
    /// raised, then drain the queue best-effort within the configured
    /// timeout.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.drop_expired();

            let head_due = self.queue.front().map(|d| d.state.next_attempt_at);
            let wake = head_due.unwrap_or_else(|| Instant::now() + IDLE_TICK);

            tokio::select! {
                maybe = self.rx.recv(), if self.queue.len() < self.cfg.queue_capacity => {
                    match maybe {
                        Some(event) => self.admit(event),
                        None => break,
                    }
                }
                _ = sleep_until(wake), if head_due.is_some() => {
                    self.attempt_head().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!(
            delivered = self.delivered,
            dropped = self.dropped,
            "dispatcher stopped"
        );
    }

    fn admit(&mut self, event: Event) {
        let now = Instant::now();
        self.queue.push_back(Delivery {
            event,
            state: DeliveryState {
                attempts: 0,
                next_attempt_at: now,
                enqueued_at: now,
            },
        });
    }

    /// Attempt delivery of the queue head once.
    async fn attempt_head(&mut self) {
        let (outcome, attempts) = match self.queue.front_mut() {
            Some(delivery) => {
                delivery.state.attempts += 1;
                let attempts = delivery.state.attempts;
                (self.sink.submit(&delivery.event).await, attempts)
            }
            None => return,
        };

        match outcome {
            Ok(()) => {
                self.queue.pop_front();
                self.delivered += 1;
                trace!(outstanding = self.queue.len(), "event delivered");
            }
            Err(SinkError::Permanent(reason)) => {
                warn!(%reason, "sink rejected event, dropping");
                self.queue.pop_front();
                self.dropped += 1;
            }
            Err(SinkError::Transient(reason)) => {
                if attempts >= self.cfg.retry.max_attempts {
                    warn!(
                        %reason,
                        attempts,
                        "delivery failed permanently after max attempts, dropping"
                    );
                    self.queue.pop_front();
                    self.dropped += 1;
                } else {
                    let delay = self.backoff_after(attempts);
                    debug!(%reason, attempt = attempts, ?delay, "delivery failed, retry scheduled");
                    if let Some(delivery) = self.queue.front_mut() {
                        delivery.state.next_attempt_at = Instant::now() + delay;
                    }
                }
            }
        }
    }

    /// Backoff after the given number of attempts: doubles from the initial
    /// value, capped at the maximum.
    fn backoff_after(&self, attempts: u32) -> Duration {
        let initial = self.cfg.retry.initial_backoff_ms.max(1);
        let max = self.cfg.retry.max_backoff_ms.max(initial);
        let factor = 1u64 << attempts.saturating_sub(1).min(20);
        Duration::from_millis(initial.saturating_mul(factor).min(max))
    }

    /// Drop queued events older than the configured maximum age, oldest
    /// first, and record the drop as a system event.
    fn drop_expired(&mut self) {
        let Some(age_secs) = self.cfg.max_event_age_secs else {
            return;
        };
        let Some(cutoff) = Instant::now().checked_sub(Duration::from_secs(age_secs)) else {
            return;
        };

        let mut expired = 0u64;
        while matches!(self.queue.front(), Some(d) if d.state.enqueued_at < cutoff) {
            self.queue.pop_front();
            expired += 1;
        }
        if expired > 0 {
            self.dropped += expired;
            warn!(expired, age_secs, "dropped queued events past maximum age");
            self.admit(Event::system(format!(
                "dropped {expired} queued events older than {age_secs}s"
            )));
        }
    }

    /// Best-effort flush at shutdown, bounded by the configured timeout.
    async fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if self.queue.len() >= self.cfg.queue_capacity {
                self.dropped += 1;
                continue;
            }
            self.admit(event);
        }

        if self.queue.is_empty() {
            return;
        }

        let limit = Duration::from_secs(self.cfg.shutdown_timeout_secs);
        if timeout(limit, self.flush_queue()).await.is_err() {
            warn!(
                remaining = self.queue.len(),
                "shutdown drain timed out, undelivered events lost"
            );
            self.dropped += self.queue.len() as u64;
            self.queue.clear();
        }
    }

    async fn flush_queue(&mut self) {
        while !self.queue.is_empty() {
            let before = self.queue.len();
            self.attempt_head().await;
            if self.queue.len() == before {
                // Head failed transiently; don't hammer a struggling sink.
                sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
