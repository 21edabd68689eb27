//! Asynchronous delivery of graph changes to the durable sink.
//!
//! `record_entities` never waits on the sink. Batches go onto a bounded
//! [`OutboundQueue`]; a worker task delivers them under a per-attempt
//! timeout and a circuit breaker. A failed attempt is rescheduled onto the
//! queue after a backoff delay instead of being retried in place.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::outbox::OutboundQueue;
use crate::retry::RetryPolicy;
use crate::sink::{DurableGraphSink, PersistBatch, SinkError};
use crate::snapshot::GraphRegistry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings for the persistence worker.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Maximum queued batches before the oldest is dropped
    pub queue_capacity: usize,
    /// Backoff schedule for failed attempts
    pub retry: RetryPolicy,
    /// Upper bound on one sink call
    pub attempt_timeout: Duration,
    /// Breaker guarding the sink
    pub breaker: CircuitBreakerConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(2),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Point-in-time persistence counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    /// Batches handed to the queue
    pub queued: u64,
    /// Sink calls made
    pub attempts: u64,
    /// Batches acknowledged by the sink
    pub persisted: u64,
    /// Failed sink calls
    pub failures: u64,
    /// Retries scheduled after a failure
    pub retries_scheduled: u64,
    /// Retries currently waiting out their backoff
    pub retries_pending: u64,
    /// Batches deferred because the breaker was open
    pub deferred: u64,
    /// Batches given up after exhausting attempts
    pub abandoned: u64,
    /// Batches lost to queue overflow
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    attempts: AtomicU64,
    persisted: AtomicU64,
    failures: AtomicU64,
    retries_scheduled: AtomicU64,
    retries_pending: AtomicU64,
    deferred: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug)]
struct PersistJob {
    batch: PersistBatch,
    attempt: u32,
}

/// Queue, breaker and worker state for one durable sink.
pub struct Persistence {
    sink: Arc<dyn DurableGraphSink>,
    queue: Arc<OutboundQueue<PersistJob>>,
    breaker: CircuitBreaker,
    config: PersistenceConfig,
    counters: Arc<Counters>,
}

impl Persistence {
    /// Wrap a sink.
    pub fn new(sink: Arc<dyn DurableGraphSink>, config: PersistenceConfig) -> Self {
        let breaker = CircuitBreaker::new(format!("graph-sink:{}", sink.name()), config.breaker.clone());
        Self {
            queue: Arc::new(OutboundQueue::new("graph-persistence", config.queue_capacity)),
            sink,
            breaker,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Queue a batch for delivery.
    pub fn enqueue(&self, batch: PersistBatch) {
        if batch.is_empty() {
            return;
        }
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.queue.push(PersistJob { batch, attempt: 0 });
    }

    /// Current breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Batches waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PersistStats {
        let c = &self.counters;
        PersistStats {
            queued: c.queued.load(Ordering::Relaxed),
            attempts: c.attempts.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            retries_scheduled: c.retries_scheduled.load(Ordering::Relaxed),
            retries_pending: c.retries_pending.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            dropped: self.queue.dropped_count(),
        }
    }

    /// Deliver queued batches until cancelled.
    pub(crate) async fn run(self: Arc<Self>, graphs: Arc<GraphRegistry>, cancel: CancellationToken) {
        info!(sink = self.sink.name(), "Graph persistence worker started");
        while let Some(job) = self.queue.pop(&cancel).await {
            if !self.breaker.can_execute() {
                self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                let wait = self.breaker.remaining_open();
                debug!(user_id = %job.batch.user_id, ?wait, "Circuit open, deferring batch");
                self.schedule(job, wait, &cancel);
                continue;
            }

            let PersistJob { batch, attempt } = job;
            let attempt = attempt + 1;
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);

            match self.deliver(&batch).await {
                Ok(()) => {
                    self.breaker.record_success();
                    self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                    let marked = graphs.mark_persisted(&batch);
                    debug!(
                        user_id = %batch.user_id,
                        version = batch.graph_version,
                        marked,
                        "Graph batch persisted"
                    );
                }
                Err(e) => {
                    self.breaker.record_failure();
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event = "DurablePersistFailure",
                        user_id = %batch.user_id,
                        version = batch.graph_version,
                        attempt,
                        error = %e,
                        "Durable graph persist failed"
                    );

                    if self.config.retry.allows_retry(attempt) {
                        self.counters.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                        let delay = self.config.retry.delay_for(attempt);
                        self.schedule(PersistJob { batch, attempt }, delay, &cancel);
                    } else {
                        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                        error!(
                            user_id = %batch.user_id,
                            attempts = attempt,
                            "Giving up on durable graph batch; state stays in-process only"
                        );
                    }
                }
            }
        }

        // One last attempt for whatever is still queued.
        let remaining = self.queue.drain();
        let mut flushed = 0usize;
        for job in &remaining {
            if !self.breaker.can_execute() {
                break;
            }
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            match self.deliver(&job.batch).await {
                Ok(()) => {
                    self.breaker.record_success();
                    self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                    graphs.mark_persisted(&job.batch);
                    flushed += 1;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(user_id = %job.batch.user_id, error = %e, "Final graph flush failed");
                }
            }
        }
        if !remaining.is_empty() {
            info!(flushed, pending = remaining.len() - flushed, "Graph persistence queue drained");
        }
        info!(sink = self.sink.name(), "Graph persistence worker stopped");
    }

    async fn deliver(&self, batch: &PersistBatch) -> Result<(), SinkError> {
        match tokio::time::timeout(self.config.attempt_timeout, self.sink.persist(batch)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Unreachable(format!(
                "no acknowledgement within {:?}",
                self.config.attempt_timeout
            ))),
        }
    }

    /// Put `job` back on the queue after `delay`. On shutdown the job is
    /// requeued at once so it is not lost from the queue.
    fn schedule(&self, job: PersistJob, delay: Duration, cancel: &CancellationToken) {
        let queue = Arc::clone(&self.queue);
        let counters = Arc::clone(&self.counters);
        let cancel = cancel.clone();
        counters.retries_pending.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            counters.retries_pending.fetch_sub(1, Ordering::Relaxed);
            queue.push(job);
        });
    }
}
