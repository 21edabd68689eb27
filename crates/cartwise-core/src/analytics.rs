//! Analytics events
//!
//! One [`AnalyticsEvent`] is emitted per compiled response. Emission only
//! pushes onto a bounded [`OutboundQueue`]; a background worker forwards
//! events to the configured [`AnalyticsSink`]. Sink failures are logged and
//! counted, never surfaced to the request.

use crate::error::Result;
use async_trait::async_trait;
use cartwise_memory::{OutboundQueue, PushOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default analytics queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Summary of one handled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Request ID
    pub request_id: String,
    /// Session ID
    pub session_id: String,
    /// User ID
    pub user_id: String,
    /// Intent label
    pub intent: String,
    /// `ok` or `degraded`
    pub status: String,
    /// Providers invoked
    pub providers: Vec<String>,
    /// Providers that timed out or failed
    pub degraded_providers: Vec<String>,
    /// Error code, when degraded
    pub error_code: Option<String>,
    /// Candidates returned
    pub candidate_count: usize,
    /// Candidates removed by dietary restrictions
    pub filtered_count: usize,
    /// Personalization signals applied
    pub signals_used: usize,
    /// Whether a requested summary was dropped
    pub summary_skipped: bool,
    /// Wall time spent on the request
    pub elapsed_ms: u64,
    /// When the response was compiled
    pub at: DateTime<Utc>,
}

/// Destination for analytics events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &'static str;

    /// Deliver one event.
    async fn emit(&self, event: &AnalyticsEvent) -> Result<()>;
}

/// Writes events to the `cartwise::analytics` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalyticsSink;

#[async_trait]
impl AnalyticsSink for TracingAnalyticsSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn emit(&self, event: &AnalyticsEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(
            target: "cartwise::analytics",
            request_id = %event.request_id,
            intent = %event.intent,
            status = %event.status,
            elapsed_ms = event.elapsed_ms,
            %payload,
            "analytics"
        );
        Ok(())
    }
}

/// Emitter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsStats {
    /// Events accepted by `emit`
    pub queued: u64,
    /// Events the sink accepted
    pub delivered: u64,
    /// Events the sink rejected
    pub failed: u64,
    /// Events lost to queue backpressure
    pub dropped: u64,
}

/// Non-blocking front of the analytics pipeline.
pub struct AnalyticsEmitter {
    queue: OutboundQueue<AnalyticsEvent>,
    sink: Arc<dyn AnalyticsSink>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl AnalyticsEmitter {
    /// Create an emitter with a bounded queue.
    pub fn new(sink: Arc<dyn AnalyticsSink>, queue_capacity: usize) -> Self {
        Self {
            queue: OutboundQueue::new("analytics", queue_capacity),
            sink,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Queue an event. Never blocks or fails; the oldest event is dropped
    /// when the queue is full.
    pub fn emit(&self, event: AnalyticsEvent) {
        if self.queue.push(event) == PushOutcome::DroppedOldest {
            debug!(dropped = self.queue.dropped_count(), "Analytics backlog trimmed");
        }
    }

    /// Current counters.
    pub fn stats(&self) -> AnalyticsStats {
        AnalyticsStats {
            queued: self.queue.pushed_count(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.queue.dropped_count(),
        }
    }

    /// Events waiting for the worker.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    async fn forward(&self, event: &AnalyticsEvent) {
        match self.sink.emit(event).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = self.sink.name(),
                    request_id = %event.request_id,
                    error = %e,
                    "Analytics sink rejected event"
                );
            }
        }
    }

    /// Start the worker. It drains what is left once `cancel` fires.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let emitter = Arc::clone(self);
        tokio::spawn(async move {
            info!(sink = emitter.sink.name(), "Analytics worker started");
            while let Some(event) = emitter.queue.pop(&cancel).await {
                emitter.forward(&event).await;
            }
            let remaining = emitter.queue.drain();
            for event in &remaining {
                emitter.forward(event).await;
            }
            info!(flushed = remaining.len(), "Analytics worker stopped");
        })
    }
}
