//! Circuit breaker guarding the durable graph sink.
//!
//! - Closed: persist attempts pass through
//! - Open: the sink is considered unreachable; jobs wait in the queue and
//!   the store runs in-process only
//! - HalfOpen: one trial call is let through after `reset_timeout`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failures exceeded threshold
    Open,
    /// Testing recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
}

/// Circuit breaker for the durable sink
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    failure_count: AtomicU32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, applying the open → half-open transition if due.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            let due = inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.reset_timeout);
            if due {
                info!(name = %self.name, "Circuit breaker entering half-open state");
                inner.state = CircuitState::HalfOpen;
            }
        }
        inner.state
    }

    /// Whether an attempt may be made now.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Time left until a trial call is allowed (zero unless open).
    #[must_use]
    pub fn remaining_open(&self) -> Duration {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => self.config.reset_timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(name = %self.name, "Circuit breaker closed");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                warn!(name = %self.name, failures, "Circuit breaker opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                debug!(
                    name = %self.name,
                    failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );
            }
            CircuitState::HalfOpen => {
                warn!(name = %self.name, "Circuit breaker trial call failed, reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    /// Consecutive failures so far.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }
}
