//! Session store with per-session serialization.
//!
//! Each session sits behind its own `tokio::sync::Mutex`, which is fair
//! (FIFO), so cart mutations for one session apply in arrival order while
//! different sessions never contend. Creation goes through the `DashMap`
//! entry API: exactly one creator wins.
//!
//! Eviction marks a slot evicted while holding its lock, so a caller that
//! resolved the slot just before it was dropped fails with
//! `SessionNotFound` instead of writing to a detached session.

use crate::cart::{Cart, CartMutation};
use crate::error::{Error, Result};
use crate::types::{Session, Turn};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

struct SessionSlot {
    user_id: String,
    state: Mutex<Session>,
    last_active_ms: AtomicI64,
    evicted: AtomicBool,
}

impl SessionSlot {
    fn touch(&self, now: DateTime<Utc>) {
        self.last_active_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }
}

/// Concurrent map of live sessions.
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionSlot>>,
    ttl: Duration,
    max_turns: usize,
    contention_timeout: Duration,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new(ttl: Duration, max_turns: usize, contention_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_turns,
            contention_timeout,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn slot_or_create(&self, session_id: &str, user_id: &str) -> Result<Arc<SessionSlot>> {
        let now = Utc::now();
        let slot = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, user_id, "Creating session");
                Arc::new(SessionSlot {
                    user_id: user_id.to_string(),
                    state: Mutex::new(Session::new(session_id, user_id, now)),
                    last_active_ms: AtomicI64::new(now.timestamp_millis()),
                    evicted: AtomicBool::new(false),
                })
            })
            .clone();
        if slot.user_id != user_id {
            return Err(Error::SessionOwnership {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(slot)
    }

    fn slot(&self, session_id: &str) -> Result<Arc<SessionSlot>> {
        self.sessions
            .get(session_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Lock a slot, failing if it was evicted before the lock was granted.
    async fn lock<'a>(&self, slot: &'a SessionSlot, session_id: &str) -> Result<MutexGuard<'a, Session>> {
        let guard = tokio::time::timeout(self.contention_timeout, slot.state.lock())
            .await
            .map_err(|_| Error::Contention(session_id.to_string()))?;
        if slot.evicted.load(Ordering::Acquire) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        Ok(guard)
    }

    /// Run `f` under the session lock, retrying once on contention.
    async fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnMut(&mut Session, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let slot = self.slot(session_id)?;
        self.with_slot(&slot, session_id, f).await
    }

    async fn with_slot<T>(
        &self,
        slot: &SessionSlot,
        session_id: &str,
        mut f: impl FnMut(&mut Session, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = match self.lock(slot, session_id).await {
            Err(Error::Contention(_)) => {
                warn!(session_id, "Session lock contended, retrying once");
                self.lock(slot, session_id).await?
            }
            other => other?,
        };
        let now = Utc::now();
        let out = f(&mut guard, now)?;
        guard.last_active_at = now;
        slot.touch(now);
        Ok(out)
    }

    /// Get the session, creating it if absent.
    pub async fn get_or_create(&self, session_id: &str, user_id: &str) -> Result<Session> {
        loop {
            let slot = self.slot_or_create(session_id, user_id)?;
            match self.lock(&slot, session_id).await {
                Err(Error::SessionNotFound(_)) => {
                    debug!(session_id, "Session evicted while opening, recreating");
                }
                locked => {
                    let session = locked?.clone();
                    slot.touch(Utc::now());
                    return Ok(session);
                }
            };
        }
    }

    /// Get an existing session.
    pub async fn find(&self, session_id: &str) -> Option<Session> {
        let slot = self.slot(session_id).ok()?;
        let guard = self.lock(&slot, session_id).await.ok()?;
        Some(guard.clone())
    }

    /// Owner of a session, without locking it.
    pub fn owner(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|s| s.user_id.clone())
    }

    /// Apply a cart mutation; on error the cart is unchanged.
    pub async fn mutate_cart(&self, session_id: &str, mutation: &CartMutation) -> Result<Session> {
        self.with_session(session_id, |session, now| {
            session.cart.apply(mutation, now)?;
            Ok(session.clone())
        })
        .await
    }

    /// Empty the cart, returning what it held.
    pub async fn take_cart(&self, session_id: &str) -> Result<Cart> {
        self.with_session(session_id, |session, _| {
            let cart = session.cart.clone();
            session.cart.clear();
            Ok(cart)
        })
        .await
    }

    /// Append a conversation turn.
    pub async fn append_turn(&self, session_id: &str, turn: Turn) -> Result<()> {
        let max_turns = self.max_turns;
        self.with_session(session_id, |session, _| {
            session.push_turn(turn.clone(), max_turns);
            Ok(())
        })
        .await
    }

    /// Drop sessions idle for longer than the TTL. Sessions currently
    /// locked are in use and kept.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(ttl_ms);
        let before = self.sessions.len();
        self.sessions.retain(|session_id, slot| {
            if slot.last_active_ms.load(Ordering::Relaxed) >= cutoff {
                return true;
            }
            let Ok(_guard) = slot.state.try_lock() else {
                return true;
            };
            slot.evicted.store(true, Ordering::Release);
            debug!(session_id = %session_id, "Evicting expired session");
            false
        });
        before.saturating_sub(self.sessions.len())
    }
}
