//! Per-session checkout state.
//!
//! Discount, selected address and the payment lock live in memory, keyed by
//! session id, and are never persisted. Lock expiry is decided against an
//! injected [`Clock`] so tests can move time explicitly.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLock {
    /// Identifies one acquisition; releases carrying an older token are ignored
    pub token: Uuid,
    /// Gateway order id once a gateway order has been created
    pub reference: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub discount_percent: i32,
    pub address_index: Option<usize>,
    pub payment_lock: Option<PaymentLock>,
}

impl CheckoutSession {
    pub fn lock_active(&self, now: DateTime<Utc>) -> bool {
        self.payment_lock
            .as_ref()
            .is_some_and(|lock| lock.expires_at > now)
    }

    /// Takes the lock if it is free or expired and returns the new
    /// acquisition token. An unexpired lock is left untouched.
    pub fn try_acquire_lock(&mut self, now: DateTime<Utc>, ttl: Duration) -> Option<Uuid> {
        if self.lock_active(now) {
            return None;
        }
        let token = Uuid::new_v4();
        self.payment_lock = Some(PaymentLock {
            token,
            reference: None,
            expires_at: now + ttl,
        });
        Some(token)
    }

    pub fn release_lock(&mut self) -> bool {
        self.payment_lock.take().is_some()
    }

    /// Clears the lock only if it is still the acquisition named by `token`.
    pub fn release_lock_if(&mut self, token: Uuid) -> bool {
        if self.payment_lock.as_ref().is_some_and(|lock| lock.token == token) {
            self.payment_lock = None;
            return true;
        }
        false
    }

    pub fn clear_discount(&mut self) {
        self.discount_percent = 0;
    }
}

/// In-memory session table. Each operation holds the session's shard lock
/// for its whole read-modify-write, so lock acquisition is atomic per session.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, CheckoutSession>,
    clock: Arc<dyn Clock>,
    lock_ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, lock_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            lock_ttl,
        }
    }

    pub fn with_system_clock(lock_ttl: Duration) -> Self {
        Self::new(Arc::new(SystemClock), lock_ttl)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn snapshot(&self, session_id: &str) -> CheckoutSession {
        self.sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub fn update<R>(&self, session_id: &str, f: impl FnOnce(&mut CheckoutSession) -> R) -> R {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        f(entry.value_mut())
    }

    pub fn set_discount(&self, session_id: &str, percent: i32) {
        self.update(session_id, |s| s.discount_percent = percent);
    }

    pub fn clear_discount(&self, session_id: &str) {
        self.update(session_id, CheckoutSession::clear_discount);
    }

    pub fn set_address_index(&self, session_id: &str, index: usize) {
        self.update(session_id, |s| s.address_index = Some(index));
    }

    pub fn is_locked(&self, session_id: &str) -> bool {
        let now = self.now();
        self.sessions
            .get(session_id)
            .is_some_and(|s| s.lock_active(now))
    }

    /// Acquires the session's payment lock, returning a guard that releases
    /// it on drop. `None` means another payment attempt holds the lock.
    pub fn acquire_payment_lock(self: &Arc<Self>, session_id: &str) -> Option<PaymentLockGuard> {
        let now = self.now();
        let ttl = self.lock_ttl;
        let Some(token) = self.update(session_id, |s| s.try_acquire_lock(now, ttl)) else {
            debug!(session_id, "payment lock busy");
            return None;
        };
        debug!(session_id, %token, "payment lock acquired");
        Some(PaymentLockGuard {
            store: Arc::clone(self),
            session_id: session_id.to_string(),
            token,
            armed: true,
        })
    }

    /// Token of the lock the session currently carries, expired or not.
    pub fn lock_token(&self, session_id: &str) -> Option<Uuid> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.payment_lock.as_ref().map(|lock| lock.token))
    }

    /// Clears the lock unconditionally. Returns whether one was present.
    pub fn release_payment_lock(&self, session_id: &str) -> bool {
        let released = self
            .sessions
            .get_mut(session_id)
            .map(|mut s| s.release_lock())
            .unwrap_or(false);
        if released {
            debug!(session_id, "payment lock released");
        }
        released
    }

    /// Clears the lock if it still belongs to the acquisition `token`. A lock
    /// re-acquired after expiry by another attempt is left alone.
    pub fn release_payment_lock_if(&self, session_id: &str, token: Uuid) -> bool {
        let released = self
            .sessions
            .get_mut(session_id)
            .map(|mut s| s.release_lock_if(token))
            .unwrap_or(false);
        if released {
            debug!(session_id, %token, "payment lock released");
        }
        released
    }

    fn attach_reference(&self, session_id: &str, token: Uuid, reference: String) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            if let Some(lock) = session.payment_lock.as_mut().filter(|l| l.token == token) {
                lock.reference = Some(reference);
            }
        }
    }
}

/// Scoped ownership of a session's payment lock.
#[derive(Debug)]
pub struct PaymentLockGuard {
    store: Arc<SessionStore>,
    session_id: String,
    token: Uuid,
    armed: bool,
}

impl PaymentLockGuard {
    /// Keeps the lock past this guard, tagged with the gateway order it
    /// protects. It is then cleared by a later confirm, an explicit unlock or
    /// TTL expiry.
    pub fn hold(mut self, reference: String) {
        self.store
            .attach_reference(&self.session_id, self.token, reference);
        self.armed = false;
    }
}

impl Drop for PaymentLockGuard {
    fn drop(&mut self) {
        if self.armed {
            self.store
                .release_payment_lock_if(&self.session_id, self.token);
        }
    }
}
