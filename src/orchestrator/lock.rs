//! Exclusive, time-bounded scan lock

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Proof of ownership of the scan loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLock {
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub timeout_seconds: u64,
}

impl ScanLock {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + Duration::seconds(self.timeout_seconds as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Backend that hands out the lock
///
/// The lock is advisory: it expires after `timeout_seconds` even if never
/// released, so a crashed run cannot hold it forever.
pub trait LockPrimitive: Send + Sync {
    /// Returns a fresh token, or None while another holder's lock is valid
    fn acquire(&self, timeout_seconds: u64) -> Option<String>;

    /// Releases the lock if `token` still owns it
    fn release(&self, token: &str);
}

/// Generates a lock token
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Process-local lock
pub struct MemoryLock {
    held: Mutex<Option<ScanLock>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            held: Mutex::new(None),
            clock,
        }
    }

    pub fn current(&self) -> Option<ScanLock> {
        let now = self.clock.now();
        self.held
            .lock()
            .ok()
            .and_then(|held| held.clone())
            .filter(|lock| !lock.is_expired(now))
    }
}

impl LockPrimitive for MemoryLock {
    fn acquire(&self, timeout_seconds: u64) -> Option<String> {
        let now = self.clock.now();
        let mut held = self.held.lock().ok()?;

        if let Some(lock) = held.as_ref() {
            if !lock.is_expired(now) {
                return None;
            }
            tracing::warn!("Taking over expired scan lock acquired at {}", lock.acquired_at);
        }

        let token = new_token();
        *held = Some(ScanLock {
            token: token.clone(),
            acquired_at: now,
            timeout_seconds,
        });
        Some(token)
    }

    fn release(&self, token: &str) {
        if let Ok(mut held) = self.held.lock() {
            if held.as_ref().map(|lock| lock.token.as_str()) == Some(token) {
                *held = None;
            }
        }
    }
}

/// Acquires and releases the scan lock with the configured timeout
pub struct LockManager {
    primitive: Arc<dyn LockPrimitive>,
    clock: Arc<dyn Clock>,
    timeout_seconds: u64,
}

impl LockManager {
    pub fn new(primitive: Arc<dyn LockPrimitive>, clock: Arc<dyn Clock>, timeout_seconds: u64) -> Self {
        Self {
            primitive,
            clock,
            timeout_seconds: timeout_seconds.max(1),
        }
    }

    pub fn acquire(&self) -> Option<ScanLock> {
        let token = self.primitive.acquire(self.timeout_seconds)?;
        if token.is_empty() {
            return None;
        }
        tracing::debug!("Acquired scan lock {}", token);
        Some(ScanLock {
            token,
            acquired_at: self.clock.now(),
            timeout_seconds: self.timeout_seconds,
        })
    }

    pub fn release(&self, lock: &ScanLock) {
        tracing::debug!("Releasing scan lock {}", lock.token);
        self.primitive.release(&lock.token);
    }
}
