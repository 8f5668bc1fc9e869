use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Shortest suspension after a failure, in seconds
pub const MIN_SUSPENSION_SECS: i64 = 30;

/// Longest suspension after repeated failures, in seconds
pub const MAX_SUSPENSION_SECS: i64 = 600;

/// Returns the suspension applied after `failure_count` consecutive failures
///
/// Grows by 30 seconds per failure, between 30 seconds and 10 minutes.
pub fn suspension_seconds(failure_count: u32) -> i64 {
    (MIN_SUSPENSION_SECS * i64::from(failure_count)).clamp(MIN_SUSPENSION_SECS, MAX_SUSPENSION_SECS)
}

/// Health of a single proxy
///
/// Failures escalate the suspension; a single success clears it. Old
/// failures are only forgotten through a success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHealthState {
    pub failure_count: u32,
    pub success_count: u32,
    pub suspended_until: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ProxyHealthState {
    /// Returns true while the proxy must not be handed out
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.is_some_and(|until| until > now)
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.success_count = self.success_count.saturating_sub(1);
        self.last_failure_at = Some(now);
        self.suspended_until = Some(now + Duration::seconds(suspension_seconds(self.failure_count)));
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.failure_count = 0;
        self.success_count = self.success_count.saturating_add(1);
        self.last_success_at = Some(now);
        self.suspended_until = None;
    }
}

/// Persistence for proxy health, one entry per proxy id
///
/// Writes are last-write-wins; implementations log their own I/O failures.
pub trait HealthStore: Send + Sync {
    fn load(&self, proxy_id: &str) -> Option<ProxyHealthState>;
    fn store(&self, proxy_id: &str, state: &ProxyHealthState);
}

/// Process-local health store
#[derive(Debug, Default)]
pub struct MemoryHealthStore {
    states: Mutex<HashMap<String, ProxyHealthState>>,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HealthStore for MemoryHealthStore {
    fn load(&self, proxy_id: &str) -> Option<ProxyHealthState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(proxy_id).cloned())
    }

    fn store(&self, proxy_id: &str, state: &ProxyHealthState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(proxy_id.to_string(), state.clone());
        }
    }
}
