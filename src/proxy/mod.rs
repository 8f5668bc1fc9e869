//! Egress proxy pool
//!
//! This module provides:
//! - Region-aware proxy selection with priority and round-robin tie-breaking
//! - An escalating-penalty circuit breaker per proxy
//! - Credential injection into outbound requests
//! - Encryption of stored proxy passwords

mod credentials;
mod health;
mod inject;
mod pool;

pub use credentials::{is_encrypted, CredentialCipher, CredentialError, ENCRYPTED_PREFIX};
pub use health::{
    suspension_seconds, HealthStore, MemoryHealthStore, ProxyHealthState, MAX_SUSPENSION_SECS,
    MIN_SUSPENSION_SECS,
};
pub use inject::{inject_proxy, proxy_authorization, ProxyKind, ProxyTarget};
pub use pool::{ProxyPool, DEFAULT_CHAIN, GLOBAL_REGION};

use std::collections::BTreeMap;
use url::Url;

/// A configured proxy server with decrypted credentials
#[derive(Debug, Clone)]
pub struct ProxyDescriptor {
    pub id: String,
    pub url: Url,
    /// Lowercased; empty means the proxy serves the global region
    pub regions: Vec<String>,
    pub priority: i32,
    pub headers: BTreeMap<String, String>,
    pub target: ProxyTarget,
}

/// What a request knows about its destination
#[derive(Debug, Clone, Default)]
pub struct ProxyContext {
    pub host: Option<String>,
    pub region: Option<String>,
}

impl ProxyContext {
    pub fn for_host(host: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            region: None,
        }
    }
}

/// A proxy handed out by the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySelection {
    pub id: String,
    /// Region the proxy was selected for
    pub region: String,
    pub target: ProxyTarget,
    /// Extra headers configured for this proxy (lowercase names)
    pub headers: BTreeMap<String, String>,
}
