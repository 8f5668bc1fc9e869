//! HTTP probing
//!
//! This module handles all outbound requests of the scanner:
//! - The [`HttpTransport`] seam and its reqwest implementation
//! - The retry plan (exponential backoff, `Retry-After`)
//! - The retrying client with rate limiting, user-agent rotation and proxies
//! - Per-attempt metrics

mod client;
mod metrics;
mod retry;
mod transport;

pub use client::{ProbeSender, RetryingClient};
pub use metrics::{ChannelMetricsSink, MetricsSink, ProbeMetric, TracingMetricsSink};
pub use retry::{parse_retry_after, should_retry, RetryPlan};
pub use transport::ReqwestTransport;

use crate::proxy::ProxyTarget;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Request method used by probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeMethod {
    Head,
    Get,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "HEAD",
            Self::Get => "GET",
        }
    }
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options
///
/// Header names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestArgs {
    pub headers: BTreeMap<String, String>,
    pub user_agent: Option<String>,
    pub timeout: Option<Duration>,
    pub proxy: Option<ProxyTarget>,
    /// Upper bound on the body kept from a GET
    pub max_body_bytes: Option<usize>,
}

impl RequestArgs {
    /// Adds a header unless one with the same name is already set
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.to_string());
        self
    }

    /// Fills unset options from `defaults`; values set here win
    pub fn merge_defaults(&self, defaults: &RequestArgs) -> RequestArgs {
        let mut merged = self.clone();
        for (name, value) in &defaults.headers {
            merged
                .headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.clone());
        }
        merged.user_agent = merged.user_agent.or_else(|| defaults.user_agent.clone());
        merged.timeout = merged.timeout.or(defaults.timeout);
        merged.proxy = merged.proxy.or_else(|| defaults.proxy.clone());
        merged.max_body_bytes = merged.max_body_bytes.or(defaults.max_body_bytes);
        merged
    }

    /// Returns true if a user agent was chosen by the caller
    pub fn has_user_agent(&self) -> bool {
        self.user_agent.is_some() || self.headers.contains_key("user-agent")
    }
}

/// A response as seen by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    /// Lowercase header names
    pub headers: BTreeMap<String, String>,
    /// URL after redirects
    pub final_url: String,
    /// Truncated body for GET requests
    pub body: Option<String>,
    pub duration: Duration,
}

impl ProbeResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Failure to obtain any HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Invalid proxy '{0}'")]
    InvalidProxy(String),

    #[error("Request failed: {0}")]
    Request(String),
}

/// Outcome of one request attempt
pub type ProbeResult = std::result::Result<ProbeResponse, TransportError>;

/// Sends a single request with no retries
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, method: ProbeMethod, url: &Url, args: &RequestArgs) -> ProbeResult;
}
