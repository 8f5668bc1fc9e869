//! Parallel request dispatcher
//!
//! Batches probes, issues HEADs concurrently, and falls back to GET when the
//! scan method and the HEAD outcome call for it.

mod dispatcher;
mod fallback;

pub use dispatcher::{DispatchCallback, Dispatcher};
pub use fallback::{decide_fallback, FallbackDecision, HEAD_DISALLOWED_STATUSES};

use crate::http::ProbeResult;
use serde::{Deserialize, Serialize};
use url::Url;

/// What the dispatcher hands back for one probe
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub url: Url,
    /// GET response when a fallback ran, otherwise the HEAD response
    pub response: ProbeResult,
    pub head_disallowed: bool,
    pub fallback_due_to_temporary_status: bool,
    pub used_get_request: bool,
}

impl DispatchOutcome {
    /// Flattens the outcome for storage
    pub fn probe_outcome(&self) -> ProbeOutcome {
        let (http_status, error) = match &self.response {
            Ok(response) => (Some(response.status), None),
            Err(e) => (None, Some(e.to_string())),
        };
        ProbeOutcome {
            http_status,
            error,
            used_get_fallback: self.used_get_request,
            head_disallowed: self.head_disallowed,
            fallback_due_to_temporary_status: self.fallback_due_to_temporary_status,
        }
    }
}

/// Storable summary of a probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub used_get_fallback: bool,
    pub head_disallowed: bool,
    pub fallback_due_to_temporary_status: bool,
}
