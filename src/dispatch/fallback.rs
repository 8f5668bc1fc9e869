use crate::config::ScanMethod;
use crate::http::ProbeResult;

/// Statuses servers use to refuse HEAD
pub const HEAD_DISALLOWED_STATUSES: [u16; 3] = [403, 405, 501];

/// Whether a HEAD outcome calls for a GET, and why
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackDecision {
    pub use_get: bool,
    /// The server refused HEAD (403/405/501)
    pub head_disallowed: bool,
    /// HEAD returned one of the caller's temporary statuses
    pub due_to_temporary_status: bool,
}

/// Decides the GET fallback for one HEAD outcome
///
/// | Scan method | Transport error | Temporary status | 403/405/501 |
/// |-------------|-----------------|------------------|-------------|
/// | precise     | GET             | GET (flagged)    | GET         |
/// | fast        | -               | -                | GET         |
pub fn decide_fallback(
    method: ScanMethod,
    head: &ProbeResult,
    temporary_statuses: &[u16],
) -> FallbackDecision {
    let status = match head {
        Ok(response) => response.status,
        Err(_) => {
            return FallbackDecision {
                use_get: method == ScanMethod::Precise,
                ..FallbackDecision::default()
            };
        }
    };

    let head_disallowed = HEAD_DISALLOWED_STATUSES.contains(&status);
    let temporary = method == ScanMethod::Precise && temporary_statuses.contains(&status);

    FallbackDecision {
        use_get: head_disallowed || temporary,
        head_disallowed,
        due_to_temporary_status: temporary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ProbeResponse, TransportError};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn head(status: u16) -> ProbeResult {
        Ok(ProbeResponse {
            status,
            headers: BTreeMap::new(),
            final_url: String::new(),
            body: None,
            duration: Duration::ZERO,
        })
    }

    const TEMPORARY: &[u16] = &[408, 429, 503];

    #[test]
    fn test_precise_falls_back_on_transport_error() {
        let decision = decide_fallback(ScanMethod::Precise, &Err(TransportError::Timeout), TEMPORARY);
        assert!(decision.use_get);
        assert!(!decision.head_disallowed);
        assert!(!decision.due_to_temporary_status);
    }

    #[test]
    fn test_precise_flags_temporary_status() {
        let decision = decide_fallback(ScanMethod::Precise, &head(503), TEMPORARY);
        assert_eq!(
            decision,
            FallbackDecision {
                use_get: true,
                head_disallowed: false,
                due_to_temporary_status: true,
            }
        );
    }

    #[test]
    fn test_head_disallowed_in_both_modes() {
        for method in [ScanMethod::Precise, ScanMethod::Fast] {
            for status in HEAD_DISALLOWED_STATUSES {
                let decision = decide_fallback(method, &head(status), TEMPORARY);
                assert!(decision.use_get);
                assert!(decision.head_disallowed);
            }
        }
    }

    #[test]
    fn test_fast_ignores_errors_and_temporary_statuses() {
        assert!(!decide_fallback(ScanMethod::Fast, &Err(TransportError::Timeout), TEMPORARY).use_get);
        assert!(!decide_fallback(ScanMethod::Fast, &head(503), TEMPORARY).use_get);
    }

    #[test]
    fn test_no_fallback_for_ordinary_statuses() {
        for status in [200, 301, 404, 410, 500] {
            assert!(
                !decide_fallback(ScanMethod::Precise, &head(status), TEMPORARY).use_get,
                "{}",
                status
            );
        }
    }
}
