//! Turns probe outcomes into link statuses

use crate::dispatch::DispatchOutcome;
use crate::scan::extract::extract_title;
use crate::soft404::Soft404Detector;
use crate::state::LinkStatus;
use std::path::Path;

/// Verdict for one probed candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: LinkStatus,
    pub http_status: Option<u16>,
    pub reason: Option<String>,
}

/// Classifies a dispatcher outcome
///
/// | Response                               | Status    |
/// |----------------------------------------|-----------|
/// | 2xx/3xx, body flagged by the detector  | soft_404  |
/// | 2xx/3xx                                | alive     |
/// | status in `temporary_statuses`         | unknown   |
/// | any other status                       | broken    |
/// | transport error                        | broken    |
///
/// A GET that succeeded after a temporary HEAD status counts as alive.
pub fn classify_outcome(
    outcome: &DispatchOutcome,
    temporary_statuses: &[u16],
    detector: &Soft404Detector,
) -> Classification {
    let response = match &outcome.response {
        Ok(response) => response,
        Err(e) => {
            return Classification {
                status: LinkStatus::Broken,
                http_status: None,
                reason: Some(e.to_string()),
            };
        }
    };

    let http_status = Some(response.status);

    if response.is_success() {
        if let Some(body) = &response.body {
            let title = extract_title(body).unwrap_or_default();
            let verdict = detector.evaluate(&title, body);
            if verdict.flagged {
                return Classification {
                    status: LinkStatus::Soft404,
                    http_status,
                    reason: verdict.matched,
                };
            }
        }
        return Classification {
            status: LinkStatus::Alive,
            http_status,
            reason: None,
        };
    }

    if temporary_statuses.contains(&response.status) {
        return Classification {
            status: LinkStatus::Unknown,
            http_status,
            reason: Some("temporary_status".to_string()),
        };
    }

    Classification {
        status: LinkStatus::Broken,
        http_status,
        reason: outcome
            .head_disallowed
            .then(|| "head_disallowed".to_string()),
    }
}

/// Checks whether a resolved upload exists on disk
pub trait FileProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// Looks at the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Soft404Config;
    use crate::http::{ProbeResponse, ProbeResult, TransportError};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use url::Url;

    const TEMPORARY: &[u16] = &[429, 503];

    fn detector() -> Soft404Detector {
        Soft404Detector::from_config(&Soft404Config {
            min_length: 0,
            ..Soft404Config::default()
        })
        .unwrap()
    }

    fn outcome(response: ProbeResult) -> DispatchOutcome {
        DispatchOutcome {
            url: Url::parse("https://example.com/x").unwrap(),
            response,
            head_disallowed: false,
            fallback_due_to_temporary_status: false,
            used_get_request: false,
        }
    }

    fn status(code: u16, body: Option<&str>) -> ProbeResult {
        Ok(ProbeResponse {
            status: code,
            headers: BTreeMap::new(),
            final_url: "https://example.com/x".to_string(),
            body: body.map(str::to_string),
            duration: Duration::ZERO,
        })
    }

    #[test]
    fn test_success_is_alive() {
        for code in [200, 204, 301, 302] {
            let c = classify_outcome(&outcome(status(code, None)), TEMPORARY, &detector());
            assert_eq!(c.status, LinkStatus::Alive, "{}", code);
            assert_eq!(c.http_status, Some(code));
        }
    }

    #[test]
    fn test_soft_404_body() {
        let body = "<html><head><title>Page Not Found</title></head><body>Sorry</body></html>";
        let c = classify_outcome(&outcome(status(200, Some(body))), TEMPORARY, &detector());
        assert_eq!(c.status, LinkStatus::Soft404);
        assert!(c.reason.is_some());
    }

    #[test]
    fn test_temporary_status_is_unknown() {
        let c = classify_outcome(&outcome(status(503, None)), TEMPORARY, &detector());
        assert_eq!(c.status, LinkStatus::Unknown);
        assert_eq!(c.reason.as_deref(), Some("temporary_status"));
    }

    #[test]
    fn test_get_success_after_temporary_head_is_alive() {
        let mut o = outcome(status(200, Some("<p>a perfectly normal page</p>")));
        o.fallback_due_to_temporary_status = true;
        o.used_get_request = true;
        assert_eq!(
            classify_outcome(&o, TEMPORARY, &detector()).status,
            LinkStatus::Alive
        );
    }

    #[test]
    fn test_errors_are_broken() {
        let c = classify_outcome(&outcome(status(404, None)), TEMPORARY, &detector());
        assert_eq!(c.status, LinkStatus::Broken);
        assert_eq!(c.http_status, Some(404));

        let c = classify_outcome(&outcome(Err(TransportError::Timeout)), TEMPORARY, &detector());
        assert_eq!(c.status, LinkStatus::Broken);
        assert_eq!(c.http_status, None);
        assert!(c.reason.is_some());
    }

    #[test]
    fn test_fs_probe() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        std::fs::write(&file, b"png").unwrap();

        assert!(FsProbe.exists(&file));
        assert!(!FsProbe.exists(&dir.path().join("missing.png")));
        assert!(!FsProbe.exists(dir.path()));
    }
}
