//! URL handling module for Linksweep
//!
//! This module provides host extraction, host pattern matching, host
//! classification, remote host safety checks, and the candidate URL
//! normalizer that maps upload URLs onto files in the trusted directory.

mod domain;
mod host_policy;
mod matcher;
mod normalize;

use crate::config::SiteConfig;
use url::Url;

// Re-export main functions
pub use domain::{extract_host, strip_brackets};
pub use host_policy::{
    is_public_ip, is_safe_remote_host, HostResolver, StaticResolver, SystemResolver,
};
pub use matcher::matches_host_pattern;
pub use normalize::{
    NormalizationResult, NormalizeFailure, Normalized, Normalizer, OriginContext,
};

/// Host classification types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClass {
    /// The site itself - uploads are checked on disk
    SameSite,
    /// A configured upload store (CDN, offload bucket) - mapped onto disk
    UploadStore,
    /// Anything else - probed over the network when allowed
    External,
}

impl HostClass {
    /// Returns true if the host is exempt from the remote-fetch policy
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::SameSite | Self::UploadStore)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameSite => "same_site",
            Self::UploadStore => "upload_store",
            Self::External => "external",
        }
    }
}

/// Classifies a host according to the site configuration
///
/// This function checks the host in the following priority order:
/// 1. Site host or upload base URL host (same-site)
/// 2. Remote upload base URL host or any upload host pattern (upload-store)
/// 3. External (default)
///
/// # Arguments
///
/// * `host` - The host to classify (lowercase, no brackets)
/// * `site` - The site configuration
///
/// # Examples
///
/// ```no_run
/// use linksweep::config::SiteConfig;
/// use linksweep::url::{classify_host, HostClass};
///
/// # fn example(site: &SiteConfig) {
/// match classify_host("cdn.example.net", site) {
///     HostClass::SameSite => println!("Check on disk"),
///     HostClass::UploadStore => println!("Check on disk, then remotely"),
///     HostClass::External => println!("Probe if allowed"),
/// }
/// # }
/// ```
pub fn classify_host(host: &str, site: &SiteConfig) -> HostClass {
    let host = host.trim_end_matches('.').to_lowercase();

    // Priority 1: the site itself
    for base in [&site.site_url, &site.upload_base_url] {
        if host_of(base).as_deref() == Some(host.as_str()) {
            return HostClass::SameSite;
        }
    }

    // Priority 2: upload stores
    if let Some(remote) = &site.remote_upload_base_url {
        if host_of(remote).as_deref() == Some(host.as_str()) {
            return HostClass::UploadStore;
        }
    }

    for pattern in &site.upload_hosts {
        if matches_host_pattern(pattern, &host) {
            return HostClass::UploadStore;
        }
    }

    HostClass::External
}

fn host_of(value: &str) -> Option<String> {
    Url::parse(value).ok().as_ref().and_then(extract_host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn create_test_site() -> SiteConfig {
        SiteConfig {
            site_url: "https://example.com/".to_string(),
            upload_base_url: "https://static.example.com/uploads/".to_string(),
            upload_base_dir: PathBuf::from("/srv/uploads"),
            upload_hosts: vec!["*.cdn.example.net".to_string(), "media.example.org".to_string()],
            remote_upload_base_url: Some("https://bucket.s3.example.io/site/".to_string()),
            allow_remote_fetch: false,
            timezone: "UTC".to_string(),
            secret: String::new(),
        }
    }

    #[test]
    fn test_classify_same_site() {
        let site = create_test_site();
        assert_eq!(classify_host("example.com", &site), HostClass::SameSite);
        assert_eq!(classify_host("EXAMPLE.com", &site), HostClass::SameSite);
        assert_eq!(classify_host("static.example.com", &site), HostClass::SameSite);
    }

    #[test]
    fn test_classify_upload_store() {
        let site = create_test_site();
        assert_eq!(classify_host("cdn.example.net", &site), HostClass::UploadStore);
        assert_eq!(classify_host("eu.cdn.example.net", &site), HostClass::UploadStore);
        assert_eq!(classify_host("media.example.org", &site), HostClass::UploadStore);
        assert_eq!(classify_host("bucket.s3.example.io", &site), HostClass::UploadStore);
    }

    #[test]
    fn test_classify_external() {
        let site = create_test_site();
        assert_eq!(classify_host("other.com", &site), HostClass::External);
        assert_eq!(classify_host("www.example.com", &site), HostClass::External);
        assert_eq!(classify_host("notcdn.example.net.evil", &site), HostClass::External);
    }

    #[test]
    fn test_priority_same_site_over_upload_pattern() {
        let mut site = create_test_site();
        site.upload_hosts.push("*.example.com".to_string());
        assert_eq!(classify_host("example.com", &site), HostClass::SameSite);
        assert_eq!(classify_host("img.example.com", &site), HostClass::UploadStore);
    }

    #[test]
    fn test_is_trusted() {
        assert!(HostClass::SameSite.is_trusted());
        assert!(HostClass::UploadStore.is_trusted());
        assert!(!HostClass::External.is_trusted());
    }
}
