use crate::config::SiteConfig;
use crate::url::domain::extract_host;
use crate::url::host_policy::{is_safe_remote_host, HostResolver};
use crate::url::{classify_host, HostClass};
use crate::ConfigError;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Why a candidate URL was refused
///
/// These are policy outcomes, not errors: they are recorded against the
/// occurrence and never retried. The `Display` form is the stable reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum NormalizeFailure {
    #[error("empty_candidate_url")]
    EmptyCandidateUrl,

    #[error("normalization_failed")]
    NormalizationFailed,

    #[error("invalid_image_host")]
    InvalidImageHost,

    #[error("remote_scan_disabled")]
    RemoteScanDisabled,

    #[error("remote_host_not_safe")]
    RemoteHostNotSafe,

    #[error("path_traversal_detected")]
    PathTraversalDetected,

    #[error("path_outside_basedir")]
    PathOutsideBasedir,
}

impl NormalizeFailure {
    /// Returns the reason code stored with findings
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyCandidateUrl => "empty_candidate_url",
            Self::NormalizationFailed => "normalization_failed",
            Self::InvalidImageHost => "invalid_image_host",
            Self::RemoteScanDisabled => "remote_scan_disabled",
            Self::RemoteHostNotSafe => "remote_host_not_safe",
            Self::PathTraversalDetected => "path_traversal_detected",
            Self::PathOutsideBasedir => "path_outside_basedir",
        }
    }

    /// Returns true for rejections that indicate a hostile or malformed path
    pub fn is_security_rejection(&self) -> bool {
        matches!(self, Self::PathTraversalDetected | Self::RemoteHostNotSafe)
    }
}

/// Where a candidate URL was found
#[derive(Debug, Clone, Default)]
pub struct OriginContext {
    /// URL that relative paths are resolved against (usually the permalink
    /// of the content item). Falls back to the site URL.
    pub base_url: Option<Url>,
}

impl OriginContext {
    pub fn new(base_url: Option<Url>) -> Self {
        Self { base_url }
    }
}

/// A candidate URL that passed the host policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Absolute URL to probe over the network (fragment removed)
    pub normalized_url: Url,

    pub host_class: HostClass,

    /// Trusted base directory joined with the checked relative path
    pub file_path: Option<PathBuf>,

    /// Percent-decoded path relative to the upload base
    pub decoded_relative_path: Option<String>,

    /// True when the file lives on an upload-store host rather than the site
    pub is_remote_upload_candidate: bool,
}

/// Result of normalizing one candidate URL
pub type NormalizationResult = Result<Normalized, NormalizeFailure>;

/// Resolves candidate URLs and applies the host policy
///
/// The normalizer is built once per scan from the site configuration and
/// shared across items.
pub struct Normalizer {
    site: SiteConfig,
    site_url: Url,
    upload_host: Option<String>,
    upload_prefix: String,
    remote_prefix: Option<String>,
    base_dir: PathBuf,
    resolver: Arc<dyn HostResolver>,
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("site_url", &self.site_url.as_str())
            .field("upload_prefix", &self.upload_prefix)
            .field("remote_prefix", &self.remote_prefix)
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

impl Normalizer {
    /// Creates a normalizer from the site configuration
    ///
    /// # Arguments
    ///
    /// * `site` - Site identity and upload mapping
    /// * `resolver` - DNS resolver used to vet external hosts
    ///
    /// # Returns
    ///
    /// * `Ok(Normalizer)` - Ready to use
    /// * `Err(ConfigError)` - A configured base URL does not parse
    pub fn from_config(
        site: &SiteConfig,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self, ConfigError> {
        let site_url = parse_base("site-url", &site.site_url)?;
        let upload_base = parse_base("upload-base-url", &site.upload_base_url)?;
        let remote_prefix = match &site.remote_upload_base_url {
            Some(remote) => Some(directory_path(&parse_base(
                "remote-upload-base-url",
                remote,
            )?)),
            None => None,
        };

        Ok(Self {
            site: site.clone(),
            upload_host: extract_host(&upload_base),
            upload_prefix: directory_path(&upload_base),
            remote_prefix,
            base_dir: site.upload_base_dir.clone(),
            site_url,
            resolver,
        })
    }

    /// Returns the trusted upload directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Hosts that serve the site itself (site URL and upload base URL)
    pub fn local_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = extract_host(&self.site_url).into_iter().collect();
        if let Some(upload) = &self.upload_host {
            if !hosts.contains(upload) {
                hosts.push(upload.clone());
            }
        }
        hosts
    }

    /// Resolves a candidate to an absolute http(s) URL without applying policy
    ///
    /// Used when a same-site link falls outside the upload mapping and must
    /// be probed over the network instead.
    pub fn resolve(&self, candidate: &str, origin: &OriginContext) -> Option<Url> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return None;
        }
        let absolute = self.resolve_textual(candidate, origin);
        if has_traversal(raw_path(&absolute)) {
            return None;
        }
        parse_probe_url(&absolute)
    }

    /// Normalizes a candidate URL found in content
    ///
    /// The policy chain short-circuits on the first failure:
    /// 1. Empty input is refused
    /// 2. Relative and protocol-relative URLs are resolved textually, keeping
    ///    dot segments so traversal can be detected later
    /// 3. The host is classified as same-site, upload-store, or external
    /// 4. External hosts need remote fetching enabled and a public address
    /// 5. Same-site and upload-store paths with `..` segments are refused
    /// 6. Same-site and upload-store URLs are mapped onto the upload directory
    pub async fn normalize(&self, candidate: &str, origin: &OriginContext) -> NormalizationResult {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Err(NormalizeFailure::EmptyCandidateUrl);
        }

        let absolute = self.resolve_textual(candidate, origin);
        let url = parse_probe_url(&absolute).ok_or(NormalizeFailure::NormalizationFailed)?;

        let host = extract_host(&url).ok_or(NormalizeFailure::InvalidImageHost)?;
        let host_class = classify_host(&host, &self.site);

        if host_class == HostClass::External {
            if !self.site.allow_remote_fetch {
                return Err(NormalizeFailure::RemoteScanDisabled);
            }
            if !is_safe_remote_host(&host, self.resolver.as_ref()).await {
                tracing::warn!("Refusing to probe {}: host is not public", url);
                return Err(NormalizeFailure::RemoteHostNotSafe);
            }
            return Ok(Normalized {
                normalized_url: url,
                host_class,
                file_path: None,
                decoded_relative_path: None,
                is_remote_upload_candidate: false,
            });
        }

        if has_traversal(raw_path(&absolute)) {
            tracing::warn!("Path traversal attempt in {}", candidate);
            return Err(NormalizeFailure::PathTraversalDetected);
        }

        let prefix = match host_class {
            HostClass::UploadStore => self.remote_prefix.as_deref().unwrap_or(&self.upload_prefix),
            _ if self.upload_host.as_deref() == Some(host.as_str()) => self.upload_prefix.as_str(),
            _ => return Err(NormalizeFailure::PathOutsideBasedir),
        };

        let relative = raw_path(&absolute)
            .strip_prefix(prefix)
            .ok_or(NormalizeFailure::PathOutsideBasedir)?;

        let (file_path, decoded) = map_to_base_dir(&self.base_dir, relative)?;

        Ok(Normalized {
            normalized_url: url,
            host_class,
            file_path: Some(file_path),
            decoded_relative_path: Some(decoded),
            is_remote_upload_candidate: host_class == HostClass::UploadStore,
        })
    }

    /// Builds the absolute URL text for a candidate, keeping dot segments
    fn resolve_textual(&self, candidate: &str, origin: &OriginContext) -> String {
        if has_scheme(candidate) {
            return candidate.to_string();
        }

        if let Some(rest) = candidate.strip_prefix("//") {
            return format!("{}://{}", self.site_url.scheme(), rest);
        }

        if candidate.starts_with('/') {
            return format!("{}{}", self.site_url.origin().ascii_serialization(), candidate);
        }

        let mut base = origin
            .base_url
            .clone()
            .unwrap_or_else(|| self.site_url.clone());
        base.set_fragment(None);

        if candidate.starts_with('#') {
            return format!("{}{}", base, candidate);
        }

        base.set_query(None);
        if candidate.starts_with('?') {
            return format!("{}{}", base, candidate);
        }

        format!(
            "{}{}{}",
            base.origin().ascii_serialization(),
            directory_path(&base),
            candidate
        )
    }
}

/// Maps a URL path below the upload prefix onto the trusted directory
///
/// Returns the joined path and the decoded relative path.
fn map_to_base_dir(
    base_dir: &Path,
    encoded_relative: &str,
) -> Result<(PathBuf, String), NormalizeFailure> {
    let decoded = percent_decode_str(encoded_relative).decode_utf8_lossy();

    if decoded.contains('\0') {
        return Err(NormalizeFailure::PathTraversalDetected);
    }

    let segments: Vec<&str> = decoded
        .split(|c| c == '/' || c == '\\')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if segments.iter().any(|s| *s == "..") {
        return Err(NormalizeFailure::PathTraversalDetected);
    }

    let mut file_path = base_dir.to_path_buf();
    for segment in &segments {
        file_path.push(segment);
    }

    if !file_path.starts_with(base_dir) || segments.is_empty() {
        return Err(NormalizeFailure::PathOutsideBasedir);
    }

    Ok((file_path, segments.join("/")))
}

fn parse_base(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))
}

/// Parses an absolute URL, keeping only http(s) URLs that have a host
fn parse_probe_url(absolute: &str) -> Option<Url> {
    let mut url = Url::parse(absolute).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.host_str()?;
    url.set_fragment(None);
    Some(url)
}

/// Returns the directory part of a URL path, always ending with '/'
fn directory_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(i) => path[..=i].to_string(),
        None => "/".to_string(),
    }
}

/// Returns true if the text starts with a URL scheme ("https:", "data:", ...)
fn has_scheme(candidate: &str) -> bool {
    let Some(colon) = candidate.find(':') else {
        return false;
    };
    let scheme = &candidate[..colon];
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Returns true if the decoded path climbs with `..` or smuggles a NUL byte
fn has_traversal(encoded_path: &str) -> bool {
    let decoded = percent_decode_str(encoded_path).decode_utf8_lossy();
    decoded.contains('\0') || decoded.split(|c| c == '/' || c == '\\').any(|s| s == "..")
}

/// Extracts the path of an absolute URL exactly as written
fn raw_path(absolute: &str) -> &str {
    let Some(i) = absolute.find("://") else {
        return "";
    };
    let after_scheme = &absolute[i + 3..];
    let Some(start) = after_scheme.find(|c: char| matches!(c, '/' | '\\' | '?' | '#')) else {
        return "";
    };
    let path = &after_scheme[start..];
    match path.find(|c: char| c == '?' || c == '#') {
        Some(end) => &path[..end],
        None => path,
    }
}
