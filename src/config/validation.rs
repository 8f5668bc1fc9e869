use crate::config::types::{
    Config, HttpConfig, ProxyConfig, ScanConfig, ScheduleConfig, SiteConfig, Soft404Config,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

const PROXY_SCHEMES: &[&str] = &["http", "https", "socks4", "socks4a", "socks5", "socks5h"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_proxy_config(&config.proxy)?;
    validate_storage_path(&config.storage.database_path)?;
    Ok(())
}

/// Replaces out-of-range tunables with their defaults
///
/// Bad numbers are never fatal: each correction is logged and the scan
/// continues with a usable value.
pub fn sanitize(config: &mut Config) {
    sanitize_scan_config(&mut config.scan);
    sanitize_schedule_config(&mut config.schedule);
    sanitize_http_config(&mut config.http);
    sanitize_soft404_config(&mut config.soft404);
}

/// Validates site identity and upload mapping
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let site = parse_http_url("site-url", &config.site_url)?;
    if site.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "site-url '{}' has no host",
            config.site_url
        )));
    }

    parse_http_url("upload-base-url", &config.upload_base_url)?;

    if let Some(remote) = &config.remote_upload_base_url {
        parse_http_url("remote-upload-base-url", remote)?;
    }

    if config.upload_base_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "upload-base-dir cannot be empty".to_string(),
        ));
    }

    for pattern in &config.upload_hosts {
        validate_host_pattern(pattern)?;
    }

    Ok(())
}

/// Validates proxy servers and region rules
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for server in &config.servers {
        if server.id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "proxy server id cannot be empty".to_string(),
            ));
        }

        if !seen.insert(server.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate proxy server id '{}'",
                server.id
            )));
        }

        let url = Url::parse(&server.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid proxy url '{}': {}", server.url, e))
        })?;

        if !PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::Validation(format!(
                "proxy '{}' uses unsupported scheme '{}'",
                server.id,
                url.scheme()
            )));
        }
    }

    for rule in &config.region_rules {
        if rule.region.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "region rule '{}' has an empty region",
                rule.pattern
            )));
        }
        validate_host_pattern(&rule.pattern)?;
    }

    Ok(())
}

fn validate_storage_path(path: &str) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn parse_http_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(url)
}

/// Validates a host pattern (exact, "*." wildcard, "*" glob, or leading-dot suffix)
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    if pattern == "*" {
        return Ok(());
    }

    let base = pattern
        .strip_prefix("*.")
        .or_else(|| pattern.strip_prefix('.'))
        .unwrap_or(pattern);

    if base.contains('*') {
        // Free-form globs are accepted as long as the literal parts are sane
        return validate_domain_chars(&base.replace('*', ""));
    }

    validate_domain_string(base)
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    validate_domain_chars(domain)?;

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}

fn validate_domain_chars(domain: &str) -> Result<(), ConfigError> {
    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }
    Ok(())
}

fn sanitize_scan_config(config: &mut ScanConfig) {
    if config.batch_size == 0 {
        tracing::warn!("batch-size must be >= 1, using 20");
        config.batch_size = 20;
    }

    if config.concurrency == 0 {
        tracing::warn!("concurrency must be >= 1, using 1");
        config.concurrency = 1;
    }

    config.content_types.retain(|t| !t.trim().is_empty());
    if config.content_types.is_empty() {
        tracing::warn!("no content types configured, using post and page");
        config.content_types = vec!["post".to_string(), "page".to_string()];
    }

    config.statuses.retain(|s| !s.trim().is_empty());
    if config.statuses.is_empty() {
        tracing::warn!("no scannable statuses configured, using publish");
        config.statuses = vec!["publish".to_string()];
    }
}

fn sanitize_schedule_config(config: &mut ScheduleConfig) {
    if !config.load_threshold.is_finite() || config.load_threshold <= 0.0 {
        tracing::warn!(
            "load-threshold {} is not a positive number, using 2.0",
            config.load_threshold
        );
        config.load_threshold = 2.0;
    }

    if config.lock_timeout == 0 {
        tracing::warn!("lock-timeout must be >= 1 second, using 300");
        config.lock_timeout = 300;
    }
}

fn sanitize_http_config(config: &mut HttpConfig) {
    if config.max_attempts < 1 {
        tracing::warn!("max-attempts {} is below 1, using 1", config.max_attempts);
        config.max_attempts = 1;
    }

    for (name, value) in [
        ("initial-delay-ms", &mut config.initial_delay_ms),
        ("rate-limit-ms", &mut config.rate_limit_ms),
        ("max-delay-ms", &mut config.max_delay_ms),
        ("remote-delay-ms", &mut config.remote_delay_ms),
    ] {
        if *value < 0 {
            tracing::warn!("{} {} is negative, clamping to 0", name, value);
            *value = 0;
        }
    }

    if config.timeout_secs == 0 {
        tracing::warn!("timeout-secs must be >= 1, using 20");
        config.timeout_secs = 20;
    }

    config.user_agents.retain(|ua| !ua.trim().is_empty());
}

fn sanitize_soft404_config(config: &mut Soft404Config) {
    config.title_indicators.retain(|i| !i.trim().is_empty());
    config.body_indicators.retain(|i| !i.trim().is_empty());
    config.ignore_patterns.retain(|i| !i.trim().is_empty());
}
