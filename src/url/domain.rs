use url::Url;

/// Extracts the host from a URL
///
/// The host is lowercased and IPv6 literals lose their brackets, so the
/// result can be matched against host patterns or parsed as an `IpAddr`.
///
/// # Arguments
///
/// * `url` - The URL to extract the host from
///
/// # Returns
///
/// * `Some(String)` - The lowercase host
/// * `None` - If the URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use linksweep::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://[::1]:8080/").unwrap();
/// assert_eq!(extract_host(&url), Some("::1".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(strip_brackets)
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
}

/// Removes the square brackets around an IPv6 literal
pub fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}
