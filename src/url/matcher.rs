/// Checks if a host matches a host pattern
///
/// Supported pattern forms:
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard subdomain: "*.example.com" matches "example.com" and any
///    subdomain of it, at any depth
/// 3. Suffix match: ".example.com" behaves like "*.example.com"
/// 4. Glob: any other "*" matches a run of characters ("cdn*.example.net")
/// 5. "*" alone matches every host
///
/// Matching is case-insensitive.
///
/// # Examples
///
/// ```
/// use linksweep::url::matches_host_pattern;
///
/// assert!(matches_host_pattern("example.com", "example.com"));
/// assert!(!matches_host_pattern("example.com", "other.com"));
///
/// assert!(matches_host_pattern("*.example.com", "example.com"));
/// assert!(matches_host_pattern("*.example.com", "api.v2.example.com"));
/// assert!(matches_host_pattern(".de", "shop.example.de"));
/// assert!(matches_host_pattern("cdn*.example.net", "cdn3.example.net"));
/// ```
pub fn matches_host_pattern(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let candidate = candidate.trim().trim_end_matches('.').to_ascii_lowercase();

    if pattern.is_empty() {
        return candidate.is_empty();
    }

    if let Some(base) = pattern
        .strip_prefix("*.")
        .or_else(|| pattern.strip_prefix('.'))
    {
        if !base.contains('*') {
            return candidate == base || candidate.ends_with(&format!(".{}", base));
        }
    }

    if pattern.contains('*') {
        return glob_match(&pattern, &candidate);
    }

    candidate == pattern
}

/// Matches `text` against a pattern where `*` stands for any run of characters
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;

    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }

        if index == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if index == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }

    // Pattern ended with '*' (or was all stars): whatever remains is fine.
    // Otherwise the last literal part must have consumed the text.
    pattern.ends_with('*') || rest.is_empty()
}
