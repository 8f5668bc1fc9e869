use crate::http::RequestArgs;
use crate::proxy::ProxySelection;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use url::Url;

/// Proxy protocol, inferred from the proxy URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks5,
}

impl ProxyKind {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Self::Http),
            "socks4" | "socks4a" => Some(Self::Socks4),
            "socks5" | "socks5h" => Some(Self::Socks5),
            _ => None,
        }
    }
}

/// Connection-level proxy settings attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub kind: ProxyKind,

    /// `scheme://host:port`, without credentials
    pub endpoint: String,

    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyTarget {
    /// Builds a target from a proxy URL and decrypted credentials
    ///
    /// Credentials embedded in the URL are used when none are given.
    pub fn new(url: &Url, username: Option<&str>, password: Option<&str>) -> Option<Self> {
        let kind = ProxyKind::from_scheme(url.scheme())?;
        let host = url.host_str()?;
        let port = url.port_or_known_default().unwrap_or(match kind {
            ProxyKind::Http => 80,
            ProxyKind::Socks4 | ProxyKind::Socks5 => 1080,
        });

        let url_username = Some(url.username()).filter(|u| !u.is_empty());
        let username = username.or(url_username).map(str::to_string);
        let password = password.or(url.password()).map(str::to_string);

        Some(Self {
            kind,
            endpoint: format!("{}://{}:{}", url.scheme(), host, port),
            username,
            password,
        })
    }

    /// Returns the proxy URL with credentials, for connection-level transports
    pub fn url_with_credentials(&self) -> String {
        let Ok(mut url) = Url::parse(&self.endpoint) else {
            return self.endpoint.clone();
        };
        if let Some(user) = &self.username {
            // Only fails for cannot-be-a-base URLs, which endpoints never are
            let _ = url.set_username(user);
            let _ = url.set_password(self.password.as_deref());
        }
        url.to_string()
    }
}

/// Builds a `Proxy-Authorization` Basic header value
pub fn proxy_authorization(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

/// Attaches a selected proxy to outbound request arguments
///
/// Sets the connection-level target and, for HTTP proxies with credentials,
/// the header-level `Proxy-Authorization`. Headers the caller already set are
/// never overwritten, including the proxy's own configured headers.
pub fn inject_proxy(args: &mut RequestArgs, selection: &ProxySelection) {
    let target = selection.target.clone();

    if target.kind == ProxyKind::Http {
        if let Some(user) = &target.username {
            let value = proxy_authorization(user, target.password.as_deref().unwrap_or(""));
            args.headers
                .entry("proxy-authorization".to_string())
                .or_insert(value);
        }
    }

    for (name, value) in &selection.headers {
        args.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.clone());
    }

    args.proxy = Some(target);
}
