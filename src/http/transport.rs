//! reqwest-backed transport
//!
//! One `reqwest::Client` is kept per distinct proxy, since reqwest binds
//! proxies at client construction.

use crate::http::{HttpTransport, ProbeMethod, ProbeResponse, ProbeResult, RequestArgs, TransportError};
use crate::proxy::{ProxyKind, ProxyTarget};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect::Policy, Client, Method, Proxy};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// Default body cap when the caller does not set one
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// HTTP transport built on reqwest
pub struct ReqwestTransport {
    timeout: Duration,
    clients: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    /// Creates a transport with a default per-request timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a client for the given proxy, building it on first use
    fn client_for(
        &self,
        proxy: Option<&ProxyTarget>,
        proxy_auth: Option<&str>,
    ) -> Result<Client, TransportError> {
        let key = match proxy {
            Some(target) => format!(
                "{}|{}|{}",
                target.url_with_credentials(),
                proxy_auth.unwrap_or(""),
                target.kind as u8
            ),
            None => String::new(),
        };

        if let Ok(clients) = self.clients.lock() {
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let client = build_client(self.timeout, proxy, proxy_auth)?;

        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(key, client.clone());
        }

        Ok(client)
    }
}

/// Builds a reqwest client
///
/// # Arguments
///
/// * `timeout` - Default total request timeout
/// * `proxy` - Optional proxy every request goes through
/// * `proxy_auth` - Header-level `Proxy-Authorization` for HTTP proxies
pub fn build_client(
    timeout: Duration,
    proxy: Option<&ProxyTarget>,
    proxy_auth: Option<&str>,
) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true);

    if let Some(target) = proxy {
        let mut reqwest_proxy = match (target.kind, proxy_auth) {
            (ProxyKind::Http, Some(_)) => Proxy::all(&target.endpoint),
            _ => Proxy::all(target.url_with_credentials()),
        }
        .map_err(|e| TransportError::InvalidProxy(format!("{}: {}", target.endpoint, e)))?;

        if let (ProxyKind::Http, Some(auth)) = (target.kind, proxy_auth) {
            let value = HeaderValue::from_str(auth)
                .map_err(|_| TransportError::InvalidProxy(target.endpoint.clone()))?;
            reqwest_proxy = reqwest_proxy.custom_http_auth(value);
        }

        builder = builder.proxy(reqwest_proxy);
    }

    builder
        .build()
        .map_err(|e| TransportError::Request(e.to_string()))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, method: ProbeMethod, url: &Url, args: &RequestArgs) -> ProbeResult {
        let mut headers = args.headers.clone();

        // Proxy credentials belong to the proxy hop, never to the origin
        let proxy_auth = headers.remove("proxy-authorization");
        let client = self.client_for(args.proxy.as_ref(), proxy_auth.as_deref())?;

        let reqwest_method = match method {
            ProbeMethod::Head => Method::HEAD,
            ProbeMethod::Get => Method::GET,
        };

        let mut request = client
            .request(reqwest_method, url.clone())
            .headers(to_header_map(&headers));

        if let Some(agent) = &args.user_agent {
            request = request.header(reqwest::header::USER_AGENT, agent.as_str());
        }
        if let Some(timeout) = args.timeout {
            request = request.timeout(timeout);
        }

        let started = Instant::now();
        let mut response = request.send().await.map_err(classify_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let response_headers = from_header_map(response.headers());

        let body = match method {
            ProbeMethod::Head => None,
            ProbeMethod::Get => {
                let limit = args.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
                let mut bytes: Vec<u8> = Vec::new();
                while bytes.len() < limit {
                    match response.chunk().await {
                        Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!("Body read from {} stopped early: {}", url, e);
                            break;
                        }
                    }
                }
                bytes.truncate(limit);
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
        };

        Ok(ProbeResponse {
            status,
            headers: response_headers,
            final_url,
            body,
            duration: started.elapsed(),
        })
    }
}

fn classify_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!("Dropping invalid request header {}", name),
        }
    }
    map
}

fn from_header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}
