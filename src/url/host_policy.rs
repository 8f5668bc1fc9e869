//! Remote host safety checks
//!
//! Before an external URL is probed, its host must resolve to at least one
//! publicly routable address. Resolution goes through [`HostResolver`] so
//! tests and embedders can substitute their own DNS.

use crate::url::domain::strip_brackets;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// DNS resolution used by the host policy
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolves a host name to its addresses
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver (`getaddrinfo` via tokio)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Fixed host table, handy for tests and offline runs
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the addresses for a host
    pub fn with(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.entries.insert(host.to_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        self.entries
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host)))
    }
}

/// Decides whether a host may be contacted from the scanner
///
/// IP literals (with or without IPv6 brackets) are judged directly. Names
/// are resolved; the host is safe when at least one resolved address is
/// public. Resolution failures and empty answers are unsafe.
pub async fn is_safe_remote_host(host: &str, resolver: &dyn HostResolver) -> bool {
    let host = strip_brackets(host.trim()).trim_end_matches('.');
    if host.is_empty() {
        return false;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_public_ip(&ip);
    }

    match resolver.resolve(host).await {
        Ok(addrs) => {
            let safe = addrs.iter().any(is_public_ip);
            if !safe {
                tracing::warn!("Host {} resolves only to non-public addresses", host);
            }
            safe
        }
        Err(e) => {
            tracing::debug!("Failed to resolve {}: {}", host, e);
            false
        }
    }
}

/// Returns true if the address is publicly routable
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();

    if ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
    {
        return false;
    }

    // "This network", carrier-grade NAT, IETF protocol assignments,
    // benchmarking and the reserved class E block
    !(a == 0
        || (a == 100 && (64..=127).contains(&b))
        || (a == 192 && b == 0 && c == 0)
        || (a == 198 && (b == 18 || b == 19))
        || a >= 240)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(&v4);
    }

    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }

    let first = ip.segments()[0];
    let second = ip.segments()[1];

    // Unique local fc00::/7, link-local fe80::/10, documentation 2001:db8::/32
    !((first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first == 0x2001 && second == 0x0db8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_private_v4_ranges_are_not_public() {
        for addr in [
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.0.10",
            "127.0.0.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
            "255.255.255.255",
            "192.0.2.1",
            "224.0.0.1",
            "240.0.0.1",
        ] {
            assert!(!is_public_ip(&ip(addr)), "{} should not be public", addr);
        }
    }

    #[test]
    fn test_public_v4() {
        assert!(is_public_ip(&ip("93.184.216.34")));
        assert!(is_public_ip(&ip("8.8.8.8")));
        assert!(is_public_ip(&ip("172.32.0.1")));
    }

    #[test]
    fn test_v6_ranges() {
        assert!(!is_public_ip(&ip("::1")));
        assert!(!is_public_ip(&ip("::")));
        assert!(!is_public_ip(&ip("fe80::1")));
        assert!(!is_public_ip(&ip("fd00::1")));
        assert!(!is_public_ip(&ip("2001:db8::1")));
        assert!(!is_public_ip(&ip("::ffff:10.0.0.1")));
        assert!(is_public_ip(&ip("::ffff:8.8.8.8")));
        assert!(is_public_ip(&ip("2606:4700::1111")));
    }

    #[tokio::test]
    async fn test_ip_literals_judged_directly() {
        let resolver = StaticResolver::new();
        assert!(!is_safe_remote_host("127.0.0.1", &resolver).await);
        assert!(!is_safe_remote_host("[::1]", &resolver).await);
        assert!(is_safe_remote_host("8.8.8.8", &resolver).await);
    }

    #[tokio::test]
    async fn test_private_only_host_is_unsafe() {
        let resolver = StaticResolver::new()
            .with("intranet.example", &[ip("10.0.0.5"), ip("192.168.1.2")]);
        assert!(!is_safe_remote_host("intranet.example", &resolver).await);
    }

    #[tokio::test]
    async fn test_any_public_address_is_safe() {
        let resolver =
            StaticResolver::new().with("mixed.example", &[ip("10.0.0.5"), ip("93.184.216.34")]);
        assert!(is_safe_remote_host("mixed.example", &resolver).await);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_unsafe() {
        let resolver = StaticResolver::new();
        assert!(!is_safe_remote_host("nowhere.example", &resolver).await);
        assert!(!is_safe_remote_host("", &resolver).await);

        let empty = StaticResolver::new().with("empty.example", &[]);
        assert!(!is_safe_remote_host("empty.example", &empty).await);
    }
}
