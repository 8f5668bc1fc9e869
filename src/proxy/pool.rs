use crate::clock::Clock;
use crate::config::{ProxyConfig, RegionRule};
use crate::proxy::credentials::CredentialCipher;
use crate::proxy::health::{HealthStore, ProxyHealthState};
use crate::proxy::inject::ProxyTarget;
use crate::proxy::{ProxyContext, ProxyDescriptor, ProxySelection};
use crate::url::matches_host_pattern;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use url::Url;

/// Region used for proxies with no region list, and as the last resort
pub const GLOBAL_REGION: &str = "global";

/// Fallback chain key used when a region has no chain of its own
pub const DEFAULT_CHAIN: &str = "default";

/// Region-aware proxy pool with health-based suspension
///
/// The pool is built from configuration and shared through `Arc`; call
/// [`ProxyPool::refresh`] after the configuration changes.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    health: Arc<dyn HealthStore>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct PoolInner {
    enabled: bool,
    descriptors: Vec<ProxyDescriptor>,
    region_rules: Vec<RegionRule>,
    fallbacks: HashMap<String, Vec<String>>,
    /// Round-robin cursor per "region:priority" shortlist
    cursors: HashMap<String, usize>,
}

impl ProxyPool {
    /// Creates a pool from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Proxy servers, region rules and fallback chains
    /// * `cipher` - Decrypts `enc:` passwords; without it encrypted entries are skipped
    /// * `health` - Health persistence
    /// * `clock` - Time source for suspensions
    pub fn new(
        config: &ProxyConfig,
        cipher: Option<&CredentialCipher>,
        health: Arc<dyn HealthStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pool = Self {
            inner: Mutex::new(PoolInner::default()),
            health,
            clock,
        };
        pool.refresh(config, cipher);
        pool
    }

    /// Reloads servers, rules and chains; round-robin cursors restart
    pub fn refresh(&self, config: &ProxyConfig, cipher: Option<&CredentialCipher>) {
        let descriptors = load_descriptors(config, cipher);
        tracing::info!(
            "Proxy pool loaded {} of {} configured servers (enabled: {})",
            descriptors.len(),
            config.servers.len(),
            config.enabled
        );

        let fallbacks = config
            .fallbacks
            .iter()
            .map(|(region, chain)| {
                (
                    region.to_lowercase(),
                    chain.iter().map(|r| r.to_lowercase()).collect(),
                )
            })
            .collect();

        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        *inner = PoolInner {
            enabled: config.enabled,
            descriptors,
            region_rules: config.region_rules.clone(),
            fallbacks,
            cursors: HashMap::new(),
        };
    }

    /// Returns true if at least one server is configured and the pool is on
    pub fn is_active(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.enabled && !inner.descriptors.is_empty())
            .unwrap_or(false)
    }

    /// Picks a proxy for a request
    ///
    /// Walks the region preference list and stops at the first region with
    /// a non-suspended proxy. Within that region only the highest priority is
    /// kept and ties rotate round-robin over the id-sorted shortlist.
    ///
    /// # Returns
    ///
    /// * `Some(ProxySelection)` - The proxy to use
    /// * `None` - Pool disabled, or every candidate is suspended
    pub fn acquire(&self, context: &ProxyContext) -> Option<ProxySelection> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().ok()?;
        if !inner.enabled || inner.descriptors.is_empty() {
            return None;
        }

        let region = context
            .region
            .as_ref()
            .map(|r| r.to_lowercase())
            .or_else(|| context.host.as_deref().and_then(|h| inner.infer_region(h)));

        for preferred in inner.preference_list(region.as_deref()) {
            let candidates: Vec<&ProxyDescriptor> = inner
                .descriptors
                .iter()
                .filter(|d| d.serves(&preferred))
                .filter(|d| !self.is_suspended(&d.id, now))
                .collect();

            let Some(top) = candidates.iter().map(|d| d.priority).max() else {
                continue;
            };

            let mut shortlist: Vec<&ProxyDescriptor> =
                candidates.into_iter().filter(|d| d.priority == top).collect();
            shortlist.sort_by(|a, b| a.id.cmp(&b.id));

            let key = format!("{}:{}", preferred, top);
            let cursor = inner.cursors.get(&key).copied().unwrap_or(0);
            let index = cursor % shortlist.len();
            let chosen = shortlist[index];

            let selection = ProxySelection {
                id: chosen.id.clone(),
                region: preferred.clone(),
                target: chosen.target.clone(),
                headers: chosen.headers.clone(),
            };

            inner.cursors.insert(key, index + 1);
            tracing::debug!("Selected proxy {} for region {}", selection.id, preferred);
            return Some(selection);
        }

        tracing::debug!(
            "No available proxy for host {:?} region {:?}",
            context.host,
            region
        );
        None
    }

    /// Records the outcome of a proxied request
    pub fn report_outcome(&self, proxy_id: &str, success: bool, at: Option<DateTime<Utc>>) {
        let now = at.unwrap_or_else(|| self.clock.now());
        let mut state = self.health.load(proxy_id).unwrap_or_default();

        if success {
            state.record_success(now);
        } else {
            state.record_failure(now);
            tracing::warn!(
                "Proxy {} failed ({} consecutive), suspended until {:?}",
                proxy_id,
                state.failure_count,
                state.suspended_until
            );
        }

        self.health.store(proxy_id, &state);
    }

    /// Returns the stored health for a proxy
    pub fn health(&self, proxy_id: &str) -> ProxyHealthState {
        self.health.load(proxy_id).unwrap_or_default()
    }

    /// Returns the region inferred for a host from the region rules
    pub fn infer_region(&self, host: &str) -> Option<String> {
        self.inner.lock().ok()?.infer_region(host)
    }

    /// Returns the ordered regions tried for a requested region
    pub fn preference_list(&self, region: Option<&str>) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.preference_list(region))
            .unwrap_or_else(|_| vec![GLOBAL_REGION.to_string()])
    }

    fn is_suspended(&self, proxy_id: &str, now: DateTime<Utc>) -> bool {
        self.health
            .load(proxy_id)
            .is_some_and(|state| state.is_suspended(now))
    }
}

impl PoolInner {
    fn infer_region(&self, host: &str) -> Option<String> {
        self.region_rules
            .iter()
            .find(|rule| matches_host_pattern(&rule.pattern, host))
            .map(|rule| rule.region.to_lowercase())
    }

    fn preference_list(&self, region: Option<&str>) -> Vec<String> {
        let chain = region
            .and_then(|r| self.fallbacks.get(r))
            .or_else(|| self.fallbacks.get(DEFAULT_CHAIN));

        let mut list: Vec<String> = Vec::new();

        if let Some(r) = region {
            list.push(r.to_string());
        }

        for entry in chain.into_iter().flatten() {
            if !list.contains(entry) {
                list.push(entry.clone());
            }
        }

        if !list.iter().any(|r| r == GLOBAL_REGION) {
            list.push(GLOBAL_REGION.to_string());
        }

        list
    }
}

impl ProxyDescriptor {
    fn serves(&self, region: &str) -> bool {
        if self.regions.is_empty() {
            return region == GLOBAL_REGION;
        }
        self.regions.iter().any(|r| r == region)
    }
}

fn load_descriptors(config: &ProxyConfig, cipher: Option<&CredentialCipher>) -> Vec<ProxyDescriptor> {
    let mut descriptors = Vec::new();

    for server in &config.servers {
        let url = match Url::parse(&server.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping proxy {}: invalid url: {}", server.id, e);
                continue;
            }
        };

        let password = match (&server.password, cipher) {
            (None, _) => None,
            (Some(stored), Some(cipher)) => match cipher.decrypt(stored) {
                Ok(plain) => Some(plain),
                Err(e) => {
                    tracing::warn!("Skipping proxy {}: {}", server.id, e);
                    continue;
                }
            },
            (Some(stored), None) if super::credentials::is_encrypted(stored) => {
                tracing::warn!("Skipping proxy {}: encrypted password but no secret", server.id);
                continue;
            }
            (Some(stored), None) => Some(stored.clone()),
        };

        let Some(target) = ProxyTarget::new(&url, server.username.as_deref(), password.as_deref())
        else {
            tracing::warn!("Skipping proxy {}: unsupported proxy url {}", server.id, url);
            continue;
        };

        descriptors.push(ProxyDescriptor {
            id: server.id.clone(),
            url,
            regions: server.regions.iter().map(|r| r.to_lowercase()).collect(),
            priority: server.priority,
            headers: server
                .headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            target,
        });
    }

    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ProxyServerConfig;
    use crate::proxy::MemoryHealthStore;
    use chrono::{Duration, TimeZone};

    fn server(id: &str, regions: &[&str], priority: i32) -> ProxyServerConfig {
        ProxyServerConfig {
            id: id.to_string(),
            url: format!("http://{}.proxy.example:8080", id),
            regions: regions.iter().map(|r| r.to_string()).collect(),
            priority,
            headers: HashMap::new(),
            username: None,
            password: None,
        }
    }

    fn config(servers: Vec<ProxyServerConfig>) -> ProxyConfig {
        let mut fallbacks = HashMap::new();
        fallbacks.insert("eu".to_string(), vec!["eu".to_string(), "us".to_string()]);
        fallbacks.insert("default".to_string(), vec!["us".to_string()]);
        ProxyConfig {
            enabled: true,
            servers,
            region_rules: vec![
                RegionRule {
                    pattern: ".de".to_string(),
                    region: "EU".to_string(),
                },
                RegionRule {
                    pattern: "*.example.fr".to_string(),
                    region: "eu".to_string(),
                },
            ],
            fallbacks,
        }
    }

    fn pool(config: &ProxyConfig) -> (ProxyPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        ));
        let pool = ProxyPool::new(config, None, Arc::new(MemoryHealthStore::new()), clock.clone());
        (pool, clock)
    }

    fn region(r: &str) -> ProxyContext {
        ProxyContext {
            host: None,
            region: Some(r.to_string()),
        }
    }

    #[test]
    fn test_region_inferred_from_host() {
        let (pool, _) = pool(&config(vec![server("eu-1", &["eu"], 0)]));
        assert_eq!(pool.infer_region("shop.example.de"), Some("eu".to_string()));
        assert_eq!(pool.infer_region("www.example.fr"), Some("eu".to_string()));
        assert_eq!(pool.infer_region("example.com"), None);

        let selection = pool
            .acquire(&ProxyContext {
                host: Some("shop.example.de".to_string()),
                region: None,
            })
            .unwrap();
        assert_eq!(selection.id, "eu-1");
        assert_eq!(selection.region, "eu");
    }

    #[test]
    fn test_preference_list() {
        let (pool, _) = pool(&config(vec![]));
        assert_eq!(pool.preference_list(Some("eu")), vec!["eu", "us", "global"]);
        assert_eq!(pool.preference_list(Some("asia")), vec!["asia", "us", "global"]);
        assert_eq!(pool.preference_list(None), vec!["us", "global"]);
    }

    #[test]
    fn test_highest_priority_wins() {
        let (pool, _) = pool(&config(vec![
            server("eu-low", &["eu"], 1),
            server("eu-high", &["eu"], 5),
        ]));
        for _ in 0..3 {
            assert_eq!(pool.acquire(&region("eu")).unwrap().id, "eu-high");
        }
    }

    #[test]
    fn test_round_robin_fairness() {
        let (pool, _) = pool(&config(vec![
            server("eu-c", &["eu"], 0),
            server("eu-a", &["eu"], 0),
            server("eu-b", &["eu"], 0),
        ]));

        let picks: Vec<String> = (0..3)
            .map(|_| pool.acquire(&region("eu")).unwrap().id)
            .collect();
        assert_eq!(picks, vec!["eu-a", "eu-b", "eu-c"]);

        // The cycle repeats
        assert_eq!(pool.acquire(&region("eu")).unwrap().id, "eu-a");
    }

    #[test]
    fn test_falls_back_to_next_region() {
        let (pool, _) = pool(&config(vec![server("us-1", &["us"], 0)]));
        let selection = pool.acquire(&region("eu")).unwrap();
        assert_eq!(selection.id, "us-1");
        assert_eq!(selection.region, "us");
    }

    #[test]
    fn test_unlisted_proxy_serves_global() {
        let (pool, _) = pool(&config(vec![server("any", &[], 0)]));
        let selection = pool.acquire(&region("eu")).unwrap();
        assert_eq!(selection.id, "any");
        assert_eq!(selection.region, "global");
    }

    #[test]
    fn test_suspended_proxy_is_never_returned() {
        let (pool, clock) = pool(&config(vec![
            server("eu-a", &["eu"], 0),
            server("eu-b", &["eu"], 0),
        ]));

        pool.report_outcome("eu-a", false, None);
        for _ in 0..4 {
            assert_eq!(pool.acquire(&region("eu")).unwrap().id, "eu-b");
        }

        pool.report_outcome("eu-b", false, None);
        assert!(pool.acquire(&region("eu")).is_none());

        clock.advance(Duration::seconds(30));
        assert!(pool.acquire(&region("eu")).is_some());
    }

    #[test]
    fn test_repeated_failures_extend_suspension() {
        let (pool, clock) = pool(&config(vec![server("eu-a", &["eu"], 0)]));
        let now = clock.now();
        for n in 1..=5i64 {
            pool.report_outcome("eu-a", false, None);
            let until = pool.health("eu-a").suspended_until.unwrap();
            assert!((until - now).num_seconds() >= (30 * n).min(600));
        }

        pool.report_outcome("eu-a", true, None);
        assert!(pool.acquire(&region("eu")).is_some());
    }

    #[test]
    fn test_disabled_pool_returns_none() {
        let mut cfg = config(vec![server("eu-a", &["eu"], 0)]);
        cfg.enabled = false;
        let (pool, _) = pool(&cfg);
        assert!(!pool.is_active());
        assert!(pool.acquire(&region("eu")).is_none());
    }

    #[test]
    fn test_encrypted_password_is_decrypted() {
        let cipher = CredentialCipher::from_secret("secret");
        let mut entry = server("eu-a", &["eu"], 0);
        entry.username = Some("bob".to_string());
        entry.password = Some(cipher.encrypt("pw"));
        let cfg = config(vec![entry]);

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pool = ProxyPool::new(&cfg, Some(&cipher), Arc::new(MemoryHealthStore::new()), clock);
        let selection = pool.acquire(&region("eu")).unwrap();
        assert_eq!(selection.target.password.as_deref(), Some("pw"));

        // Without the secret the entry is skipped
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pool = ProxyPool::new(&cfg, None, Arc::new(MemoryHealthStore::new()), clock);
        assert!(pool.acquire(&region("eu")).is_none());
    }

    #[test]
    fn test_refresh_replaces_servers() {
        let (pool, _) = pool(&config(vec![server("eu-a", &["eu"], 0)]));
        pool.refresh(&config(vec![server("eu-z", &["eu"], 0)]), None);
        assert_eq!(pool.acquire(&region("eu")).unwrap().id, "eu-z");
    }
}
