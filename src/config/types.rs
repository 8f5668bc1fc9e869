use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure for Linksweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub soft404: Soft404Config,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Identity of the scanned site and where its uploads live on disk
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Canonical site URL, used to resolve relative references
    #[serde(rename = "site-url")]
    pub site_url: String,

    /// Public URL of the upload directory (e.g. https://example.com/wp-content/uploads/)
    #[serde(rename = "upload-base-url")]
    pub upload_base_url: String,

    /// Trusted directory the upload URLs map onto
    #[serde(rename = "upload-base-dir")]
    pub upload_base_dir: PathBuf,

    /// Extra hosts that serve uploads (CDNs, offload buckets); wildcards allowed
    #[serde(rename = "upload-hosts", default)]
    pub upload_hosts: Vec<String>,

    /// Upload base URL as served by the upload hosts, if it differs
    #[serde(rename = "remote-upload-base-url", default)]
    pub remote_upload_base_url: Option<String>,

    /// Whether hosts other than the site and upload hosts may be probed
    #[serde(rename = "allow-remote-fetch", default)]
    pub allow_remote_fetch: bool,

    /// Site timezone name (IANA), fixed offset ("+02:00"), or "UTC"
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Site secret used to derive the credential encryption key
    #[serde(default)]
    pub secret: String,
}

/// HEAD vs. GET strategy for link probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMethod {
    /// HEAD first, GET only when the server refuses HEAD
    Fast,
    /// HEAD first, GET on errors, temporary statuses, or refused HEAD
    Precise,
}

/// Batch shape and probe fan-out
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Number of content items per batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: u32,

    /// Seconds between consecutive batches
    #[serde(rename = "batch-delay", default = "default_batch_delay")]
    pub batch_delay: u64,

    /// Number of probes dispatched together
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(rename = "scan-method", default = "default_scan_method")]
    pub scan_method: ScanMethod,

    /// Statuses that trigger a GET retry in precise mode
    #[serde(rename = "temporary-statuses", default = "default_temporary_statuses")]
    pub temporary_statuses: Vec<u16>,

    /// Content types considered public
    #[serde(rename = "content-types", default = "default_content_types")]
    pub content_types: Vec<String>,

    /// Content statuses considered scannable
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,

    #[serde(rename = "check-links", default = "default_true")]
    pub check_links: bool,

    #[serde(rename = "check-images", default = "default_true")]
    pub check_images: bool,
}

/// Locking and throttling gates
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds after which an unreleased scan lock expires
    #[serde(rename = "lock-timeout", default = "default_lock_timeout")]
    pub lock_timeout: u64,

    /// First hour of the rest window (local time)
    #[serde(rename = "rest-start", default)]
    pub rest_start: i64,

    /// Hour the rest window ends (exclusive); equal to start disables it
    #[serde(rename = "rest-end", default)]
    pub rest_end: i64,

    /// 1-minute load average above which a batch is deferred
    #[serde(rename = "load-threshold", default = "default_load_threshold")]
    pub load_threshold: f64,

    /// Seconds to defer a batch when the server is loaded
    #[serde(rename = "load-delay", default = "default_load_delay")]
    pub load_delay: u64,
}

/// Retry plan and transport defaults
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: i64,

    #[serde(rename = "initial-delay-ms", default = "default_initial_delay_ms")]
    pub initial_delay_ms: i64,

    /// Minimum gap between requests of one client
    #[serde(rename = "rate-limit-ms", default)]
    pub rate_limit_ms: i64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: i64,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum gap between remote sends across a dispatcher
    #[serde(rename = "remote-delay-ms", default = "default_remote_delay_ms")]
    pub remote_delay_ms: i64,

    /// User agents rotated per attempt
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Issue batch members concurrently (false sends them one at a time)
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Upper bound on GET bodies kept for soft-404 checks
    #[serde(rename = "max-body-bytes", default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Disguised "not found" detection
#[derive(Debug, Clone, Deserialize)]
pub struct Soft404Config {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "min-length", default = "default_min_length")]
    pub min_length: usize,

    #[serde(rename = "title-indicators", default = "default_title_indicators")]
    pub title_indicators: Vec<String>,

    #[serde(rename = "body-indicators", default = "default_body_indicators")]
    pub body_indicators: Vec<String>,

    #[serde(rename = "ignore-patterns", default)]
    pub ignore_patterns: Vec<String>,
}

/// Egress proxy pool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub servers: Vec<ProxyServerConfig>,

    /// Ordered host pattern to region rules; first match wins
    #[serde(rename = "region-rules", default)]
    pub region_rules: Vec<RegionRule>,

    /// Region fallback chains, keyed by region (and "default")
    #[serde(default)]
    pub fallbacks: HashMap<String, Vec<String>>,
}

/// A single proxy server entry
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyServerConfig {
    pub id: String,

    /// Proxy URL: http://, https://, socks4:// or socks5://
    pub url: String,

    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub username: Option<String>,

    /// Plain text or "enc:"-prefixed ciphertext
    #[serde(default)]
    pub password: Option<String>,
}

/// Host pattern to region mapping
#[derive(Debug, Clone, Deserialize)]
pub struct RegionRule {
    pub pattern: String,
    pub region: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_batch_size() -> u32 {
    20
}

fn default_batch_delay() -> u64 {
    60
}

fn default_concurrency() -> usize {
    10
}

fn default_scan_method() -> ScanMethod {
    ScanMethod::Precise
}

fn default_temporary_statuses() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

fn default_content_types() -> Vec<String> {
    vec!["post".to_string(), "page".to_string()]
}

fn default_statuses() -> Vec<String> {
    vec!["publish".to_string()]
}

fn default_lock_timeout() -> u64 {
    300
}

fn default_load_threshold() -> f64 {
    2.0
}

fn default_load_delay() -> u64 {
    300
}

fn default_max_attempts() -> i64 {
    3
}

fn default_initial_delay_ms() -> i64 {
    500
}

fn default_max_delay_ms() -> i64 {
    10_000
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_remote_delay_ms() -> i64 {
    250
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (compatible; Linksweep/1.0; +https://github.com/linksweep)".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
    ]
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_min_length() -> usize {
    512
}

fn default_title_indicators() -> Vec<String> {
    vec![
        "404".to_string(),
        "not found".to_string(),
        "page not found".to_string(),
        "nothing found".to_string(),
        "page introuvable".to_string(),
        "seite nicht gefunden".to_string(),
    ]
}

fn default_body_indicators() -> Vec<String> {
    vec![
        "page not found".to_string(),
        "page you requested could not be found".to_string(),
        "this page doesn't exist".to_string(),
        "/error\\s*404/i".to_string(),
    ]
}

fn default_database_path() -> String {
    "./linksweep.db".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay: default_batch_delay(),
            concurrency: default_concurrency(),
            scan_method: default_scan_method(),
            temporary_statuses: default_temporary_statuses(),
            content_types: default_content_types(),
            statuses: default_statuses(),
            check_links: true,
            check_images: true,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            rest_start: 0,
            rest_end: 0,
            load_threshold: default_load_threshold(),
            load_delay: default_load_delay(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            rate_limit_ms: 0,
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            remote_delay_ms: default_remote_delay_ms(),
            user_agents: default_user_agents(),
            parallel: true,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for Soft404Config {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: default_min_length(),
            title_indicators: default_title_indicators(),
            body_indicators: default_body_indicators(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}
