use crate::clock::{Clock, SystemClock};
use crate::config::HttpConfig;
use crate::http::metrics::{MetricsSink, ProbeMetric, TracingMetricsSink};
use crate::http::retry::{parse_retry_after, should_retry, RetryPlan};
use crate::http::{HttpTransport, ProbeMethod, ProbeResult, RequestArgs};
use crate::proxy::{inject_proxy, ProxyContext, ProxyPool};
use crate::url::extract_host;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Issues probes on behalf of the dispatcher
#[async_trait]
pub trait ProbeSender: Send + Sync {
    async fn request(&self, method: ProbeMethod, url: &Url, args: &RequestArgs) -> ProbeResult;
}

/// HTTP client with backoff, rate limiting, user-agent rotation and proxies
///
/// Each call makes up to `max_attempts` transport calls. Transport errors and
/// statuses 0, 429 and 5xx are retried after an exponential backoff, raised to
/// the server's `Retry-After` when that is longer. The last outcome is
/// returned.
pub struct RetryingClient {
    transport: Arc<dyn HttpTransport>,
    plan: RetryPlan,
    defaults: RequestArgs,
    user_agents: Vec<String>,
    proxies: Option<Arc<ProxyPool>>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    last_request: Mutex<Option<Instant>>,
}

impl RetryingClient {
    /// Creates a client with no defaults, user agents or proxies
    pub fn new(transport: Arc<dyn HttpTransport>, plan: RetryPlan) -> Self {
        Self {
            transport,
            plan,
            defaults: RequestArgs::default(),
            user_agents: Vec::new(),
            proxies: None,
            metrics: Arc::new(TracingMetricsSink),
            clock: Arc::new(SystemClock),
            last_request: Mutex::new(None),
        }
    }

    /// Creates a client from the `[http]` configuration section
    pub fn from_config(config: &HttpConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let defaults = RequestArgs {
            timeout: Some(Duration::from_secs(config.timeout_secs)),
            max_body_bytes: Some(config.max_body_bytes),
            ..RequestArgs::default()
        }
        .with_header("accept", "*/*");

        Self::new(transport, RetryPlan::from_config(config))
            .with_defaults(defaults)
            .with_user_agents(config.user_agents.clone())
    }

    pub fn with_defaults(mut self, defaults: RequestArgs) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        self.user_agents = user_agents;
        self
    }

    pub fn with_proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxies = Some(pool);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn plan(&self) -> &RetryPlan {
        &self.plan
    }

    /// Sends a request, retrying transient failures
    ///
    /// # Arguments
    ///
    /// * `method` - HEAD or GET
    /// * `url` - Absolute URL to probe
    /// * `args` - Caller options; unset ones are taken from the defaults
    ///
    /// # Returns
    ///
    /// The outcome of the last attempt
    pub async fn request(&self, method: ProbeMethod, url: &Url, args: &RequestArgs) -> ProbeResult {
        let host = extract_host(url).unwrap_or_default();
        let mut attempt: u32 = 1;

        loop {
            self.throttle().await;

            let mut call_args = args.merge_defaults(&self.defaults);
            if !call_args.has_user_agent() && !self.user_agents.is_empty() {
                let index = (attempt as usize - 1) % self.user_agents.len();
                call_args.user_agent = Some(self.user_agents[index].clone());
            }

            let selection = match (&self.proxies, &call_args.proxy) {
                (Some(pool), None) => pool.acquire(&ProxyContext::for_host(&host)),
                _ => None,
            };
            if let Some(selection) = &selection {
                inject_proxy(&mut call_args, selection);
            }

            let started = Instant::now();
            let result = self.transport.send(method, url, &call_args).await;
            let elapsed = started.elapsed();

            if let (Some(pool), Some(selection)) = (&self.proxies, &selection) {
                let proxy_ok = matches!(&result, Ok(response) if response.status != 407);
                pool.report_outcome(&selection.id, proxy_ok, None);
            }

            let final_attempt = attempt >= self.plan.max_attempts;
            let will_retry = !final_attempt && should_retry(&result);

            let mut metric = ProbeMetric::new(method, &host, url.path(), attempt);
            metric.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            metric.will_retry = will_retry;
            metric.proxy_id = selection.as_ref().map(|s| s.id.clone());
            match &result {
                Ok(response) => metric.status = Some(response.status),
                Err(e) => metric.error = Some(e.to_string()),
            }
            self.metrics.record(metric);

            if !will_retry {
                return result;
            }

            let mut delay = self.plan.backoff_delay(attempt);
            if let Ok(response) = &result {
                if let Some(ms) = response
                    .header("retry-after")
                    .and_then(|v| parse_retry_after(v, self.clock.now()))
                {
                    delay = delay.max(Duration::from_millis(ms));
                }
            }

            tracing::debug!(
                "{} {} attempt {} failed ({}), retrying in {:?}",
                method,
                url,
                attempt,
                describe(&result),
                delay
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Waits until `rate_limit_ms` has passed since the previous request
    async fn throttle(&self) {
        if self.plan.rate_limit_ms == 0 {
            return;
        }

        let gap = Duration::from_millis(self.plan.rate_limit_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < gap {
                tokio::time::sleep(gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn describe(result: &ProbeResult) -> String {
    match result {
        Ok(response) => format!("status {}", response.status),
        Err(e) => e.to_string(),
    }
}

#[async_trait]
impl ProbeSender for RetryingClient {
    async fn request(&self, method: ProbeMethod, url: &Url, args: &RequestArgs) -> ProbeResult {
        RetryingClient::request(self, method, url, args).await
    }
}
