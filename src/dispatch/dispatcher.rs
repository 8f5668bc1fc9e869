use crate::config::{HttpConfig, ScanConfig, ScanMethod};
use crate::dispatch::fallback::{decide_fallback, FallbackDecision};
use crate::dispatch::DispatchOutcome;
use crate::http::{ProbeMethod, ProbeResult, ProbeSender, RequestArgs};
use crate::url::extract_host;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Receives the outcome of one enqueued probe
pub type DispatchCallback = Box<dyn FnOnce(DispatchOutcome) + Send>;

struct PendingProbe {
    url: Url,
    head_args: RequestArgs,
    get_args: RequestArgs,
    scan_method: ScanMethod,
    temporary_statuses: Vec<u16>,
    callback: DispatchCallback,
}

/// Runs probes in batches with HEAD→GET fallback
///
/// Probes are buffered until `concurrency` are queued (or [`drain`] is
/// called). A batch issues every HEAD, then every needed GET, then calls
/// back in enqueue order. A minimum delay between remote sends is enforced
/// across the whole dispatcher; hosts registered as local are not paced.
///
/// [`drain`]: Dispatcher::drain
pub struct Dispatcher {
    sender: Arc<dyn ProbeSender>,
    concurrency: usize,
    parallel: bool,
    remote_delay: Duration,
    local_hosts: HashSet<String>,
    last_send: Mutex<Option<Instant>>,
    pending: Vec<PendingProbe>,
}

impl Dispatcher {
    /// Creates a dispatcher issuing up to `concurrency` probes per batch
    pub fn new(sender: Arc<dyn ProbeSender>, concurrency: usize) -> Self {
        Self {
            sender,
            concurrency: concurrency.max(1),
            parallel: true,
            remote_delay: Duration::ZERO,
            local_hosts: HashSet::new(),
            last_send: Mutex::new(None),
            pending: Vec::new(),
        }
    }

    pub fn from_config(sender: Arc<dyn ProbeSender>, scan: &ScanConfig, http: &HttpConfig) -> Self {
        Self::new(sender, scan.concurrency)
            .with_parallel(http.parallel)
            .with_remote_delay(Duration::from_millis(
                u64::try_from(http.remote_delay_ms).unwrap_or(0),
            ))
    }

    /// Minimum gap between successive sends
    pub fn with_remote_delay(mut self, delay: Duration) -> Self {
        self.remote_delay = delay;
        self
    }

    /// Hosts served by the scanned site itself; sends to them skip pacing
    pub fn with_local_hosts<I>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.local_hosts = hosts.into_iter().map(|h| h.to_lowercase()).collect();
        self
    }

    /// Sends batch members one at a time when false
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of probes waiting for the next batch
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queues a probe; runs a batch once `concurrency` probes are queued
    pub async fn enqueue(
        &mut self,
        url: Url,
        head_args: RequestArgs,
        get_args: RequestArgs,
        scan_method: ScanMethod,
        temporary_statuses: &[u16],
        callback: DispatchCallback,
    ) {
        self.pending.push(PendingProbe {
            url,
            head_args,
            get_args,
            scan_method,
            temporary_statuses: temporary_statuses.to_vec(),
            callback,
        });

        if self.pending.len() >= self.concurrency {
            let batch = std::mem::take(&mut self.pending);
            self.run_batch(batch).await;
        }
    }

    /// Runs whatever is still queued
    pub async fn drain(&mut self) {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(self.concurrency);
            let batch: Vec<PendingProbe> = self.pending.drain(..take).collect();
            self.run_batch(batch).await;
        }
    }

    async fn run_batch(&self, batch: Vec<PendingProbe>) {
        tracing::debug!("Dispatching batch of {} probes", batch.len());

        let heads = self
            .send_all(
                batch
                    .iter()
                    .map(|p| (ProbeMethod::Head, &p.url, &p.head_args))
                    .collect(),
            )
            .await;

        let decisions: Vec<FallbackDecision> = batch
            .iter()
            .zip(&heads)
            .map(|(p, head)| decide_fallback(p.scan_method, head, &p.temporary_statuses))
            .collect();

        let get_indices: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.use_get)
            .map(|(i, _)| i)
            .collect();

        let gets = self
            .send_all(
                get_indices
                    .iter()
                    .map(|&i| (ProbeMethod::Get, &batch[i].url, &batch[i].get_args))
                    .collect(),
            )
            .await;

        let mut get_results: HashMap<usize, ProbeResult> =
            get_indices.into_iter().zip(gets).collect();

        for (index, ((probe, head), decision)) in
            batch.into_iter().zip(heads).zip(decisions).enumerate()
        {
            let (response, used_get_request) = match get_results.remove(&index) {
                Some(get) => (get, true),
                None => (head, false),
            };

            (probe.callback)(DispatchOutcome {
                url: probe.url,
                response,
                head_disallowed: decision.head_disallowed,
                fallback_due_to_temporary_status: decision.due_to_temporary_status,
                used_get_request,
            });
        }
    }

    async fn send_all(&self, requests: Vec<(ProbeMethod, &Url, &RequestArgs)>) -> Vec<ProbeResult> {
        if self.parallel {
            join_all(
                requests
                    .into_iter()
                    .map(|(method, url, args)| self.send_one(method, url, args)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(requests.len());
            for (method, url, args) in requests {
                results.push(self.send_one(method, url, args).await);
            }
            results
        }
    }

    async fn send_one(&self, method: ProbeMethod, url: &Url, args: &RequestArgs) -> ProbeResult {
        if self.is_remote(url) {
            self.pace().await;
        }
        self.sender.request(method, url, args).await
    }

    fn is_remote(&self, url: &Url) -> bool {
        extract_host(url).map_or(true, |host| !self.local_hosts.contains(&host))
    }

    /// Waits until `remote_delay` has passed since the previous remote send
    async fn pace(&self) {
        if self.remote_delay.is_zero() {
            return;
        }

        let mut last = self.last_send.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.remote_delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
