use crate::http::ProbeMethod;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One request attempt, as reported to metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeMetric {
    pub method: &'static str,
    pub host: String,
    pub path: String,
    /// 1-based
    pub attempt: u32,
    pub duration_ms: u64,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub will_retry: bool,
    pub proxy_id: Option<String>,
}

impl ProbeMetric {
    pub fn new(method: ProbeMethod, host: &str, path: &str, attempt: u32) -> Self {
        Self {
            method: method.as_str(),
            host: host.to_string(),
            path: path.to_string(),
            attempt,
            duration_ms: 0,
            status: None,
            error: None,
            will_retry: false,
            proxy_id: None,
        }
    }
}

/// Receives per-attempt metrics
///
/// Implementations must not block: the retry loop calls `record` inline.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: ProbeMetric);
}

/// Emits metrics as structured tracing events on `linksweep::metrics`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, metric: ProbeMetric) {
        tracing::debug!(
            target: "linksweep::metrics",
            method = metric.method,
            host = %metric.host,
            path = %metric.path,
            attempt = metric.attempt,
            duration_ms = metric.duration_ms,
            status = ?metric.status,
            error = ?metric.error,
            will_retry = metric.will_retry,
            proxy = ?metric.proxy_id,
            "probe attempt"
        );
    }
}

/// Forwards metrics to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelMetricsSink {
    sender: UnboundedSender<ProbeMetric>,
}

impl ChannelMetricsSink {
    /// Creates a sink and the receiving end of its channel
    pub fn new() -> (Self, UnboundedReceiver<ProbeMetric>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MetricsSink for ChannelMetricsSink {
    fn record(&self, metric: ProbeMetric) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.sender.send(metric);
    }
}
