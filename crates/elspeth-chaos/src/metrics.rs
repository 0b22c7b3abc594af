//! Prometheus counters for the chaos harnesses, exposed through
//! `/admin/stats` and `/admin/export`.

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

const LATENCY_BUCKETS: &[f64] = &[10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0];

/// Counters and histograms for one running harness instance.
///
/// Every metric carries a `harness` label, so a single instance is
/// shared by both the ChaosLLM and ChaosWeb routers rather than one
/// per harness — registering the same metric name twice against its
/// own private [`Registry`] would fail with `AlreadyReg`.
pub struct ChaosMetrics {
    registry: Registry,
    requests_total: CounterVec,
    faults_injected_total: CounterVec,
    injected_latency_ms: HistogramVec,
}

impl ChaosMetrics {
    /// Build a fresh, independently registered metrics set.
    pub fn new() -> crate::error::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("elspeth_chaos_requests_total", "Total requests handled by the chaos harness"),
            &["harness", "outcome"],
        )?;
        let faults_injected_total = CounterVec::new(
            Opts::new("elspeth_chaos_faults_injected_total", "Total faults injected by category"),
            &["harness", "category"],
        )?;
        let injected_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "elspeth_chaos_injected_latency_ms",
                "Artificial latency applied before responding, in milliseconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["harness"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(faults_injected_total.clone()))?;
        registry.register(Box::new(injected_latency_ms.clone()))?;

        Ok(Self { registry, requests_total, faults_injected_total, injected_latency_ms })
    }

    /// Record a successfully served request.
    pub fn record_success(&self, harness: &str) {
        self.requests_total.with_label_values(&[harness, "success"]).inc();
    }

    /// Record a request that was served with an injected fault.
    pub fn record_fault(&self, harness: &str, category: &str) {
        self.requests_total.with_label_values(&[harness, "fault"]).inc();
        self.faults_injected_total.with_label_values(&[harness, category]).inc();
    }

    /// Record artificial latency applied to a response.
    pub fn record_latency(&self, harness: &str, millis: f64) {
        self.injected_latency_ms.with_label_values(&[harness]).observe(millis);
    }

    /// Render the current metrics in Prometheus text exposition format.
    pub fn encode(&self) -> crate::error::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).map_err(crate::error::ChaosError::Metrics)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
