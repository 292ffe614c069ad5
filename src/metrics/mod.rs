use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Message consumption (throughput, rejections, commit failures)
// - The write path (persist successes/failures, latency)
// - The read path (cache and store hit ratios)
//
// Exposed in text format on GET /metrics of the API server.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Consumption
    pub messages_consumed: IntCounter,
    pub messages_rejected: IntCounterVec,
    pub offset_commit_failures: IntCounter,
    pub broker_errors: IntCounter,

    // Write path
    pub orders_persisted: IntCounter,
    pub store_failures: IntCounterVec,
    pub ingest_duration: HistogramVec,

    // Read path
    pub cache_lookups: IntCounterVec,
    pub store_lookups: IntCounterVec,
    pub cache_entries: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_consumed =
            IntCounter::new("messages_consumed_total", "Total messages received from the order topic")?;
        registry.register(Box::new(messages_consumed.clone()))?;

        let messages_rejected = IntCounterVec::new(
            Opts::new("messages_rejected_total", "Messages skipped without commit"),
            &["reason"],
        )?;
        registry.register(Box::new(messages_rejected.clone()))?;

        let offset_commit_failures =
            IntCounter::new("offset_commit_failures_total", "Offset commits rejected by the broker")?;
        registry.register(Box::new(offset_commit_failures.clone()))?;

        let broker_errors =
            IntCounter::new("broker_errors_total", "Errors reported by the consumer main queue")?;
        registry.register(Box::new(broker_errors.clone()))?;

        let orders_persisted =
            IntCounter::new("orders_persisted_total", "Orders durably saved and cached")?;
        registry.register(Box::new(orders_persisted.clone()))?;

        let store_failures = IntCounterVec::new(
            Opts::new("store_failures_total", "Order store operations that failed"),
            &["operation"],
        )?;
        registry.register(Box::new(store_failures.clone()))?;

        let ingest_duration = HistogramVec::new(
            HistogramOpts::new("ingest_duration_seconds", "Time to decode, persist and cache one message")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_duration.clone()))?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Cache lookups on the read path"),
            &["result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let store_lookups = IntCounterVec::new(
            Opts::new("order_store_lookups_total", "Store fallbacks after a cache miss"),
            &["result"],
        )?;
        registry.register(Box::new(store_lookups.clone()))?;

        let cache_entries = IntGauge::new("cache_entries", "Orders currently held in the cache")?;
        registry.register(Box::new(cache_entries.clone()))?;

        Ok(Self {
            registry,
            messages_consumed,
            messages_rejected,
            offset_commit_failures,
            broker_errors,
            orders_persisted,
            store_failures,
            ingest_duration,
            cache_lookups,
            store_lookups,
            cache_entries,
        })
    }

    /// Helper to record one handled message
    pub fn record_ingest(&self, duration_secs: f64, outcome: &str) {
        self.ingest_duration.with_label_values(&[outcome]).observe(duration_secs);
    }

    pub fn record_rejection(&self, reason: &str) {
        self.messages_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_store_failure(&self, operation: &str) {
        self.store_failures.with_label_values(&[operation]).inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_store_lookup(&self, result: &str) {
        self.store_lookups.with_label_values(&[result]).inc();
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self, cache_entries: usize) -> prometheus::Result<Vec<u8>> {
        self.cache_entries.set(cache_entries as i64);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
