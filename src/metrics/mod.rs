// Prometheus metrics
//
// One process-wide set of collectors in a private registry, exported in the
// text exposition format at `/metrics`:
// - request outcomes per route class and reason code
// - deliveries per type and cache path, with latency
// - watermark cache operations and composite latency
// - rate limit rejections, detector verdicts, dropped access events

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    registry: Registry,

    /// Requests by route class and outcome ("ok" or a reason code)
    pub requests: IntCounterVec,

    /// Successful deliveries by delivery type and cache path
    pub deliveries: IntCounterVec,

    /// End-to-end request latency in seconds, by delivery type
    pub request_duration: HistogramVec,

    /// Watermark cache operations (hit, miss, generation, ...)
    pub cache_operations: IntCounterVec,

    /// Time spent compositing one image, in seconds
    pub composite_duration: Histogram,

    /// Rejections by route class
    pub rate_limit_rejections: IntCounterVec,

    /// Detector verdicts (ok, suspicious, block)
    pub detector_verdicts: IntCounterVec,

    /// Access events dropped because the log channel was full or closed
    pub access_events_dropped: IntCounter,

    /// Retried storage reads
    pub storage_retries: IntCounter,
}

impl Metrics {
    /// Process-wide metrics, created on first use
    pub fn global() -> &'static Self {
        METRICS.get_or_init(|| match Self::build() {
            Ok(metrics) => metrics,
            // Collector names and labels are static; registration into a
            // fresh registry cannot collide.
            Err(e) => unreachable!("invalid metric definition: {}", e),
        })
    }

    fn build() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("kagami_requests_total", "Content requests by route class and outcome"),
            &["route_class", "outcome"],
        )?;
        let deliveries = IntCounterVec::new(
            Opts::new("kagami_deliveries_total", "Delivered responses by type and cache path"),
            &["delivery_type", "cache"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "kagami_request_duration_seconds",
                "End-to-end request latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["delivery_type"],
        )?;
        let cache_operations = IntCounterVec::new(
            Opts::new(
                "kagami_watermark_cache_operations_total",
                "Watermark cache operations by type",
            ),
            &["operation"],
        )?;
        let composite_duration = Histogram::with_opts(
            HistogramOpts::new(
                "kagami_watermark_composite_duration_seconds",
                "Duration of one composite in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )?;
        let rate_limit_rejections = IntCounterVec::new(
            Opts::new("kagami_rate_limit_rejections_total", "Requests rejected by quota"),
            &["route_class"],
        )?;
        let detector_verdicts = IntCounterVec::new(
            Opts::new("kagami_detector_verdicts_total", "Anti-scraping verdicts"),
            &["verdict"],
        )?;
        let access_events_dropped = IntCounter::new(
            "kagami_access_events_dropped_total",
            "Access events dropped before reaching the log",
        )?;
        let storage_retries = IntCounter::new(
            "kagami_storage_retries_total",
            "Storage reads retried after a transient failure",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(cache_operations.clone()))?;
        registry.register(Box::new(composite_duration.clone()))?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;
        registry.register(Box::new(detector_verdicts.clone()))?;
        registry.register(Box::new(access_events_dropped.clone()))?;
        registry.register(Box::new(storage_retries.clone()))?;

        Ok(Self {
            registry,
            requests,
            deliveries,
            request_duration,
            cache_operations,
            composite_duration,
            rate_limit_rejections,
            detector_verdicts,
            access_events_dropped,
            storage_retries,
        })
    }

    pub fn record_request(&self, route_class: &str, outcome: &str) {
        self.requests.with_label_values(&[route_class, outcome]).inc();
    }

    pub fn record_delivery(&self, delivery_type: &str, cache: &str, started: Instant) {
        self.deliveries.with_label_values(&[delivery_type, cache]).inc();
        self.request_duration
            .with_label_values(&[delivery_type])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn record_cache_operation(&self, operation: &str) {
        self.cache_operations.with_label_values(&[operation]).inc();
    }

    /// Start timing a composite; the duration is recorded when the timer drops.
    pub fn start_composite_timer(&self) -> HistogramTimer {
        HistogramTimer {
            histogram: self.composite_duration.clone(),
            start: Instant::now(),
        }
    }

    pub fn record_rate_limit_rejection(&self, route_class: &str) {
        self.rate_limit_rejections.with_label_values(&[route_class]).inc();
    }

    pub fn record_detector_verdict(&self, verdict: &str) {
        self.detector_verdicts.with_label_values(&[verdict]).inc();
    }

    /// Prometheus text exposition of every collector
    pub fn export_prometheus(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// RAII timer for histogram metrics
///
/// Records the elapsed time when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_singleton() {
        let a = Metrics::global() as *const Metrics;
        let b = Metrics::global() as *const Metrics;
        assert_eq!(a, b);
    }

    #[test]
    fn test_counters_increment() {
        // Global counters are shared with other tests; compare deltas.
        let metrics = Metrics::global();
        let before = metrics
            .rate_limit_rejections
            .with_label_values(&["download"])
            .get();
        metrics.record_rate_limit_rejection("download");
        let after = metrics
            .rate_limit_rejections
            .with_label_values(&["download"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = Metrics::global();
        metrics.record_request("image_view", "ok");
        metrics.record_cache_operation("hit");
        drop(metrics.start_composite_timer());

        let output = metrics.export_prometheus();
        assert!(output.contains("kagami_requests_total"));
        assert!(output.contains("kagami_watermark_cache_operations_total{operation=\"hit\"}"));
        assert!(output.contains("kagami_watermark_composite_duration_seconds_count"));
    }
}
