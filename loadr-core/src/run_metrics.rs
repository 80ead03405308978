use std::time::Duration;

use loadr_metrics::{MetricId, MetricKind, Registry, TagSet};

/// Metric names for samples the runtime records on its own. Everything is
/// recorded twice: once on the untagged base series (what thresholds read)
/// and once tagged with the owning scenario.
#[derive(Debug, Clone, Copy)]
pub struct RunMetricIds {
    pub iterations_total: MetricId,
    /// Iteration wall time in milliseconds.
    pub iteration_duration_ms: MetricId,
    pub iteration_errors_total: MetricId,
    /// Tickets dropped because the pool was at `max_vus`.
    pub dropped_iterations_total: MetricId,
    pub requests_total: MetricId,
    pub request_errors_total: MetricId,
    /// Request latency in milliseconds.
    pub request_latency_ms: MetricId,
    /// Request failure rate (transport error or status >= 400).
    pub errors: MetricId,
}

#[derive(Debug, Clone, Copy)]
pub struct IterationSample<'a> {
    pub scenario: &'a str,
    pub success: bool,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestSample<'a> {
    pub scenario: &'a str,
    /// Status code; 0 means the target was unreachable (transport error).
    pub status: u16,
    pub failed: bool,
    pub latency: Duration,
    pub error_kind: Option<&'a str>,
}

impl RunMetricIds {
    pub fn register(metrics: &Registry) -> Self {
        Self {
            iterations_total: metrics.register("iterations_total", MetricKind::Counter),
            iteration_duration_ms: metrics.register("iteration_duration_ms", MetricKind::Trend),
            iteration_errors_total: metrics
                .register("iteration_errors_total", MetricKind::Counter),
            dropped_iterations_total: metrics
                .register("dropped_iterations_total", MetricKind::Counter),
            requests_total: metrics.register("requests_total", MetricKind::Counter),
            request_errors_total: metrics.register("request_errors_total", MetricKind::Counter),
            request_latency_ms: metrics.register("request_latency_ms", MetricKind::Trend),
            errors: metrics.register("errors", MetricKind::Rate),
        }
    }

    fn record_counter(&self, metrics: &Registry, id: MetricId, scenario: &str, n: u64) {
        if let Some(h) = metrics.base_handle(id) {
            h.increment(n);
        }
        if let Some(h) = metrics.handle(id, TagSet::from_pairs([("scenario", scenario)])) {
            h.increment(n);
        }
    }

    fn record_trend(&self, metrics: &Registry, id: MetricId, scenario: &str, value: Duration) {
        if let Some(h) = metrics.base_handle(id) {
            h.observe(value);
        }
        if let Some(h) = metrics.handle(id, TagSet::from_pairs([("scenario", scenario)])) {
            h.observe(value);
        }
    }

    pub fn record_iteration(&self, metrics: &Registry, sample: IterationSample<'_>) {
        self.record_counter(metrics, self.iterations_total, sample.scenario, 1);
        self.record_trend(
            metrics,
            self.iteration_duration_ms,
            sample.scenario,
            sample.duration,
        );
        if !sample.success {
            self.record_iteration_error(metrics, sample.scenario, "error");
        }
    }

    pub fn record_iteration_error(&self, metrics: &Registry, scenario: &str, kind: &str) {
        let id = self.iteration_errors_total;
        if let Some(h) = metrics.base_handle(id) {
            h.increment(1);
        }
        let tags = TagSet::from_pairs([("scenario", scenario), ("error_kind", kind)]);
        if let Some(h) = metrics.handle(id, tags) {
            h.increment(1);
        }
    }

    pub fn record_dropped(&self, metrics: &Registry, scenario: &str, n: u64) {
        self.record_counter(metrics, self.dropped_iterations_total, scenario, n);
    }

    pub fn record_request(&self, metrics: &Registry, sample: RequestSample<'_>) {
        self.record_counter(metrics, self.requests_total, sample.scenario, 1);
        self.record_trend(
            metrics,
            self.request_latency_ms,
            sample.scenario,
            sample.latency,
        );

        if let Some(h) = metrics.base_handle(self.errors) {
            h.add_bool(sample.failed);
        }
        if let Some(h) = metrics.handle(
            self.errors,
            TagSet::from_pairs([("scenario", sample.scenario)]),
        ) {
            h.add_bool(sample.failed);
        }

        if sample.failed {
            let id = self.request_errors_total;
            if let Some(h) = metrics.base_handle(id) {
                h.increment(1);
            }
            let status = sample.status.to_string();
            let mut pairs = vec![("scenario", sample.scenario), ("status", status.as_str())];
            if let Some(kind) = sample.error_kind {
                pairs.push(("error_kind", kind));
            }
            if let Some(h) = metrics.handle(id, TagSet::from_pairs(pairs)) {
                h.increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadr_metrics::MetricValue;

    fn base<'a>(
        snapshot: &'a [loadr_metrics::MetricSeriesSummary],
        name: &str,
    ) -> &'a loadr_metrics::MetricSeriesSummary {
        snapshot
            .iter()
            .find(|s| s.name == name && s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing base series for {name}"))
    }

    #[test]
    fn iteration_samples_feed_base_and_scenario_series() {
        let metrics = Registry::default();
        let ids = RunMetricIds::register(&metrics);

        ids.record_iteration(
            &metrics,
            IterationSample {
                scenario: "normal",
                success: true,
                duration: Duration::from_millis(12),
            },
        );
        ids.record_iteration(
            &metrics,
            IterationSample {
                scenario: "normal",
                success: false,
                duration: Duration::from_millis(20),
            },
        );

        let snapshot = metrics.snapshot();
        assert!(matches!(
            base(&snapshot, "iterations_total").values,
            MetricValue::Counter(2)
        ));
        assert!(matches!(
            base(&snapshot, "iteration_errors_total").values,
            MetricValue::Counter(1)
        ));

        let tagged = snapshot
            .iter()
            .find(|s| s.name == "iterations_total" && !s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing scenario series"));
        assert_eq!(
            tagged.tags,
            vec![("scenario".to_string(), "normal".to_string())]
        );
    }

    #[test]
    fn failed_requests_raise_error_rate_and_status_series() {
        let metrics = Registry::default();
        let ids = RunMetricIds::register(&metrics);

        ids.record_request(
            &metrics,
            RequestSample {
                scenario: "normal",
                status: 200,
                failed: false,
                latency: Duration::from_millis(5),
                error_kind: None,
            },
        );
        ids.record_request(
            &metrics,
            RequestSample {
                scenario: "normal",
                status: 0,
                failed: true,
                latency: Duration::from_millis(1),
                error_kind: Some("connect"),
            },
        );

        let snapshot = metrics.snapshot();
        let MetricValue::Rate { total, hits, rate } = base(&snapshot, "errors").values else {
            panic!("expected rate series");
        };
        assert_eq!((total, hits), (2, 1));
        assert_eq!(rate, Some(0.5));

        let by_status = snapshot
            .iter()
            .find(|s| s.name == "request_errors_total" && !s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing status series"));
        assert!(
            by_status
                .tags
                .contains(&("status".to_string(), "0".to_string()))
        );
        assert!(
            by_status
                .tags
                .contains(&("error_kind".to_string(), "connect".to_string()))
        );
    }
}
