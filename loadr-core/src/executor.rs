use std::sync::Arc;
use std::time::{Duration, Instant};

use loadr_http::{HttpClient, HttpRequest, HttpResponse};
use loadr_metrics::{MetricKind, Registry, TagSet};

use crate::run_metrics::{IterationSample, RequestSample, RunMetricIds};

/// One "an iteration should begin now" signal from the scheduler. Tagged with
/// the owning scenario and a per-scenario monotonic sequence number; consumed
/// by exactly one worker.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub scenario: Arc<str>,
    pub seq: u64,
}

/// Everything an iteration function gets to work with: the ticket that
/// started it, the worker slot identity, the HTTP client, and the metric
/// collector.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub(crate) ticket: Ticket,
    pub(crate) worker_id: u64,
    pub(crate) client: Arc<HttpClient>,
    pub(crate) metrics: Arc<Registry>,
    pub(crate) ids: RunMetricIds,
}

impl IterationContext {
    pub fn scenario(&self) -> &str {
        &self.ticket.scenario
    }

    /// Per-scenario iteration sequence number (starts at 0).
    pub fn iteration(&self) -> u64 {
        self.ticket.seq
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn metrics(&self) -> &Registry {
        &self.metrics
    }

    /// Issue a request and record its outcome (`requests_total`,
    /// `request_latency_ms`, `errors`, and on failure
    /// `request_errors_total`).
    ///
    /// Transport errors are data, not control flow: they are recorded with
    /// status 0 and handed back so the iteration can react, but the error
    /// metric accounting has already happened.
    pub async fn http(&self, req: HttpRequest) -> loadr_http::Result<HttpResponse> {
        let started = Instant::now();
        let res = self.client.request(req).await;

        match &res {
            Ok(response) => {
                self.ids.record_request(
                    &self.metrics,
                    RequestSample {
                        scenario: self.scenario(),
                        status: response.status,
                        failed: response.status >= 400,
                        latency: response.elapsed,
                        error_kind: None,
                    },
                );
            }
            Err(err) => {
                let kind = err.kind().to_string();
                self.ids.record_request(
                    &self.metrics,
                    RequestSample {
                        scenario: self.scenario(),
                        status: 0,
                        failed: true,
                        latency: started.elapsed(),
                        error_kind: Some(kind.as_str()),
                    },
                );
            }
        }

        res
    }

    /// Record a millisecond sample into a user-defined trend metric,
    /// registering the metric on first use.
    pub fn trend(&self, name: &str, value_ms: f64) {
        let id = self.metrics.register(name, MetricKind::Trend);
        if let Some(h) = self.metrics.base_handle(id) {
            h.observe_ms(value_ms);
        }
        if let Some(h) = self.metrics.handle(id, self.scenario_tags()) {
            h.observe_ms(value_ms);
        }
    }

    /// Record a boolean sample into a user-defined rate metric.
    pub fn rate(&self, name: &str, hit: bool) {
        let id = self.metrics.register(name, MetricKind::Rate);
        if let Some(h) = self.metrics.base_handle(id) {
            h.add_bool(hit);
        }
        if let Some(h) = self.metrics.handle(id, self.scenario_tags()) {
            h.add_bool(hit);
        }
    }

    /// Bump a user-defined counter metric.
    pub fn counter(&self, name: &str, n: u64) {
        let id = self.metrics.register(name, MetricKind::Counter);
        if let Some(h) = self.metrics.base_handle(id) {
            h.increment(n);
        }
        if let Some(h) = self.metrics.handle(id, self.scenario_tags()) {
            h.increment(n);
        }
    }

    fn scenario_tags(&self) -> TagSet {
        TagSet::from_pairs([("scenario", self.scenario())])
    }
}

/// Run the user iteration function once for a dispatched ticket.
///
/// An `Err` from the function is an iteration-level failure: recorded,
/// never propagated. Panics unwind past this frame and are accounted at the
/// scheduler's join boundary; the worker slot comes back via its drop guard
/// either way.
pub(crate) async fn run_iteration<F, Fut, E>(ctx: IterationContext, iteration: F)
where
    F: FnOnce(IterationContext) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: std::error::Error,
{
    let scenario = ctx.ticket.scenario.clone();
    let metrics = ctx.metrics.clone();
    let ids = ctx.ids;

    let started = Instant::now();
    let result = iteration(ctx).await;
    let duration = started.elapsed();

    if let Err(err) = &result {
        tracing::debug!(scenario = scenario.as_ref(), error = %err, "iteration failed");
    }

    ids.record_iteration(
        &metrics,
        IterationSample {
            scenario: &scenario,
            success: result.is_ok(),
            duration: duration.max(Duration::from_nanos(1)),
        },
    );
}
