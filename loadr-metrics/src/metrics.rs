use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trend values are stored microsecond-scaled so millisecond samples keep
/// three decimal places through the integer histogram.
const TREND_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Monotonic count of events.
    Counter,
    /// Boolean samples summarized as hits/total.
    Rate,
    /// Duration-like samples with streaming percentile estimation.
    Trend,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(u64),
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Trend(TrendSummary),
}

/// Point-in-time aggregate of a trend series, values in milliseconds.
///
/// Percentiles come from an hdrhistogram with 3 significant figures over a
/// 1µs..1h range: relative error per recorded value is at most 0.1%, with
/// fixed memory regardless of sample count.
#[derive(Debug, Clone)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    /// Percentiles 1..=99, values in milliseconds.
    pub distribution: Vec<(u8, f64)>,
}

impl TrendSummary {
    /// Look up an integer percentile from the recorded distribution.
    /// `p == 100` maps to the observed max.
    pub fn percentile(&self, p: u8) -> Option<f64> {
        if p == 100 {
            return self.max;
        }
        self.distribution
            .iter()
            .find(|(q, _)| *q == p)
            .map(|(_, v)| *v)
    }
}

pub(crate) fn new_trend_histogram() -> Histogram<u64> {
    // Upper bound: 1 hour, microsecond-scaled.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

pub(crate) fn summarize_trend(h: &Histogram<u64>) -> TrendSummary {
    let count = h.len();
    let unscale = |v: u64| v as f64 / TREND_SCALE;

    let distribution = if count == 0 {
        Vec::new()
    } else {
        (1..=99u8)
            .map(|p| (p, unscale(h.value_at_quantile(f64::from(p) / 100.0))))
            .collect()
    };

    TrendSummary {
        count,
        min: (count > 0).then(|| unscale(h.min())),
        max: (count > 0).then(|| unscale(h.max())),
        mean: (count > 0).then(|| h.mean() / TREND_SCALE),
        stdev: (count > 0).then(|| h.stdev() / TREND_SCALE),
        p50: (count > 0).then(|| unscale(h.value_at_quantile(0.50))),
        p90: (count > 0).then(|| unscale(h.value_at_quantile(0.90))),
        p95: (count > 0).then(|| unscale(h.value_at_quantile(0.95))),
        p99: (count > 0).then(|| unscale(h.value_at_quantile(0.99))),
        distribution,
    }
}

#[derive(Debug)]
pub enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Rate(Arc<Rate>),
    Trend(Arc<Mutex<Histogram<u64>>>),
}

#[derive(Debug, Default)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

impl MetricStorage {
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricStorage::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Rate => MetricStorage::Rate(Arc::new(Rate::default())),
            MetricKind::Trend => MetricStorage::Trend(Arc::new(Mutex::new(new_trend_histogram()))),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            MetricStorage::Counter(c) => MetricHandle::Counter(c.clone()),
            MetricStorage::Rate(r) => MetricHandle::Rate(r.clone()),
            MetricStorage::Trend(h) => MetricHandle::Trend(h.clone()),
        }
    }

    pub(crate) fn summarize(&self) -> MetricValue {
        match self {
            MetricStorage::Counter(c) => MetricValue::Counter(c.load(Ordering::Relaxed)),
            MetricStorage::Rate(r) => {
                let total = r.total.load(Ordering::Relaxed);
                let hits = r.hits.load(Ordering::Relaxed);
                let rate = (total > 0).then(|| hits as f64 / total as f64);
                MetricValue::Rate { total, hits, rate }
            }
            MetricStorage::Trend(h) => MetricValue::Trend(summarize_trend(&h.lock())),
        }
    }
}

/// Cheap clonable writer for one series. Writes are a single atomic op for
/// counters and rates, and a short per-series lock for trends; no write path
/// takes a registry-wide lock.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Rate(Arc<Rate>),
    Trend(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    #[inline]
    pub fn increment(&self, value: u64) {
        if let MetricHandle::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_bool(&self, hit: bool) {
        if let MetricHandle::Rate(r) = self {
            r.total.fetch_add(1, Ordering::Relaxed);
            if hit {
                r.hits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a millisecond value into a trend. Non-finite and negative
    /// values are ignored; sub-resolution values clamp to the histogram floor.
    #[inline]
    pub fn observe_ms(&self, value_ms: f64) {
        if let MetricHandle::Trend(h) = self {
            if !value_ms.is_finite() || value_ms < 0.0 {
                return;
            }
            let scaled = ((value_ms * TREND_SCALE).round() as u64).max(1);
            let _ = h.lock().record(scaled);
        }
    }

    #[inline]
    pub fn observe(&self, value: Duration) {
        self.observe_ms(value.as_secs_f64() * 1000.0);
    }
}

impl MetricHandle {
    pub fn counter_value(&self) -> u64 {
        if let MetricHandle::Counter(c) = self {
            c.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn rate_value(&self) -> (u64, u64) {
        if let MetricHandle::Rate(r) = self {
            (
                r.total.load(Ordering::Relaxed),
                r.hits.load(Ordering::Relaxed),
            )
        } else {
            (0, 0)
        }
    }
}
