use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricStorage};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: Arc<str>,
    kind: MetricKind,
}

/// Concurrent metric registry.
///
/// Registration and lookup go through a short read-write lock on the
/// definition table; sample recording goes through per-series handles and
/// never serializes writers against each other (see [`MetricHandle`]).
#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Register a metric by name. Registration is idempotent: re-registering
    /// an existing name returns the original id (first kind wins).
    pub fn register(&self, name: &str, kind: MetricKind) -> MetricId {
        let mut defs = self.defs.write();
        if let Some((idx, _)) = defs
            .iter()
            .enumerate()
            .find(|(_, d)| d.name.as_ref() == name)
        {
            return MetricId(idx as u32);
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: Arc::from(name),
            kind,
        });
        self.storage.insert(id, DashMap::new());
        id
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name.as_ref() == name)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        let defs = self.defs.read();
        defs.get(metric.0 as usize).map(|d| d.kind)
    }

    /// Get a writer handle for one series of a metric, creating the series
    /// on first use.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(&tags) {
            return Some(storage.handle());
        }

        let kind = self.kind(metric)?;

        // Entry API keeps racing creators from dropping each other's samples.
        let entry = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind));
        Some(entry.handle())
    }

    /// Untagged base series handle, the one thresholds evaluate against.
    pub fn base_handle(&self, metric: MetricId) -> Option<MetricHandle> {
        self.handle(metric, TagSet::EMPTY)
    }

    /// Consistent point-in-time copy of every series aggregate.
    ///
    /// Taken while workers are still recording this is eventually consistent
    /// per series; taken after the run has drained it is exact.
    pub fn snapshot(&self) -> Vec<MetricSeriesSummary> {
        let defs = self.defs.read();
        let mut out = Vec::new();

        for entry in self.storage.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };

            for series in entry.value().iter() {
                out.push(MetricSeriesSummary {
                    name: def.name.to_string(),
                    kind: def.kind,
                    tags: series.key().to_pairs(),
                    values: series.value().summarize(),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }

    /// Snapshot every series of one metric (base series first).
    pub fn snapshot_metric(&self, name: &str) -> Vec<MetricSeriesSummary> {
        let Some((id, kind)) = self.lookup(name) else {
            return Vec::new();
        };
        let Some(series_map) = self.storage.get(&id) else {
            return Vec::new();
        };

        let mut out: Vec<MetricSeriesSummary> = series_map
            .iter()
            .map(|series| MetricSeriesSummary {
                name: name.to_string(),
                kind,
                tags: series.key().to_pairs(),
                values: series.value().summarize(),
            })
            .collect();
        out.sort_by(|a, b| a.tags.cmp(&b.tags));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn register_is_idempotent() {
        let reg = Registry::default();
        let a = reg.register("iterations_total", MetricKind::Counter);
        let b = reg.register("iterations_total", MetricKind::Counter);
        assert_eq!(a, b);
        assert_eq!(reg.lookup("iterations_total"), Some((a, MetricKind::Counter)));
        assert_eq!(reg.lookup("nope"), None);
    }

    #[test]
    fn tagged_and_base_series_are_distinct() {
        let reg = Registry::default();
        let id = reg.register("requests_total", MetricKind::Counter);

        if let Some(h) = reg.base_handle(id) {
            h.increment(1);
        }
        if let Some(h) = reg.handle(id, TagSet::from_pairs([("scenario", "ramp")])) {
            h.increment(2);
        }

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 2);

        let base = snapshot
            .iter()
            .find(|s| s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing base series"));
        let tagged = snapshot
            .iter()
            .find(|s| !s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing tagged series"));

        assert!(matches!(base.values, MetricValue::Counter(1)));
        assert!(matches!(tagged.values, MetricValue::Counter(2)));
        assert_eq!(
            tagged.tags,
            vec![("scenario".to_string(), "ramp".to_string())]
        );
    }

    #[test]
    fn snapshot_metric_returns_only_that_metric() {
        let reg = Registry::default();
        let a = reg.register("a", MetricKind::Counter);
        let _b = reg.register("b", MetricKind::Counter);

        if let Some(h) = reg.base_handle(a) {
            h.increment(7);
        }
        if let Some(h) = reg.handle(a, TagSet::from_pairs([("scenario", "x")])) {
            h.increment(1);
        }

        let series = reg.snapshot_metric("a");
        assert_eq!(series.len(), 2);
        assert!(series.iter().all(|s| s.name == "a"));
        // Base series sorts first.
        assert!(series[0].tags.is_empty());
        assert!(reg.snapshot_metric("missing").is_empty());
    }

    #[test]
    fn concurrent_counter_records_lose_no_updates() {
        const WORKERS: usize = 8;
        const PER_WORKER: u64 = 10_000;

        let reg = Arc::new(Registry::default());
        let id = reg.register("hits", MetricKind::Counter);

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..PER_WORKER {
                        if let Some(h) = reg.base_handle(id) {
                            h.increment(1);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            let _ = h.join();
        }

        let snapshot = reg.snapshot();
        let s = snapshot
            .iter()
            .find(|s| s.name == "hits")
            .unwrap_or_else(|| panic!("missing counter"));
        assert!(matches!(
            s.values,
            MetricValue::Counter(v) if v == WORKERS as u64 * PER_WORKER
        ));
    }

    #[test]
    fn concurrent_trend_records_lose_no_updates() {
        const WORKERS: usize = 4;
        const PER_WORKER: u64 = 1_000;

        let reg = Arc::new(Registry::default());
        let id = reg.register("latency_ms", MetricKind::Trend);

        let handles: Vec<_> = (0..WORKERS)
            .map(|w| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_WORKER {
                        if let Some(h) = reg.base_handle(id) {
                            h.observe_ms((w as u64 * PER_WORKER + i) as f64 % 50.0 + 1.0);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            let _ = h.join();
        }

        let snapshot = reg.snapshot();
        let s = snapshot
            .iter()
            .find(|s| s.name == "latency_ms")
            .unwrap_or_else(|| panic!("missing trend"));
        let MetricValue::Trend(t) = &s.values else {
            panic!("expected trend values");
        };
        assert_eq!(t.count, WORKERS as u64 * PER_WORKER);
    }
}
