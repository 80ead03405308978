pub mod metrics;
pub mod registry;
pub mod tags;

pub use metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, TrendSummary};
pub use registry::{MetricId, Registry};
pub use tags::TagSet;
