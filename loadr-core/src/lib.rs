mod config;
mod error;
mod executor;
mod orchestrator;
mod pool;
mod progress;
mod report;
mod run_metrics;
mod schedule;
mod scheduler;
mod signal;
mod thresholds;

pub use config::{ArrivalExecutor, ExecutorKind, ScenarioSpec, Stage};
pub use error::{Error, Result};
pub use executor::{IterationContext, Ticket};
pub use orchestrator::{RunHandle, RunOptions, RunState, Runner};
pub use pool::{CapacityExceeded, Worker, WorkerGuard, WorkerPool};
pub use progress::{RunProgress, ScenarioProgress, StageProgress};
pub use report::{ExitCode, RunReport};
pub use run_metrics::{IterationSample, RequestSample, RunMetricIds};
pub use schedule::{ArrivalSchedule, StageSnapshot};
pub use signal::StopSignal;
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdOutcome, ThresholdSet, evaluate_thresholds,
    parse_threshold_expr, validate_thresholds,
};

pub use loadr_http::{HttpClient, HttpRequest, HttpResponse};
pub use loadr_metrics::{MetricKind, MetricSeriesSummary, MetricValue, Registry};
