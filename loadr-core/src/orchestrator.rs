use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Instant;

use loadr_http::HttpClient;
use loadr_metrics::Registry;

use crate::config::ScenarioSpec;
use crate::error::{Error, Result};
use crate::executor::IterationContext;
use crate::progress::{RunProgress, ScenarioProgress, StageProgress};
use crate::report::RunReport;
use crate::run_metrics::RunMetricIds;
use crate::scheduler::{ScenarioRuntime, drive_scenario};
use crate::signal::StopSignal;
use crate::thresholds::{ThresholdSet, evaluate_thresholds, validate_thresholds};

/// Lifecycle of a run. `Stopped` is terminal and triggers the final snapshot
/// plus threshold evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
    Stopped = 4,
}

impl RunState {
    fn from_u8(v: u8) -> RunState {
        match v {
            0 => RunState::Idle,
            1 => RunState::Starting,
            2 => RunState::Running,
            3 => RunState::Draining,
            _ => RunState::Stopped,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(RunState::Idle as u8))
    }

    fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn advance(&self, from: RunState, to: RunState) -> bool {
        if from == RunState::Stopped {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `to` from any state except terminal `Stopped`.
    fn force(&self, to: RunState) {
        let mut cur = self.0.load(Ordering::Acquire);
        while cur != RunState::Stopped as u8 {
            match self.0.compare_exchange_weak(
                cur,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(v) => cur = v,
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub thresholds: Vec<ThresholdSet>,
}

/// Cloneable control surface for an in-flight run: observe the lifecycle
/// state, pull progress, or stop the run from outside.
#[derive(Debug, Clone)]
pub struct RunHandle {
    state: Arc<StateCell>,
    stop: Arc<StopSignal>,
    runtimes: Arc<[Arc<ScenarioRuntime>]>,
}

impl RunHandle {
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Stop the run: every scheduler stops emitting immediately, in-flight
    /// iterations get their scenario's grace period, recorded samples are
    /// retained.
    pub fn stop(&self) {
        self.state.force(RunState::Draining);
        self.stop.stop();
    }

    pub fn progress(&self) -> RunProgress {
        let scenarios = self
            .runtimes
            .iter()
            .map(|rt| {
                let elapsed = rt.started_at.get().map(Instant::elapsed);
                let stage = elapsed
                    .and_then(|e| rt.schedule.stage_snapshot_at(e))
                    .map(|st| StageProgress {
                        stage: st.index + 1,
                        stages: st.count,
                        stage_elapsed: st.stage_elapsed,
                        stage_remaining: st.stage_remaining,
                        start_target: st.start_target,
                        end_target: st.end_target,
                    });

                ScenarioProgress {
                    scenario: rt.name.to_string(),
                    elapsed,
                    current_target: elapsed.map(|e| rt.schedule.target_at(e)).unwrap_or(0),
                    emitted_total: rt.emitted.load(Ordering::Relaxed),
                    dropped_total: rt.dropped.load(Ordering::Relaxed),
                    live_workers: rt.pool.live(),
                    busy_workers: rt.pool.busy(),
                    max_workers: rt.pool.max_vus(),
                    stage,
                }
            })
            .collect();

        RunProgress {
            state: self.state(),
            scenarios,
        }
    }
}

/// Owns the scenario set and the metric collector for the lifetime of one
/// run, and drives the lifecycle:
/// `Idle -> Starting -> Running -> Draining -> Stopped`.
#[derive(Debug)]
pub struct Runner {
    state: Arc<StateCell>,
    stop: Arc<StopSignal>,
    runtimes: Vec<Arc<ScenarioRuntime>>,
    thresholds: Vec<ThresholdSet>,
    metrics: Arc<Registry>,
    ids: RunMetricIds,
    client: Arc<HttpClient>,
}

impl Runner {
    /// Validate the whole configuration and build the run. Any invalid spec
    /// or threshold expression fails here, before a single ticket exists.
    pub fn new(scenarios: Vec<ScenarioSpec>, options: RunOptions) -> Result<Self> {
        for (i, spec) in scenarios.iter().enumerate() {
            spec.validate()?;
            if scenarios[..i].iter().any(|other| other.name == spec.name) {
                return Err(Error::DuplicateScenario(spec.name.clone()));
            }
        }
        validate_thresholds(&options.thresholds)?;

        let metrics = Arc::new(Registry::default());
        let ids = RunMetricIds::register(&metrics);
        let runtimes = scenarios
            .iter()
            .map(|spec| Arc::new(ScenarioRuntime::new(spec)))
            .collect();

        Ok(Self {
            state: Arc::new(StateCell::new()),
            stop: Arc::new(StopSignal::new()),
            runtimes,
            thresholds: options.thresholds,
            metrics,
            ids,
            client: Arc::new(HttpClient::default()),
        })
    }

    /// Swap in a preconfigured HTTP client (timeouts, connector tuning).
    #[must_use]
    pub fn with_client(mut self, client: Arc<HttpClient>) -> Self {
        self.client = client;
        self
    }

    pub fn metrics(&self) -> Arc<Registry> {
        self.metrics.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            state: self.state.clone(),
            stop: self.stop.clone(),
            runtimes: self.runtimes.clone().into(),
        }
    }

    /// Execute the run to completion and produce the final report.
    ///
    /// `iteration` is invoked once per scheduled ticket, across all
    /// scenarios; it can branch on [`IterationContext::scenario`].
    pub async fn run<F, Fut, E>(self, iteration: F) -> Result<RunReport>
    where
        F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.state.advance(RunState::Idle, RunState::Starting);
        tracing::info!(scenarios = self.runtimes.len(), "run starting");

        let origin = Instant::now();
        let emitting = Arc::new(AtomicUsize::new(self.runtimes.len()));

        let mut drivers = Vec::with_capacity(self.runtimes.len());
        for rt in &self.runtimes {
            let rt = rt.clone();
            let client = self.client.clone();
            let metrics = self.metrics.clone();
            let ids = self.ids;
            let stop = self.stop.clone();
            let state = self.state.clone();
            let emitting = emitting.clone();
            let iteration = iteration.clone();

            drivers.push(tokio::spawn(async move {
                drive_scenario(rt, client, metrics, ids, origin, stop, iteration).await;
                // The last scheduler to finish emitting flips the run into
                // its drain phase.
                if emitting.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let _ = state.advance(RunState::Running, RunState::Draining)
                        || state.advance(RunState::Starting, RunState::Draining);
                }
            }));
        }

        self.state.advance(RunState::Starting, RunState::Running);

        for driver in drivers {
            driver.await?;
        }

        self.state.force(RunState::Stopped);
        let elapsed = origin.elapsed();
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "run stopped");

        // All workers have drained, so this snapshot is exact.
        let metrics = self.metrics.snapshot();
        let thresholds = evaluate_thresholds(&self.thresholds, &metrics)?;
        let passed = thresholds.iter().all(|t| t.passed);
        let dropped_iterations_total = self
            .runtimes
            .iter()
            .map(|rt| rt.dropped.load(Ordering::Relaxed))
            .sum();

        Ok(RunReport {
            elapsed,
            metrics,
            thresholds,
            dropped_iterations_total,
            passed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioSpec;
    use std::time::Duration;

    #[test]
    fn duplicate_scenario_names_are_rejected() {
        let specs = vec![
            ScenarioSpec::constant("a", 1, Duration::from_secs(1)),
            ScenarioSpec::constant("a", 1, Duration::from_secs(1)),
        ];
        let err = Runner::new(specs, RunOptions::default());
        assert!(matches!(err, Err(Error::DuplicateScenario(name)) if name == "a"));
    }

    #[test]
    fn invalid_spec_fails_before_start() {
        let specs = vec![ScenarioSpec::constant("a", 0, Duration::from_secs(1))];
        assert!(Runner::new(specs, RunOptions::default()).is_err());
    }

    #[test]
    fn invalid_threshold_fails_before_start() {
        let specs = vec![ScenarioSpec::constant("a", 1, Duration::from_secs(1))];
        let options = RunOptions {
            thresholds: vec![ThresholdSet::new("m", vec!["bogus".to_string()])],
        };
        assert!(matches!(
            Runner::new(specs, options),
            Err(Error::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn new_runner_is_idle() {
        let specs = vec![ScenarioSpec::constant("a", 1, Duration::from_secs(1))];
        let runner = Runner::new(specs, RunOptions::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(runner.state(), RunState::Idle);
        assert_eq!(runner.handle().state(), RunState::Idle);
    }

    #[test]
    fn state_cell_never_leaves_stopped() {
        let cell = StateCell::new();
        cell.force(RunState::Stopped);
        cell.force(RunState::Draining);
        assert_eq!(cell.get(), RunState::Stopped);
        assert!(!cell.advance(RunState::Stopped, RunState::Running));
        assert_eq!(cell.get(), RunState::Stopped);
    }
}
