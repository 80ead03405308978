use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use loadr_http::HttpClient;
use loadr_metrics::Registry;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::{ArrivalExecutor, ScenarioSpec};
use crate::executor::{IterationContext, Ticket, run_iteration};
use crate::pool::WorkerPool;
use crate::run_metrics::RunMetricIds;
use crate::schedule::ArrivalSchedule;
use crate::signal::StopSignal;

/// How often a scheduler re-samples its clock. The cumulative integral is
/// recomputed from the scheduler's single start reference on every tick, so
/// a late tick catches up instead of drifting.
const TICK: Duration = Duration::from_millis(10);

/// Live state for one scenario: the schedule, its worker pool, and counters
/// shared with progress reporting.
#[derive(Debug)]
pub(crate) struct ScenarioRuntime {
    pub name: Arc<str>,
    pub schedule: Arc<ArrivalSchedule>,
    pub pool: Arc<WorkerPool>,
    pub start_time: Duration,
    pub graceful_stop: Duration,
    pub emitted: AtomicU64,
    pub dropped: AtomicU64,
    pub started_at: OnceLock<Instant>,
}

impl ScenarioRuntime {
    pub fn new(spec: &ScenarioSpec) -> Self {
        let schedule = match &spec.executor {
            ArrivalExecutor::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
            } => ArrivalSchedule::constant(*rate, *time_unit, *duration),
            ArrivalExecutor::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
            } => ArrivalSchedule::new(*start_rate, *time_unit, stages.clone()),
        };

        Self {
            name: Arc::from(spec.name.as_str()),
            schedule: Arc::new(schedule),
            pool: Arc::new(WorkerPool::new(spec.pre_allocated_vus, spec.max_vus)),
            start_time: spec.start_time,
            graceful_stop: spec.graceful_stop,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            started_at: OnceLock::new(),
        }
    }
}

/// Timed-emission loop for one scenario.
///
/// Open-loop: tickets are emitted whenever the schedule's integral crosses
/// the next integer, regardless of how long dispatched iterations take. A
/// ticket that finds the pool at `max_vus` is dropped and recorded, never
/// retried or queued.
pub(crate) async fn drive_scenario<F, Fut, E>(
    rt: Arc<ScenarioRuntime>,
    client: Arc<HttpClient>,
    metrics: Arc<Registry>,
    ids: RunMetricIds,
    origin: Instant,
    stop: Arc<StopSignal>,
    iteration: F,
) where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    // Honor the scenario's start offset relative to the run origin.
    let wait = (origin + rt.start_time).saturating_duration_since(Instant::now());
    if !wait.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop.stopped() => return,
        }
    }
    if stop.is_stopped() {
        return;
    }

    let started = Instant::now();
    let _ = rt.started_at.set(started);
    tracing::debug!(scenario = rt.name.as_ref(), "scheduler started");

    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut emitted: u64 = 0;
    let total = rt.schedule.total_tickets();

    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if stop.is_stopped() {
                    break;
                }

                let elapsed = started.elapsed();
                let due = rt.schedule.ticks_due(elapsed).min(total);
                while emitted < due {
                    let seq = emitted;
                    emitted += 1;
                    rt.emitted.fetch_add(1, Ordering::Relaxed);

                    match rt.pool.acquire_guard() {
                        Ok(guard) => {
                            let ctx = IterationContext {
                                ticket: Ticket {
                                    scenario: rt.name.clone(),
                                    seq,
                                },
                                worker_id: guard.id(),
                                client: client.clone(),
                                metrics: metrics.clone(),
                                ids,
                            };
                            let iteration = iteration.clone();
                            tasks.spawn(async move {
                                let _slot = guard;
                                run_iteration(ctx, iteration).await;
                            });
                        }
                        Err(_) => {
                            rt.dropped.fetch_add(1, Ordering::Relaxed);
                            ids.record_dropped(&metrics, &rt.name, 1);
                        }
                    }
                }

                if emitted >= total && rt.schedule.is_done(elapsed) {
                    break;
                }
            }
            Some(res) = tasks.join_next() => {
                if let Err(err) = res
                    && err.is_panic()
                {
                    ids.record_iteration_error(&metrics, &rt.name, "panic");
                }
            }
        }
    }

    // Drain: in-flight iterations may finish within the grace period, then
    // whatever is left is aborted.
    let deadline = tokio::time::Instant::now() + rt.graceful_stop;
    let mut forced = false;
    while !tasks.is_empty() {
        tokio::select! {
            res = tasks.join_next() => {
                match res {
                    None => break,
                    Some(Err(err)) if err.is_panic() => {
                        ids.record_iteration_error(&metrics, &rt.name, "panic");
                    }
                    Some(_) => {}
                }
            }
            _ = tokio::time::sleep_until(deadline), if !forced => {
                forced = true;
                tracing::warn!(
                    scenario = rt.name.as_ref(),
                    in_flight = tasks.len(),
                    "grace deadline hit, aborting in-flight iterations"
                );
                tasks.abort_all();
            }
        }
    }

    tracing::debug!(
        scenario = rt.name.as_ref(),
        emitted,
        dropped = rt.dropped.load(Ordering::Relaxed),
        "scheduler finished"
    );
}
