use std::time::Duration;

use crate::orchestrator::RunState;

/// Pull-style progress snapshot for external rendering; see
/// [`crate::RunHandle::progress`].
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub state: RunState,
    pub scenarios: Vec<ScenarioProgress>,
}

#[derive(Debug, Clone)]
pub struct ScenarioProgress {
    pub scenario: String,
    /// Elapsed time since this scenario's scheduler started emitting.
    /// `None` while its start offset has not elapsed.
    pub elapsed: Option<Duration>,
    /// Instantaneous target rate per time unit.
    pub current_target: u64,
    pub emitted_total: u64,
    pub dropped_total: u64,
    pub live_workers: u64,
    pub busy_workers: u64,
    pub max_workers: u64,
    pub stage: Option<StageProgress>,
}

#[derive(Debug, Clone)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
}
