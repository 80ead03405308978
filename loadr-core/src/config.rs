use std::time::Duration;

use crate::error::{Error, Result};

/// One segment of a ramping rate curve: the instantaneous rate interpolates
/// linearly from the previous stage's target (or the start rate) to `target`
/// over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ExecutorKind {
    ConstantArrivalRate,
    RampingArrivalRate,
}

/// Arrival-rate executor shape. Both variants are open-loop: iteration starts
/// follow the declared schedule regardless of how long iterations take.
#[derive(Debug, Clone)]
pub enum ArrivalExecutor {
    ConstantArrivalRate {
        /// Iterations started per `time_unit`.
        rate: u64,
        time_unit: Duration,
        duration: Duration,
    },
    RampingArrivalRate {
        start_rate: u64,
        time_unit: Duration,
        stages: Vec<Stage>,
    },
}

impl ArrivalExecutor {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            ArrivalExecutor::ConstantArrivalRate { .. } => ExecutorKind::ConstantArrivalRate,
            ArrivalExecutor::RampingArrivalRate { .. } => ExecutorKind::RampingArrivalRate,
        }
    }

    pub fn total_duration(&self) -> Duration {
        match self {
            ArrivalExecutor::ConstantArrivalRate { duration, .. } => *duration,
            ArrivalExecutor::RampingArrivalRate { stages, .. } => stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    /// Unique scenario key; also the `scenario` tag on every recorded sample.
    pub name: String,
    pub executor: ArrivalExecutor,
    /// Worker slots created up front.
    pub pre_allocated_vus: u64,
    /// Hard cap on concurrently live worker slots. Tickets that arrive with
    /// all slots busy are dropped, not queued.
    pub max_vus: u64,
    /// Offset from the run origin before this scenario starts emitting.
    pub start_time: Duration,
    /// How long in-flight iterations may keep running after the scenario has
    /// emitted its final ticket (or was stopped) before they are aborted.
    pub graceful_stop: Duration,
}

impl ScenarioSpec {
    const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

    pub fn constant(name: impl Into<String>, rate: u64, duration: Duration) -> Self {
        Self {
            name: name.into(),
            executor: ArrivalExecutor::ConstantArrivalRate {
                rate,
                time_unit: Duration::from_secs(1),
                duration,
            },
            pre_allocated_vus: 1,
            max_vus: 1,
            start_time: Duration::ZERO,
            graceful_stop: Self::DEFAULT_GRACEFUL_STOP,
        }
    }

    pub fn ramping(name: impl Into<String>, start_rate: u64, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            executor: ArrivalExecutor::RampingArrivalRate {
                start_rate,
                time_unit: Duration::from_secs(1),
                stages,
            },
            pre_allocated_vus: 1,
            max_vus: 1,
            start_time: Duration::ZERO,
            graceful_stop: Self::DEFAULT_GRACEFUL_STOP,
        }
    }

    #[must_use]
    pub fn time_unit(mut self, time_unit: Duration) -> Self {
        match &mut self.executor {
            ArrivalExecutor::ConstantArrivalRate { time_unit: t, .. }
            | ArrivalExecutor::RampingArrivalRate { time_unit: t, .. } => *t = time_unit,
        }
        self
    }

    #[must_use]
    pub fn vus(mut self, pre_allocated: u64, max: u64) -> Self {
        self.pre_allocated_vus = pre_allocated;
        self.max_vus = max;
        self
    }

    #[must_use]
    pub fn start_time(mut self, offset: Duration) -> Self {
        self.start_time = offset;
        self
    }

    #[must_use]
    pub fn graceful_stop(mut self, grace: Duration) -> Self {
        self.graceful_stop = grace;
        self
    }

    /// Fail-fast validation, run before any ticket is emitted.
    pub fn validate(&self) -> Result<()> {
        if self.pre_allocated_vus == 0 {
            return Err(Error::InvalidPreAllocatedVus);
        }
        if self.max_vus < self.pre_allocated_vus {
            return Err(Error::InvalidMaxVus);
        }

        match &self.executor {
            ArrivalExecutor::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
            } => {
                if *rate == 0 {
                    return Err(Error::InvalidRate);
                }
                if time_unit.is_zero() {
                    return Err(Error::InvalidTimeUnit);
                }
                if duration.is_zero() {
                    return Err(Error::InvalidDuration);
                }
            }
            ArrivalExecutor::RampingArrivalRate {
                time_unit, stages, ..
            } => {
                if time_unit.is_zero() {
                    return Err(Error::InvalidTimeUnit);
                }
                if stages.is_empty() || self.executor.total_duration().is_zero() {
                    return Err(Error::InvalidStages);
                }
            }
        }

        Ok(())
    }
}
