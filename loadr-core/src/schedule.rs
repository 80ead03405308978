use std::time::Duration;

use crate::config::Stage;

/// Error margin added before flooring the cumulative tick integral, so f64
/// rounding noise cannot swallow a tick at an exact integer boundary.
const INTEGRAL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear arrival-rate curve over a run, sampled on a single
/// monotonic clock reference.
///
/// Ticket emission is driven by the exact closed-form integral of the curve:
/// a ticket is due every time the cumulative area (in ticket units) crosses
/// an integer. Fractional area carries across stage boundaries, so the total
/// over the run matches the area under the whole curve with no per-stage
/// drift, and a constant curve degenerates to fixed-interval emission without
/// interval accumulation error.
#[derive(Debug, Clone)]
pub struct ArrivalSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
    time_unit: Duration,
}

impl ArrivalSchedule {
    pub fn new(start: u64, time_unit: Duration, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
            time_unit,
        }
    }

    /// A flat curve: `rate` per `time_unit` for `duration`.
    pub fn constant(rate: u64, time_unit: Duration, duration: Duration) -> Self {
        Self::new(
            rate,
            time_unit,
            vec![Stage {
                duration,
                target: rate,
            }],
        )
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Total tickets the whole schedule emits.
    pub fn total_tickets(&self) -> u64 {
        self.ticks_due(self.total_duration())
    }

    /// How many tickets are due by `elapsed`: the floor of the integral of
    /// the rate curve from the schedule origin, in ticket units.
    pub fn ticks_due(&self, elapsed: Duration) -> u64 {
        let unit = self.time_unit.as_secs_f64().max(1e-9);
        let clamped = elapsed.min(self.total_duration());

        let mut area = 0.0f64;
        let mut stage_start = Duration::ZERO;
        let mut start_rate = self.start as f64;

        for (i, stage) in self.stages.iter().enumerate() {
            let stage_end = self.cumulative_ends[i];
            let end_rate = stage.target as f64;
            let d = stage.duration.as_secs_f64();

            if clamped >= stage_end {
                // Whole stage: trapezoid.
                area += (start_rate + end_rate) / 2.0 * d / unit;
            } else {
                let x = clamped.saturating_sub(stage_start).as_secs_f64();
                if d > 0.0 && x > 0.0 {
                    let slope = (end_rate - start_rate) / d;
                    area += (start_rate * x + slope * x * x / 2.0) / unit;
                }
                break;
            }

            stage_start = stage_end;
            start_rate = end_rate;
        }

        (area + INTEGRAL_EPSILON).floor() as u64
    }

    /// Instantaneous target rate at `elapsed` (interpolated, per time unit).
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || elapsed == Duration::ZERO {
            return self.start;
        }

        let total = self.total_duration();
        if elapsed >= total {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        let idx = match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => i,
            Err(i) => i,
        };

        let stage_end = self.cumulative_ends[idx];
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };

        let stage = &self.stages[idx];
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        let end_target = stage.target;

        if stage_duration.is_zero() {
            return end_target;
        }

        // Linear interpolation across the stage.
        let start_i = start_target as i128;
        let end_i = end_target as i128;
        let delta = end_i - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let idx = if clamped >= total {
            self.stages.len().saturating_sub(1)
        } else {
            match self
                .cumulative_ends
                .binary_search_by(|end| end.cmp(&clamped))
            {
                Ok(i) => i,
                Err(i) => i,
            }
        };

        let stage_end = self.cumulative_ends[idx];
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };

        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);
        let stage_remaining = stage_duration.saturating_sub(stage_elapsed);

        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target,
            end_target: self.stages[idx].target,
            current_target: self.target_at(clamped),
        })
    }
}
