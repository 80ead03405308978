use std::time::Duration;

use loadr_metrics::MetricSeriesSummary;

use crate::thresholds::ThresholdOutcome;

/// Process exit convention for embedding binaries: 0 iff every threshold
/// passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Invalid scenario or threshold configuration.
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants, panics
    /// caught at top-level).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Final output of a run: the exact post-drain metric snapshot, every
/// threshold outcome, and the overall verdict. Rendering is the caller's
/// business.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub metrics: Vec<MetricSeriesSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub dropped_iterations_total: u64,
    /// AND of all threshold outcomes.
    pub passed: bool,
}

impl RunReport {
    /// Base (untagged) series for a metric, if it recorded anything.
    pub fn metric(&self, name: &str) -> Option<&MetricSeriesSummary> {
        self.metrics
            .iter()
            .find(|m| m.name == name && m.tags.is_empty())
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.passed {
            ExitCode::Success
        } else {
            ExitCode::ThresholdsFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(passed: bool) -> RunReport {
        RunReport {
            elapsed: Duration::from_secs(1),
            metrics: Vec::new(),
            thresholds: Vec::new(),
            dropped_iterations_total: 0,
            passed,
        }
    }

    #[test]
    fn exit_code_follows_verdict() {
        assert_eq!(report(true).exit_code().as_i32(), 0);
        assert_eq!(report(false).exit_code(), ExitCode::ThresholdsFailed);
        assert_eq!(report(false).exit_code().as_i32(), 11);
    }
}
