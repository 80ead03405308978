pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors. Everything here fails the run before or at startup; runtime
/// conditions (dropped tickets, transport failures, iteration panics) are
/// recorded as metrics instead and never surface as `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("scenario `{0}` is defined more than once")]
    DuplicateScenario(String),

    #[error("`rate` must be a positive integer")]
    InvalidRate,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`time_unit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages,

    #[error("`pre_allocated_vus` must be a positive integer")]
    InvalidPreAllocatedVus,

    #[error("`max_vus` must be >= `pre_allocated_vus`")]
    InvalidMaxVus,

    #[error("invalid threshold expression for metric `{metric}`: {reason}")]
    InvalidThreshold { metric: String, reason: String },
}
