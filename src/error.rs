//! Error type for the allocation engine.
//!
//! Only fatal conditions surface here: unreadable inputs, invalid
//! configuration, and restarts that cannot be derived from a prior run.
//! Rejected mutations and infeasible candidates are part of normal search
//! and never become errors.

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by loaders, configuration and run setup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A traffic profile row or header could not be parsed.
    #[error("traffic profile line {line}: {reason}")]
    ProfileFormat { line: usize, reason: String },

    /// Traffic profile hours are not dense from 0.
    #[error("traffic profile is not dense: expected hour {expected}, found {found}")]
    SparseProfile { expected: u32, found: u32 },

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Population too small to pick two distinct parents.
    #[error("population of {size} individuals, at least {required} required")]
    PopulationTooSmall { size: usize, required: usize },

    /// No experiments to schedule.
    #[error("experiment set is empty")]
    EmptyExperimentSet,

    /// No feasible schedule was found for an experiment within the sampling budget.
    #[error("no feasible schedule for experiment {experiment} after {attempts} attempts")]
    SamplingExhausted { experiment: u32, attempts: usize },

    /// An optimizer was handed an infeasible starting individual.
    #[error("start individual is infeasible: {0}")]
    InfeasibleStart(String),

    /// No restart possible from the given prior individual.
    #[error("restart not possible: {0}")]
    Restart(String),
}
