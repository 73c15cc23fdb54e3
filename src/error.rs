//! Error type returned at the public API boundary.

use thiserror::Error;

use crate::coord::Cycle;

/// Hard cap on simulated cycles; a run that exceeds it is considered hung.
pub const MAX_CYCLE_LIMIT: Cycle = 50_000_000;

#[derive(Debug, Clone, Error)]
pub enum SimError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("device model init failed: {0}")]
    DeviceModelInitFailed(String),

    #[error("workload validation failed")]
    WorkloadValidationFailed,

    #[error("exceeded simulation cycle limit of {MAX_CYCLE_LIMIT} cycles")]
    ExceededSimCycleLimit,

    #[error("trace ingest failed: {0}")]
    TraceIngestFailed(String),

    #[error("dependency generation failed: {0}")]
    DependencyGenFailed(String),
}

pub type SimResult<T> = Result<T, SimError>;
