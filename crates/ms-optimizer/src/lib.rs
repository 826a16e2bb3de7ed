//! # ms-optimizer
//!
//! Grid expansion and sweep orchestration support for molsweep.
//!
//! Provides search space definitions, exhaustive grid expansion with
//! pass-through and coupled keys, trial and outcome tracking, and worker pool
//! and device allocation for parallel job dispatch.

mod search;
mod trial;
mod workers;

pub use search::{expand_grid, GridSearch, ParameterDef, ParameterKind, SearchSpace};
pub use trial::{
    BestTrial, MetricsRecord, SweepId, SweepState, SweepStatus, Trial, TrialOutcome, TrialStatus,
    METRIC_COLUMNS,
};
pub use workers::{
    accelerator_count, available_parallelism, worker_count, Device, DeviceAllocator, DeviceLease,
    WorkerAllocation, ACCELERATOR_ENV,
};
