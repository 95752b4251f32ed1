//! Enablement, ordering and execution
//!
//! Decides which services run, groups them into ordered batches and hands
//! the batches to a launcher.

pub mod enablement;
pub mod executor;
pub mod plan;

pub use enablement::{override_key, DependencyClosure, EnablementResolver};
pub use executor::{
    BatchExecutor, ComposeCliLauncher, DryRunLauncher, ExecutionReport, ServiceLauncher,
};
pub use plan::{Batch, BatchPlan, PlannedService, Planner, Target};
