//! Scheduled probing on top of the trigger engine.
//!
//! # Architecture
//!
//! - [`JobTypeRegistry`] is the engine's single job factory and dispatches
//!   on the job type tag.
//! - [`ProbingUnitFactory`] builds a [`ProbingUnit`] per firing.
//! - [`MonitorScheduler`] is the domain facade over the engine.
//! - [`FailureSupervisor`] is the engine's single job listener and pauses
//!   jobs whose firings fail.

pub mod cache;
pub mod facade;
pub mod factory;
pub mod job_types;
pub mod probing;
pub mod purge;
pub mod supervisor;

pub use cache::ProcessCache;
pub use facade::MonitorScheduler;
pub use factory::{ProbingUnitFactory, ProbingUnitFactoryBuilder};
pub use job_types::JobTypeRegistry;
pub use probing::ProbingUnit;
pub use purge::{MeasurementPurgeJob, PurgeJobFactory};
pub use supervisor::FailureSupervisor;

/// Job type tag of process probing jobs.
pub const PROBING_JOB_TYPE: &str = "probing";

/// Job type tag of the measurement purge job.
pub const PURGE_JOB_TYPE: &str = "measurement-purge";

/// Namespace of jobs that do not belong to a service.
pub const SYSTEM_NAMESPACE: &str = "system";
