//! # Trigger Engine
//!
//! A small in-memory job/trigger scheduling engine.
//!
//! Jobs are registered once under a `(name, group)` key and may carry any
//! number of triggers. The engine owns the timing: it wakes up for the
//! earliest due trigger, asks the single global [`JobFactory`] for a fresh job
//! instance, runs it on a bounded worker pool and reports the outcome to the
//! single global [`JobListener`].
//!
//! ## Schedules
//!
//! - [`Schedule::Simple`] fires at a fixed wall-clock independent interval.
//! - [`Schedule::Calendar`] fires every N days/weeks/months/years in the
//!   engine's time zone, so firings keep their local time of day across
//!   daylight-saving changes and month-length differences.
//!
//! ## Example
//!
//! ```ignore
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! scheduler.set_job_factory(Arc::new(MyFactory));
//! scheduler.add_job(JobDetail::new(JobKey::new("job", "group"), "my-type").durable(true), true)?;
//! scheduler.schedule_trigger(Trigger::new(
//!     TriggerKey::new("every-minute", "group"),
//!     JobKey::new("job", "group"),
//!     Schedule::simple(Duration::from_secs(60)),
//!     Utc::now(),
//!     None,
//! ))?;
//! scheduler.start();
//! ```

mod error;
mod job;
mod key;
mod scheduler;
mod store;
mod trigger;

pub use error::{EngineError, JobExecutionError, Result};
pub use job::{
    Job, JobDataMap, JobDetail, JobExecutionContext, JobFactory, JobListener, SimpleJobFactory,
};
pub use key::{DEFAULT_GROUP, JobKey, TriggerKey};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use trigger::{CalendarUnit, Schedule, Trigger, TriggerState};
