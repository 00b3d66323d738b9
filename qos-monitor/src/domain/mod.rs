//! Domain model for the probing core.
//!
//! These types are storage-agnostic; the database layer maps them to rows.

pub mod measurement;
pub mod schedule;
pub mod service;

pub use measurement::{Measurement, ProbeResult};
pub use schedule::{IntervalUnit, ScheduleEntry, ScheduleParseError};
pub use service::{MonitoredProcess, ProcessStatus, Service};
