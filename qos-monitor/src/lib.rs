//! qos-monitor library crate.
//!
//! Scheduled quality-of-service probing of remote network services. Every
//! monitored process owns a durable job in the trigger engine; its
//! schedules fire probing units that call the service, run the registered
//! probes and store one measurement per successful firing. A failing
//! process is paused until an operator resumes it.

pub mod client;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod panic_hook;
pub mod probe;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
