//! Pluggable probes computing metrics over a request/response pair.
//!
//! Probes are stateful and execution-scoped: the [`ProbeRegistry`] holds
//! factories and builds a fresh probe set for every firing.

pub mod builtin;
pub mod registry;

use crate::Result;
use crate::client::{ServiceRequest, ServiceResponse};
use crate::domain::ProbeResult;

pub use builtin::{ResponseSizeProbe, ResponseTimeProbe};
pub use registry::ProbeRegistry;

/// One metric computation for one firing.
pub trait Probe: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, request: &ServiceRequest, response: &ServiceResponse) -> Result<()>;

    /// The computed metric, if the probe chose to emit one.
    fn result(&self) -> Option<ProbeResult>;
}

/// Builds probes of one kind.
pub trait ProbeFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn Probe>>;
}

/// [`ProbeFactory`] backed by a closure.
pub struct FnProbeFactory<F> {
    name: String,
    build: F,
}

impl<F> ProbeFactory for FnProbeFactory<F>
where
    F: Fn() -> Result<Box<dyn Probe>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Result<Box<dyn Probe>> {
        (self.build)()
    }
}

/// Wrap a closure as a [`ProbeFactory`].
pub fn probe_factory<F>(name: impl Into<String>, build: F) -> FnProbeFactory<F>
where
    F: Fn() -> Result<Box<dyn Probe>> + Send + Sync,
{
    FnProbeFactory {
        name: name.into(),
        build,
    }
}
