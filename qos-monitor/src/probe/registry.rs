//! Registry of probe factories.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::builtin::{ResponseSizeProbe, ResponseTimeProbe};
use super::{Probe, ProbeFactory, probe_factory};

/// Shared, read-mostly set of probe factories.
///
/// Registration may happen while firings are running.
#[derive(Default)]
pub struct ProbeRegistry {
    factories: RwLock<Vec<Arc<dyn ProbeFactory>>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the response time and response size probes.
    pub fn with_builtin_probes() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(probe_factory(ResponseTimeProbe::NAME, || {
            Ok(Box::new(ResponseTimeProbe::default()) as Box<dyn Probe>)
        })));
        registry.register(Arc::new(probe_factory(ResponseSizeProbe::NAME, || {
            Ok(Box::new(ResponseSizeProbe::default()) as Box<dyn Probe>)
        })));
        registry
    }

    pub fn register(&self, factory: Arc<dyn ProbeFactory>) {
        debug!(probe = factory.name(), "Probe factory registered");
        self.factories.write().push(factory);
    }

    /// Build one fresh probe per factory, skipping factories that fail.
    pub fn build_probes(&self) -> Vec<Box<dyn Probe>> {
        let factories = self.factories.read().clone();
        factories
            .iter()
            .filter_map(|factory| {
                match catch_unwind(AssertUnwindSafe(|| factory.create())) {
                    Ok(Ok(probe)) => Some(probe),
                    Ok(Err(e)) => {
                        warn!(probe = factory.name(), error = %e, "Probe factory failed, skipping");
                        None
                    }
                    Err(_) => {
                        warn!(probe = factory.name(), "Probe factory panicked, skipping");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}
