//! Assembles a [`ProbingUnit`] for each firing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;
use trigger_engine::{EngineError, Job, JobExecutionContext, JobFactory};

use super::cache::ProcessCache;
use super::probing::ProbingUnit;
use crate::client::ClientFactory;
use crate::database::repositories::{MeasurementRepository, ProcessRepository, ServiceRepository};
use crate::domain::{MonitoredProcess, Service};
use crate::probe::ProbeRegistry;
use crate::{Error, Result};

/// Job factory for the probing job type.
///
/// Resolves the fired job's process definition, then hands the unit a new
/// client, a new measurement writer and a freshly built probe set.
pub struct ProbingUnitFactory {
    services: Arc<dyn ServiceRepository>,
    processes: Arc<dyn ProcessRepository>,
    measurements: Arc<dyn MeasurementRepository>,
    clients: Arc<dyn ClientFactory>,
    probes: Arc<ProbeRegistry>,
    cache: Arc<ProcessCache>,
}

impl ProbingUnitFactory {
    pub fn builder() -> ProbingUnitFactoryBuilder {
        ProbingUnitFactoryBuilder::default()
    }

    /// Look up a process and its service, preferring the cache.
    pub async fn resolve(
        &self,
        service_id: &str,
        process_id: &str,
    ) -> Result<(Service, MonitoredProcess)> {
        if let Some(hit) = self.cache.lookup(service_id, process_id) {
            trace!(service = service_id, process = process_id, "Process cache hit");
            return Ok(hit);
        }

        let process = self
            .processes
            .find_process(service_id, process_id)
            .await?
            .ok_or_else(|| Error::not_found("Process", format!("{service_id}/{process_id}")))?;
        let service = self
            .services
            .find_service(service_id)
            .await?
            .ok_or_else(|| Error::not_found("Service", service_id))?;
        Ok((service, process))
    }
}

#[async_trait]
impl JobFactory for ProbingUnitFactory {
    async fn new_job(&self, ctx: &JobExecutionContext) -> std::result::Result<Box<dyn Job>, EngineError> {
        let key = ctx.job_key();
        let (service, process) = self
            .resolve(key.group(), key.name())
            .await
            .map_err(|e| EngineError::instantiation(key, e.to_string()))?;

        Ok(Box::new(ProbingUnit::new(
            service,
            process,
            self.clients.create(),
            self.measurements.writer(),
            self.probes.build_probes(),
        )))
    }
}

/// Builder for [`ProbingUnitFactory`]. Every collaborator is required.
#[derive(Default)]
pub struct ProbingUnitFactoryBuilder {
    services: Option<Arc<dyn ServiceRepository>>,
    processes: Option<Arc<dyn ProcessRepository>>,
    measurements: Option<Arc<dyn MeasurementRepository>>,
    clients: Option<Arc<dyn ClientFactory>>,
    probes: Option<Arc<ProbeRegistry>>,
    cache: Option<Arc<ProcessCache>>,
}

impl ProbingUnitFactoryBuilder {
    pub fn services(mut self, services: Arc<dyn ServiceRepository>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn processes(mut self, processes: Arc<dyn ProcessRepository>) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn measurements(mut self, measurements: Arc<dyn MeasurementRepository>) -> Self {
        self.measurements = Some(measurements);
        self
    }

    pub fn clients(mut self, clients: Arc<dyn ClientFactory>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn probes(mut self, probes: Arc<ProbeRegistry>) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn cache(mut self, cache: Arc<ProcessCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fails with [`Error::Configuration`] naming the first missing collaborator.
    pub fn build(self) -> Result<ProbingUnitFactory> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| Error::config(format!("probing unit factory requires {name}")))
        }

        Ok(ProbingUnitFactory {
            services: required(self.services, "a service repository")?,
            processes: required(self.processes, "a process repository")?,
            measurements: required(self.measurements, "a measurement repository")?,
            clients: required(self.clients, "a client factory")?,
            probes: required(self.probes, "a probe registry")?,
            cache: required(self.cache, "a process cache")?,
        })
    }
}
