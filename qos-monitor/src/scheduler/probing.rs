//! The probing unit: one probe cycle against one monitored process.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use trigger_engine::{Job, JobExecutionContext, JobExecutionError};

use crate::Result;
use crate::client::{ResponseOutcome, ServiceClient, ServiceRequest, ServiceResponse};
use crate::database::repositories::MeasurementWriter;
use crate::domain::{Measurement, MonitoredProcess, ProbeResult, Service};
use crate::probe::Probe;

/// Work performed by one firing of a process job.
///
/// Every dependency is owned by this firing alone. Execution never reports
/// an error to the engine: failures are recorded on the unit and read by the
/// failure supervisor through [`ProbingUnit::cant_measure`].
pub struct ProbingUnit {
    service: Service,
    process: MonitoredProcess,
    client: Box<dyn ServiceClient>,
    writer: Box<dyn MeasurementWriter>,
    probes: Vec<Box<dyn Probe>>,
    attempts: u32,
    outcome: Option<ResponseOutcome>,
    cant_measure: bool,
    measurement_id: Option<i64>,
}

impl ProbingUnit {
    pub fn new(
        service: Service,
        process: MonitoredProcess,
        client: Box<dyn ServiceClient>,
        writer: Box<dyn MeasurementWriter>,
        probes: Vec<Box<dyn Probe>>,
    ) -> Self {
        Self {
            service,
            process,
            client,
            writer,
            probes,
            attempts: 0,
            outcome: None,
            cant_measure: false,
            measurement_id: None,
        }
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn process(&self) -> &MonitoredProcess {
        &self.process
    }

    /// Whether the firing failed to produce a measurement because of the remote call.
    pub fn cant_measure(&self) -> bool {
        self.cant_measure
    }

    /// Number of remote calls made (1, or 2 after a service exception).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Classification of the last remote call.
    pub fn outcome(&self) -> Option<ResponseOutcome> {
        self.outcome
    }

    /// Id of the stored measurement, if one was created.
    pub fn measurement_id(&self) -> Option<i64> {
        self.measurement_id
    }

    fn build_request(&self) -> ServiceRequest {
        ServiceRequest {
            service_id: self.service.id.clone(),
            process_id: self.process.id.clone(),
            address: self.service.address.clone(),
            body: self.process.request_template.clone(),
        }
    }

    async fn call(&mut self, request: &ServiceRequest) -> ServiceResponse {
        self.attempts += 1;
        self.client.execute(request).await
    }

    async fn run(&mut self) -> Result<()> {
        let request = self.build_request();

        let mut response = self.call(&request).await;
        if response.is_service_exception() {
            debug!(
                service = %self.service.id,
                process = %self.process.id,
                error = ?response.error,
                "Service exception, retrying once"
            );
            response = self.call(&request).await;
        }
        self.outcome = Some(response.outcome);

        match response.outcome {
            ResponseOutcome::Success => {}
            ResponseOutcome::TransportException => {
                self.cant_measure = true;
                warn!(
                    service = %self.service.id,
                    process = %self.process.id,
                    address = %self.service.address,
                    error = ?response.error,
                    "Service unreachable"
                );
                return Ok(());
            }
            ResponseOutcome::ServiceException | ResponseOutcome::OtherException => {
                self.cant_measure = true;
                warn!(
                    service = %self.service.id,
                    process = %self.process.id,
                    outcome = %response.outcome,
                    attempts = self.attempts,
                    error = ?response.error,
                    "Probe cycle failed"
                );
                return Ok(());
            }
        }

        let results = self.run_probes(&request, &response);
        let measurement = Measurement::new(
            &self.service.id,
            &self.process.id,
            response.sent_at,
            results,
        );
        let id = self.writer.save(&measurement).await?;
        self.measurement_id = Some(id);

        debug!(
            service = %self.service.id,
            process = %self.process.id,
            measurement = id,
            results = measurement.results.len(),
            "Measurement stored"
        );
        Ok(())
    }

    fn run_probes(&mut self, request: &ServiceRequest, response: &ServiceResponse) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.probes.len());
        for probe in self.probes.iter_mut() {
            let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<Option<ProbeResult>> {
                probe.execute(request, response)?;
                Ok(probe.result())
            }));
            match outcome {
                Ok(Ok(Some(result))) => results.push(result),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(probe = probe.name(), error = %e, "Probe failed, skipping"),
                Err(_) => warn!(probe = probe.name(), "Probe panicked, skipping"),
            }
        }
        results
    }
}

#[async_trait]
impl Job for ProbingUnit {
    async fn execute(&mut self, ctx: &JobExecutionContext) -> std::result::Result<(), JobExecutionError> {
        let outcome = AssertUnwindSafe(self.run()).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                job = %ctx.job_key(),
                error = %e,
                "Probe cycle aborted"
            ),
            Err(_) => error!(job = %ctx.job_key(), "Probe cycle panicked"),
        }

        self.writer.release();

        if self.cant_measure {
            info!(job = %ctx.job_key(), outcome = ?self.outcome, "Firing could not measure");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
