//! Service container for dependency injection.
//!
//! Wires repositories, the trigger engine and its hooks, and the operator
//! service together, and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trigger_engine::Scheduler;

use super::monitor::MonitorService;
use crate::client::{ClientFactory, HttpClientFactory};
use crate::config::AppConfig;
use crate::database::repositories::{
    MeasurementRepository, ProcessRepository, ScheduleRepository, ServiceRepository,
    SqlxMeasurementRepository, SqlxProcessRepository, SqlxScheduleRepository,
    SqlxServiceRepository,
};
use crate::events::{EventBus, MonitorEvent, monitor_event_bus};
use crate::probe::ProbeRegistry;
use crate::scheduler::{
    FailureSupervisor, JobTypeRegistry, MonitorScheduler, PROBING_JOB_TYPE, PURGE_JOB_TYPE,
    ProbingUnitFactory, ProcessCache, PurgeJobFactory,
};
use crate::Result;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Operator control surface.
    pub monitor: Arc<MonitorService>,
    pub scheduler: Arc<MonitorScheduler>,
    /// Engine job factory, open for additional job types.
    pub job_types: Arc<JobTypeRegistry>,
    /// Probe factories, open for additional probes.
    pub probes: Arc<ProbeRegistry>,
    pub events: Arc<EventBus<MonitorEvent>>,
    supervisor: Arc<FailureSupervisor>,
    measurement_retention: Option<TimeDelta>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a container probing over HTTP.
    pub fn new(pool: SqlitePool, config: &AppConfig) -> Result<Self> {
        let clients = Arc::new(HttpClientFactory::new(config.client_timeout)?);
        Self::with_client_factory(pool, config, clients)
    }

    /// Create a container with a custom remote-client factory.
    pub fn with_client_factory(
        pool: SqlitePool,
        config: &AppConfig,
        clients: Arc<dyn ClientFactory>,
    ) -> Result<Self> {
        info!("Initializing service container");

        let services: Arc<dyn ServiceRepository> =
            Arc::new(SqlxServiceRepository::new(pool.clone()));
        let processes: Arc<dyn ProcessRepository> =
            Arc::new(SqlxProcessRepository::new(pool.clone()));
        let measurements: Arc<dyn MeasurementRepository> =
            Arc::new(SqlxMeasurementRepository::new(pool.clone()));
        let schedules: Arc<dyn ScheduleRepository> =
            Arc::new(SqlxScheduleRepository::new(pool.clone()));

        let cache = Arc::new(ProcessCache::new(config.process_cache_capacity));
        let probes = Arc::new(ProbeRegistry::with_builtin_probes());
        let events = Arc::new(monitor_event_bus(config.event_channel_capacity));

        let engine = Scheduler::new(config.scheduler_config());
        let scheduler = Arc::new(MonitorScheduler::new(engine.clone(), cache.clone()));

        let probing = ProbingUnitFactory::builder()
            .services(services.clone())
            .processes(processes.clone())
            .measurements(measurements.clone())
            .clients(clients)
            .probes(probes.clone())
            .cache(cache.clone())
            .build()?;

        let measurement_retention = config.measurement_retention();
        let job_types = Arc::new(JobTypeRegistry::new());
        job_types.register(PROBING_JOB_TYPE, Arc::new(probing));
        if let Some(retention) = measurement_retention {
            job_types.register(
                PURGE_JOB_TYPE,
                Arc::new(PurgeJobFactory::new(measurements.clone(), retention)),
            );
        }
        engine.set_job_factory(job_types.clone());

        let supervisor = Arc::new(FailureSupervisor::new(
            processes.clone(),
            engine,
            events.clone(),
        ));
        scheduler.engine().set_job_listener(supervisor.clone());

        let monitor = Arc::new(MonitorService::new(
            services,
            processes,
            measurements,
            schedules,
            scheduler.clone(),
            cache,
        ));

        Ok(Self {
            pool,
            monitor,
            scheduler,
            job_types,
            probes,
            events,
            supervisor,
            measurement_retention,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Restore persisted jobs, schedule housekeeping and start firing.
    pub async fn start(&self) -> Result<()> {
        self.monitor.restore_jobs().await?;
        if self.measurement_retention.is_some() {
            self.scheduler.schedule_purge()?;
        }
        self.scheduler.engine().start();
        info!("Services started");
        Ok(())
    }

    pub fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<MonitorEvent>> {
        self.events.subscribe(channel)
    }

    /// Wait until the failure handlers running right now have finished.
    pub async fn wait_for_supervision(&self) {
        self.supervisor.wait_idle().await;
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop firing, drain running firings and failure handlers, then close the pool.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!(timeout = ?timeout, "Shutting down services");
        self.cancellation_token.cancel();

        let drained = tokio::time::timeout(timeout, async {
            self.scheduler.engine().shutdown(true).await;
            self.supervisor.shutdown().await;
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        self.pool.close().await;
        info!("Services shut down");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
