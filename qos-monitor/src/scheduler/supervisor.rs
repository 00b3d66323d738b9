//! Failure supervision of probing jobs.
//!
//! The engine calls [`FailureSupervisor::job_was_executed`] on its firing
//! task. The callback only captures what happened and hands the rest to a
//! separate task, so persistence and engine calls never delay completion.
//!
//! Concurrent failing firings of one job race on the persisted error flag.
//! The flag is re-read from storage, then set with a compare-and-set; only
//! the winner pauses the job and announces the failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use trigger_engine::{Job, JobExecutionContext, JobExecutionError, JobKey, JobListener, Scheduler};

use super::probing::ProbingUnit;
use crate::database::repositories::ProcessRepository;
use crate::events::{EXECUTION_CHANNEL, EventBus, FAILURE_CHANNEL, MonitorEvent};

/// What the supervisor needs to know about one completed firing.
#[derive(Debug, Clone)]
struct Observation {
    job: JobKey,
    trigger: String,
    fired_at: DateTime<Utc>,
    failed: bool,
}

impl Observation {
    fn service_id(&self) -> &str {
        self.job.group()
    }

    fn process_id(&self) -> &str {
        self.job.name()
    }
}

struct SupervisorInner {
    processes: Arc<dyn ProcessRepository>,
    engine: Scheduler,
    events: Arc<EventBus<MonitorEvent>>,
}

impl SupervisorInner {
    async fn handle(&self, observation: Observation) {
        self.publish(
            EXECUTION_CHANNEL,
            MonitorEvent::ExecutionCompleted {
                service_id: observation.service_id().to_string(),
                process_id: observation.process_id().to_string(),
                trigger: observation.trigger.clone(),
                fired_at: observation.fired_at,
                failed: observation.failed,
            },
        );

        if !observation.failed {
            return;
        }

        let (service_id, process_id) = (observation.service_id(), observation.process_id());
        match self.processes.find_process(service_id, process_id).await {
            Ok(Some(process)) if process.error => {
                debug!(job = %observation.job, "Failure already handled by another firing");
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(job = %observation.job, "Failed process no longer exists");
                return;
            }
            Err(e) => {
                error!(job = %observation.job, error = %e, "Failed to read process error flag");
                return;
            }
        }

        match self.processes.mark_failed(service_id, process_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job = %observation.job, "Lost error flag race, another firing handles it");
                return;
            }
            Err(e) => {
                error!(job = %observation.job, error = %e, "Failed to persist error flag");
                return;
            }
        }

        if let Err(e) = self.engine.pause_job(&observation.job) {
            error!(job = %observation.job, error = %e, "Failed to pause failing job");
        } else {
            info!(job = %observation.job, "Monitoring paused after failure");
        }

        self.publish(
            FAILURE_CHANNEL,
            MonitorEvent::FailureEntered {
                service_id: service_id.to_string(),
                process_id: process_id.to_string(),
                at: Utc::now(),
            },
        );
    }

    fn publish(&self, channel: &str, event: MonitorEvent) {
        if let Err(e) = self.events.publish(channel, event) {
            warn!(channel, error = %e, "Failed to publish monitor event");
        }
    }
}

/// The engine's job listener for probing jobs.
pub struct FailureSupervisor {
    inner: Arc<SupervisorInner>,
    tracker: TaskTracker,
}

impl FailureSupervisor {
    pub fn new(
        processes: Arc<dyn ProcessRepository>,
        engine: Scheduler,
        events: Arc<EventBus<MonitorEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                processes,
                engine,
                events,
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Wait until the handlers running right now have finished.
    ///
    /// Handlers spawned by firings that complete during the wait may still
    /// be running when this returns. Use [`FailureSupervisor::shutdown`]
    /// once the engine has stopped to drain everything.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Drain every handler. Call after the engine has shut down, so no
    /// firing can spawn another one.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Failure supervisor drained");
    }

    /// Number of handlers still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

impl JobListener for FailureSupervisor {
    fn name(&self) -> &str {
        "failure-supervisor"
    }

    fn job_was_executed(
        &self,
        ctx: &JobExecutionContext,
        job: &dyn Job,
        _error: Option<&JobExecutionError>,
    ) {
        let Some(unit) = job.as_any().downcast_ref::<ProbingUnit>() else {
            return;
        };

        let observation = Observation {
            job: ctx.job_key().clone(),
            trigger: ctx.trigger_key().to_string(),
            fired_at: ctx.fire_time,
            failed: unit.cant_measure(),
        };
        let inner = self.inner.clone();
        self.tracker.spawn(async move { inner.handle(observation).await });
    }
}
