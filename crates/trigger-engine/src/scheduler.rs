//! Scheduler: the public face of the engine.
//!
//! Owns the job store, the firing loop and the two global hooks. Store
//! mutations are synchronous and cheap; firings run as tokio tasks bounded
//! by a semaphore.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::job::{JobDetail, JobExecutionContext, JobFactory, JobListener, SimpleJobFactory};
use crate::key::{JobKey, TriggerKey};
use crate::store::JobStore;
use crate::trigger::Trigger;

/// Default number of concurrent firings.
pub const DEFAULT_WORKER_THREADS: usize = 10;

/// Default misfire threshold (60 seconds).
pub const DEFAULT_MISFIRE_THRESHOLD: Duration = Duration::from_secs(60);

/// Default upper bound on how long the loop sleeps without a due trigger.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(30);

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of firings executing at once.
    pub worker_threads: usize,
    /// Time zone used for calendar-interval triggers.
    pub time_zone: Tz,
    /// How late a trigger may be and still fire for its missed time.
    pub misfire_threshold: Duration,
    /// Maximum sleep between two store scans.
    pub idle_wait: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            time_zone: Tz::UTC,
            misfire_threshold: DEFAULT_MISFIRE_THRESHOLD,
            idle_wait: DEFAULT_IDLE_WAIT,
        }
    }
}

struct Inner {
    config: SchedulerConfig,
    misfire_threshold: TimeDelta,
    store: Mutex<JobStore>,
    factory: RwLock<Arc<dyn JobFactory>>,
    listener: RwLock<Option<Arc<dyn JobListener>>>,
    wakeup: Notify,
    workers: Arc<Semaphore>,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

/// Job/trigger scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let misfire_threshold =
            TimeDelta::from_std(config.misfire_threshold).unwrap_or(TimeDelta::seconds(60));
        let workers = Arc::new(Semaphore::new(config.worker_threads.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                misfire_threshold,
                store: Mutex::new(JobStore::new()),
                factory: RwLock::new(Arc::new(SimpleJobFactory)),
                listener: RwLock::new(None),
                wakeup: Notify::new(),
                workers,
                cancellation_token: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Install the global job factory, replacing the previous one.
    pub fn set_job_factory(&self, factory: Arc<dyn JobFactory>) {
        *self.inner.factory.write() = factory;
    }

    /// Install the global job listener, replacing the previous one.
    pub fn set_job_listener(&self, listener: Arc<dyn JobListener>) {
        info!(listener = listener.name(), "Job listener installed");
        *self.inner.listener.write() = Some(listener);
    }

    // ========== Jobs ==========

    pub fn add_job(&self, detail: JobDetail, replace: bool) -> Result<()> {
        self.ensure_running()?;
        let key = detail.key().clone();
        self.inner.store.lock().store_job(detail, replace)?;
        debug!(job = %key, replace, "Job stored");
        Ok(())
    }

    /// Delete a job and all of its triggers. Returns whether it existed.
    pub fn delete_job(&self, key: &JobKey) -> Result<bool> {
        self.ensure_running()?;
        let removed = self.inner.store.lock().remove_job(key);
        if removed {
            debug!(job = %key, "Job deleted");
            self.inner.wakeup.notify_one();
        }
        Ok(removed)
    }

    pub fn get_job_detail(&self, key: &JobKey) -> Option<JobDetail> {
        self.inner.store.lock().job(key).cloned()
    }

    pub fn pause_job(&self, key: &JobKey) -> Result<()> {
        self.ensure_running()?;
        self.inner.store.lock().pause_job(key)?;
        info!(job = %key, "Job paused");
        Ok(())
    }

    pub fn resume_job(&self, key: &JobKey) -> Result<()> {
        self.ensure_running()?;
        self.inner.store.lock().resume_job(
            key,
            Utc::now(),
            &self.inner.config.time_zone,
            self.inner.misfire_threshold,
        )?;
        info!(job = %key, "Job resumed");
        self.inner.wakeup.notify_one();
        Ok(())
    }

    pub fn is_job_paused(&self, key: &JobKey) -> bool {
        self.inner.store.lock().is_job_paused(key)
    }

    // ========== Triggers ==========

    /// Store a trigger and return its first fire time.
    pub fn schedule_trigger(&self, mut trigger: Trigger) -> Result<DateTime<Utc>> {
        self.ensure_running()?;
        let first = self.prepare(&mut trigger)?;
        let key = trigger.key().clone();
        self.inner.store.lock().store_trigger(trigger)?;
        debug!(trigger = %key, first_fire = %first, "Trigger scheduled");
        self.inner.wakeup.notify_one();
        Ok(first)
    }

    /// Remove a trigger. Returns whether it existed.
    pub fn unschedule_trigger(&self, key: &TriggerKey) -> Result<bool> {
        self.ensure_running()?;
        let removed = self.inner.store.lock().remove_trigger(key);
        if removed {
            debug!(trigger = %key, "Trigger unscheduled");
            self.inner.wakeup.notify_one();
        }
        Ok(removed)
    }

    /// Atomically replace the trigger `old` with `new`.
    pub fn reschedule_trigger(&self, old: &TriggerKey, mut new: Trigger) -> Result<DateTime<Utc>> {
        self.ensure_running()?;
        let first = self.prepare(&mut new)?;
        self.inner.store.lock().replace_trigger(old, new)?;
        debug!(trigger = %old, first_fire = %first, "Trigger rescheduled");
        self.inner.wakeup.notify_one();
        Ok(first)
    }

    pub fn get_trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.inner.store.lock().trigger(key).cloned()
    }

    pub fn get_triggers_of_job(&self, key: &JobKey) -> Vec<Trigger> {
        self.inner.store.lock().triggers_of_job(key)
    }

    // ========== Enumeration ==========

    pub fn job_group_names(&self) -> Vec<String> {
        self.inner.store.lock().job_group_names()
    }

    pub fn trigger_group_names(&self) -> Vec<String> {
        self.inner.store.lock().trigger_group_names()
    }

    pub fn job_keys(&self, group: &str) -> Vec<JobKey> {
        self.inner.store.lock().job_keys(group)
    }

    pub fn trigger_keys(&self, group: &str) -> Vec<TriggerKey> {
        self.inner.store.lock().trigger_keys(group)
    }

    // ========== Lifecycle ==========

    /// Start the firing loop. Must be called inside a tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            workers = self.inner.config.worker_threads,
            time_zone = %self.inner.config.time_zone,
            "Scheduler started"
        );
        let inner = self.inner.clone();
        tokio::spawn(run_loop(inner));
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancellation_token.is_cancelled()
    }

    /// Stop firing. With `wait`, returns after in-flight firings finished.
    pub async fn shutdown(&self, wait: bool) {
        self.inner.cancellation_token.cancel();
        self.inner.tracker.close();
        if wait {
            self.inner.tracker.wait().await;
        }
        info!("Scheduler shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    fn prepare(&self, trigger: &mut Trigger) -> Result<DateTime<Utc>> {
        trigger.validate()?;
        trigger
            .compute_first_fire_time(
                Utc::now(),
                &self.inner.config.time_zone,
                self.inner.misfire_threshold,
            )
            .ok_or_else(|| EngineError::WillNeverFire(trigger.key().clone()))
    }
}

async fn run_loop(inner: Arc<Inner>) {
    loop {
        if inner.cancellation_token.is_cancelled() {
            break;
        }

        let fired = inner
            .store
            .lock()
            .acquire_due(Utc::now(), &inner.config.time_zone);
        for ctx in fired {
            dispatch(&inner, ctx);
        }

        let idle = inner.config.idle_wait;
        let wait = match inner.store.lock().next_fire_time() {
            Some(next) => (next - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(idle),
            None => idle,
        };

        tokio::select! {
            _ = inner.cancellation_token.cancelled() => break,
            _ = inner.wakeup.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!("Scheduler loop exited");
}

fn dispatch(inner: &Arc<Inner>, ctx: JobExecutionContext) {
    let task_inner = inner.clone();
    inner.tracker.spawn(async move {
        let Ok(_permit) = task_inner.workers.clone().acquire_owned().await else {
            return;
        };
        run_firing(&task_inner, ctx).await;
    });
}

async fn run_firing(inner: &Inner, mut ctx: JobExecutionContext) {
    let job_key = ctx.job_key().clone();
    let factory = inner.factory.read().clone();

    let mut job = match factory.new_job(&ctx).await {
        Ok(job) => job,
        Err(e) => {
            error!(job = %job_key, error = %e, "Job factory failed, skipping firing");
            return;
        }
    };

    debug!(job = %job_key, trigger = %ctx.trigger_key(), "Executing job");
    let mut outcome = AssertUnwindSafe(job.execute(&ctx)).catch_unwind().await;

    if let Ok(Err(e)) = &outcome
        && e.refire_immediately
    {
        warn!(job = %job_key, error = %e, "Job requested immediate refire");
        ctx.refire_count += 1;
        outcome = AssertUnwindSafe(job.execute(&ctx)).catch_unwind().await;
    }

    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            error!(job = %job_key, "Job panicked during execution");
            return;
        }
    };

    if let Err(e) = &result {
        warn!(job = %job_key, error = %e, "Job execution failed");
    }

    let listener = inner.listener.read().clone();
    if let Some(listener) = listener {
        listener.job_was_executed(&ctx, job.as_ref(), result.as_ref().err());
    }
}
