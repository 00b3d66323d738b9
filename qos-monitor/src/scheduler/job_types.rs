//! Dispatch from job type tags to per-type job factories.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};
use trigger_engine::{EngineError, Job, JobExecutionContext, JobFactory, SimpleJobFactory};

/// The engine's job factory, fanning out by [`trigger_engine::JobDetail::job_type`].
///
/// Unknown types fall back to [`SimpleJobFactory`], which builds jobs from
/// their default constructor.
#[derive(Default)]
pub struct JobTypeRegistry {
    factories: RwLock<HashMap<String, Arc<dyn JobFactory>>>,
    fallback: SimpleJobFactory,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a job type, returning the one it replaces.
    pub fn register(
        &self,
        job_type: impl Into<String>,
        factory: Arc<dyn JobFactory>,
    ) -> Option<Arc<dyn JobFactory>> {
        let job_type = job_type.into();
        let previous = self.factories.write().insert(job_type.clone(), factory);
        if previous.is_some() {
            info!(job_type = %job_type, "Job factory replaced");
        } else {
            debug!(job_type = %job_type, "Job factory registered");
        }
        previous
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.factories.read().contains_key(job_type)
    }

    fn factory_for(&self, job_type: &str) -> Option<Arc<dyn JobFactory>> {
        self.factories.read().get(job_type).cloned()
    }
}

#[async_trait]
impl JobFactory for JobTypeRegistry {
    async fn new_job(&self, ctx: &JobExecutionContext) -> Result<Box<dyn Job>, EngineError> {
        match self.factory_for(ctx.job_detail.job_type()) {
            Some(factory) => factory.new_job(ctx).await,
            None => self.fallback.new_job(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::any::Any;
    use std::time::Duration;
    use trigger_engine::{JobDetail, JobExecutionError, JobKey, Schedule, Trigger, TriggerKey};

    #[derive(Default)]
    struct Marker(&'static str);

    #[async_trait]
    impl Job for Marker {
        async fn execute(&mut self, _ctx: &JobExecutionContext) -> Result<(), JobExecutionError> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct MarkerFactory(&'static str);

    #[async_trait]
    impl JobFactory for MarkerFactory {
        async fn new_job(&self, _ctx: &JobExecutionContext) -> Result<Box<dyn Job>, EngineError> {
            Ok(Box::new(Marker(self.0)))
        }
    }

    fn context(detail: JobDetail) -> JobExecutionContext {
        let now = Utc::now();
        let trigger = Trigger::new(
            TriggerKey::new("t", "g"),
            detail.key().clone(),
            Schedule::simple(Duration::from_secs(60)),
            now,
            None,
        );
        JobExecutionContext {
            job_detail: detail,
            trigger,
            fire_time: now,
            scheduled_fire_time: now,
            next_fire_time: None,
            refire_count: 0,
        }
    }

    fn marker_of(job: &dyn Job) -> &'static str {
        job.as_any().downcast_ref::<Marker>().unwrap().0
    }

    #[tokio::test]
    async fn test_dispatches_by_job_type() {
        let registry = JobTypeRegistry::new();
        registry.register("a", Arc::new(MarkerFactory("from-a")));
        registry.register("b", Arc::new(MarkerFactory("from-b")));

        let ctx = context(JobDetail::new(JobKey::new("j", "g"), "b"));
        let job = registry.new_job(&ctx).await.unwrap();
        assert_eq!(marker_of(job.as_ref()), "from-b");
    }

    #[tokio::test]
    async fn test_register_returns_previous() {
        let registry = JobTypeRegistry::new();
        assert!(registry.register("a", Arc::new(MarkerFactory("one"))).is_none());
        assert!(registry.register("a", Arc::new(MarkerFactory("two"))).is_some());
        assert!(registry.is_registered("a"));

        let ctx = context(JobDetail::new(JobKey::new("j", "g"), "a"));
        let job = registry.new_job(&ctx).await.unwrap();
        assert_eq!(marker_of(job.as_ref()), "two");
    }

    #[tokio::test]
    async fn test_unknown_type_falls_back_to_default_constructor() {
        let registry = JobTypeRegistry::new();
        let detail =
            JobDetail::new(JobKey::new("j", "g"), "cleanup").with_default_constructor::<Marker>();
        let job = registry.new_job(&context(detail)).await.unwrap();
        assert_eq!(marker_of(job.as_ref()), "");

        let unwired = JobDetail::new(JobKey::new("j", "g"), "unknown");
        let err = registry.new_job(&context(unwired)).await.err().unwrap();
        assert!(matches!(err, EngineError::Instantiation { .. }));
    }
}
