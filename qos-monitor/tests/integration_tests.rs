//! Integration tests for qos-monitor.
//!
//! These tests run against a real SQLite database in a temporary directory
//! and a scripted remote client, with the trigger engine firing for real.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use qos_monitor::client::{ClientFactory, ServiceClient, ServiceRequest, ServiceResponse};
use qos_monitor::config::AppConfig;
use qos_monitor::database::repositories::{
    MeasurementRepository, ProcessRepository, ScheduleRepository, ServiceRepository,
    SqlxMeasurementRepository, SqlxProcessRepository, SqlxScheduleRepository,
    SqlxServiceRepository,
};
use qos_monitor::database::{DbPool, init_pool, run_migrations};
use qos_monitor::domain::{
    IntervalUnit, Measurement, MonitoredProcess, ProbeResult, ProcessStatus, ScheduleEntry, Service,
};
use qos_monitor::events::{EXECUTION_CHANNEL, FAILURE_CHANNEL, MonitorEvent};
use qos_monitor::services::ServiceContainer;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{Barrier, broadcast};
use trigger_engine::TriggerKey;

/// Helper to create a file-backed test database with migrations applied.
async fn setup_test_db() -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let pool = open_test_db(&dir).await;
    (dir, pool)
}

/// Open (or reopen) the database inside `dir`.
async fn open_test_db(dir: &TempDir) -> DbPool {
    let db_path = dir.path().join("qos.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );

    let pool = init_pool(&db_url).await.expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

fn test_config() -> AppConfig {
    AppConfig {
        measurement_retention_days: 0,
        ..AppConfig::default()
    }
}

/// Client behaviour shared by every client a factory hands out.
#[derive(Clone, Copy)]
enum Script {
    Succeed,
    TransportFailure,
}

struct ScriptedClient {
    script: Script,
    calls: Arc<AtomicUsize>,
    addresses: Arc<Mutex<Vec<String>>>,
    barrier: Option<Arc<Barrier>>,
}

#[async_trait]
impl ServiceClient for ScriptedClient {
    async fn execute(&self, request: &ServiceRequest) -> ServiceResponse {
        let sent_at = Utc::now();
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().push(request.address.clone());
        if let Some(barrier) = &self.barrier
            && call < 2
        {
            barrier.wait().await;
        }
        match self.script {
            Script::Succeed => {
                ServiceResponse::success(sent_at, 200, Bytes::from_static(b"<Result>ok</Result>"))
            }
            Script::TransportFailure => ServiceResponse::transport_exception(sent_at, "connection refused"),
        }
    }
}

struct ScriptedFactory {
    script: Script,
    calls: Arc<AtomicUsize>,
    addresses: Arc<Mutex<Vec<String>>>,
    barrier: Option<Arc<Barrier>>,
}

impl ScriptedFactory {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            addresses: Arc::new(Mutex::new(Vec::new())),
            barrier: None,
        })
    }

    /// The first two calls block until both are in flight.
    fn overlapping(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            addresses: Arc::new(Mutex::new(Vec::new())),
            barrier: Some(Arc::new(Barrier::new(2))),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Service addresses requested so far, in call order.
    fn addresses(&self) -> Vec<String> {
        self.addresses.lock().clone()
    }
}

impl ClientFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn ServiceClient> {
        Box::new(ScriptedClient {
            script: self.script,
            calls: self.calls.clone(),
            addresses: self.addresses.clone(),
            barrier: self.barrier.clone(),
        })
    }
}

async fn next_event(rx: &mut broadcast::Receiver<MonitorEvent>) -> MonitorEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for monitor event")
        .expect("event channel closed")
}

mod repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_tables_exist() {
        let (_dir, pool) = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for table in ["measurements", "probe_results", "processes", "schedules", "services"] {
            assert!(names.contains(&table), "{table} table missing");
        }
    }

    #[tokio::test]
    async fn test_service_and_process_crud() {
        let (_dir, pool) = setup_test_db().await;
        let services = SqlxServiceRepository::new(pool.clone());
        let processes = SqlxProcessRepository::new(pool.clone());

        let service = Service::new("wps-1", "http://localhost:8080/wps");
        assert!(services.create_service(&service).await.unwrap());
        assert!(!services.create_service(&service).await.unwrap(), "duplicate key");

        let process = MonitoredProcess::new("wps-1", "Execute", "<Execute/>");
        assert!(processes.create_process(&process).await.unwrap());
        assert!(!processes.create_process(&process).await.unwrap());

        let orphan = MonitoredProcess::new("missing", "Execute", "<Execute/>");
        assert!(processes.create_process(&orphan).await.unwrap_err().is_not_found());

        let mut updated = process.clone();
        updated.request_template = "<Execute version=\"2\"/>".into();
        processes.update_process(&updated).await.unwrap();
        let found = processes.find_process("wps-1", "Execute").await.unwrap().unwrap();
        assert_eq!(found.request_template, updated.request_template);

        assert!(services.delete_service("wps-1").await.unwrap());
        assert!(processes.find_process("wps-1", "Execute").await.unwrap().is_none());
        assert!(!services.delete_service("wps-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_cascades_to_processes() {
        let (_dir, pool) = setup_test_db().await;
        let services = SqlxServiceRepository::new(pool.clone());
        let processes = SqlxProcessRepository::new(pool.clone());

        services
            .create_service(&Service::new("old", "http://localhost/wps"))
            .await
            .unwrap();
        processes
            .create_process(&MonitoredProcess::new("old", "GetCapabilities", ""))
            .await
            .unwrap();

        services.rename_service("old", "new").await.unwrap();

        assert!(services.find_service("old").await.unwrap().is_none());
        assert_eq!(processes.list_processes("new").await.unwrap().len(), 1);
        assert!(services.rename_service("old", "other").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_schedules_follow_their_process() {
        let (_dir, pool) = setup_test_db().await;
        let services = SqlxServiceRepository::new(pool.clone());
        let processes = SqlxProcessRepository::new(pool.clone());
        let schedules = SqlxScheduleRepository::new(pool.clone());
        services
            .create_service(&Service::new("old", "http://localhost/wps"))
            .await
            .unwrap();
        processes
            .create_process(&MonitoredProcess::new("old", "Execute", ""))
            .await
            .unwrap();

        let start = Utc::now();
        let entry = ScheduleEntry::new(start, None, 60, IntervalUnit::Minute)
            .with_id(TriggerKey::new("t-1", "old"));
        schedules.create_schedule("old", "Execute", &entry).await.unwrap();
        assert!(matches!(
            schedules.create_schedule("old", "Execute", &entry).await.unwrap_err(),
            qos_monitor::Error::Validation(_)
        ));
        assert!(
            schedules
                .create_schedule("old", "Missing", &entry.clone().with_id(TriggerKey::new("t-2", "old")))
                .await
                .unwrap_err()
                .is_not_found()
        );

        let stored = schedules.list_schedules("old", "Execute").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!((stored[0].interval, stored[0].unit), (60, IntervalUnit::Minute));
        assert_eq!(stored[0].start.timestamp_millis(), start.timestamp_millis());
        assert_eq!(stored[0].end, None);

        let mut changed = entry.clone();
        changed.interval = 2;
        changed.unit = IntervalUnit::Day;
        assert!(schedules.update_schedule(&changed).await.unwrap());
        assert_eq!(
            schedules.list_schedules("old", "Execute").await.unwrap()[0].unit,
            IntervalUnit::Day
        );

        services.rename_service("old", "new").await.unwrap();
        assert!(schedules.list_schedules("old", "Execute").await.unwrap().is_empty());
        let moved = schedules.list_schedules("new", "Execute").await.unwrap();
        assert_eq!(moved[0].id, Some(TriggerKey::new("t-1", "new")));

        schedules
            .replace_schedules(
                "new",
                "Execute",
                &[entry.clone().with_id(TriggerKey::new("t-3", "new"))],
            )
            .await
            .unwrap();
        let replaced = schedules.list_schedules("new", "Execute").await.unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].id, Some(TriggerKey::new("t-3", "new")));

        assert!(schedules.delete_schedule("t-3").await.unwrap());
        assert!(!schedules.delete_schedule("t-3").await.unwrap());

        schedules.create_schedule("new", "Execute", &entry).await.unwrap();
        processes.delete_process("new", "Execute").await.unwrap();
        assert!(!schedules.delete_schedule("t-1").await.unwrap(), "cascaded with the process");
    }

    #[tokio::test]
    async fn test_mark_failed_is_compare_and_set() {
        let (_dir, pool) = setup_test_db().await;
        let services = SqlxServiceRepository::new(pool.clone());
        let processes = Arc::new(SqlxProcessRepository::new(pool.clone()));
        services
            .create_service(&Service::new("wps-1", "http://localhost/wps"))
            .await
            .unwrap();
        processes
            .create_process(&MonitoredProcess::new("wps-1", "Execute", ""))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            processes.mark_failed("wps-1", "Execute"),
            processes.mark_failed("wps-1", "Execute"),
        );
        assert_eq!(
            [a.unwrap(), b.unwrap()].iter().filter(|won| **won).count(),
            1
        );

        assert!(processes.set_error_flag("wps-1", "Execute", false).await.unwrap());
        assert!(processes.mark_failed("wps-1", "Execute").await.unwrap());
        assert!(!processes.mark_failed("wps-1", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_measurements_round_trip_and_purge() {
        let (_dir, pool) = setup_test_db().await;
        let services = SqlxServiceRepository::new(pool.clone());
        let processes = SqlxProcessRepository::new(pool.clone());
        let measurements = SqlxMeasurementRepository::new(pool.clone());
        services
            .create_service(&Service::new("wps-1", "http://localhost/wps"))
            .await
            .unwrap();
        processes
            .create_process(&MonitoredProcess::new("wps-1", "Execute", ""))
            .await
            .unwrap();

        let now = Utc::now();
        let old = Measurement::new(
            "wps-1",
            "Execute",
            now - TimeDelta::days(10),
            vec![ProbeResult::new("response_time", serde_json::json!({ "milliseconds": 12 }))],
        );
        let recent = Measurement::new(
            "wps-1",
            "Execute",
            now,
            vec![
                ProbeResult::new("response_size", serde_json::json!({ "bytes": 42 })),
                ProbeResult::new("response_time", serde_json::json!({ "milliseconds": 7 })),
            ],
        );

        let mut writer = measurements.writer();
        writer.save(&old).await.unwrap();
        writer.save(&recent).await.unwrap();
        writer.release();
        assert!(writer.save(&recent).await.is_err());

        let listed = measurements
            .list_measurements("wps-1", "Execute", None, None, None)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].created_at.timestamp_millis(), now.timestamp_millis());
        assert_eq!(listed[0].results, recent.results, "probe order is kept");

        let deleted = measurements
            .delete_older_than(now - TimeDelta::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let listed = measurements
            .list_measurements("wps-1", "Execute", None, None, Some(10))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}

mod monitor_tests {
    use super::*;

    #[tokio::test]
    async fn test_operator_validation() {
        let (_dir, pool) = setup_test_db().await;
        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), ScriptedFactory::new(Script::Succeed))
                .unwrap();
        let monitor = &container.monitor;

        assert!(monitor.create_service("system", "http://localhost").await.is_err());
        assert!(monitor.create_service("wps-1", "not a url").await.is_err());
        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        assert!(monitor.create_service("wps-1", "http://localhost/wps").await.is_err());

        assert!(
            monitor
                .create_process("missing", "Execute", "")
                .await
                .unwrap_err()
                .is_not_found()
        );
        monitor.create_process("wps-1", "Execute", "<Execute/>").await.unwrap();

        assert!(monitor.attach_schedule("wps-1", "Execute", "@fortnight(1), now, never").await.is_err());
        assert!(monitor.attach_schedule("wps-1", "Missing", "@day(1), now, never").await.is_err());
        assert!(monitor.list_schedules("wps-1", "Execute").is_empty());

        assert_eq!(
            monitor.process_status("wps-1", "Execute").await.unwrap(),
            ProcessStatus::Monitoring
        );
        assert_eq!(
            monitor.process_status("wps-1", "Missing").await.unwrap(),
            ProcessStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_rename_service_moves_jobs_and_schedules() {
        let (_dir, pool) = setup_test_db().await;
        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), ScriptedFactory::new(Script::Succeed))
                .unwrap();
        let monitor = &container.monitor;

        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        monitor.create_process("wps-1", "Execute", "<Execute/>").await.unwrap();
        let entry = monitor
            .attach_schedule("wps-1", "Execute", "@week(2), 2030-01-01, 2031-01-01")
            .await
            .unwrap();

        assert_eq!(monitor.rename_service("wps-1", "wps-2").await.unwrap(), 1);

        assert_eq!(
            monitor.process_status("wps-1", "Execute").await.unwrap(),
            ProcessStatus::NotFound
        );
        assert_eq!(
            monitor.process_status("wps-2", "Execute").await.unwrap(),
            ProcessStatus::Monitoring
        );
        let moved = monitor.list_schedules("wps-2", "Execute");
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].interval, 2);
        assert_eq!(moved[0].unit, IntervalUnit::Week);
        assert_eq!(moved[0].start, entry.start);
        assert_eq!(moved[0].end, entry.end);
        assert_ne!(moved[0].id, entry.id);
        assert!(container.scheduler.jobs_in("wps-1").is_empty());

        let stored = SqlxScheduleRepository::new(container.pool.clone())
            .list_schedules("wps-2", "Execute")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, moved[0].id);
    }

    #[tokio::test]
    async fn test_address_update_reaches_next_firing() {
        let (_dir, pool) = setup_test_db().await;
        let clients = ScriptedFactory::new(Script::Succeed);
        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), clients.clone()).unwrap();
        let mut executions = container.subscribe(EXECUTION_CHANNEL).unwrap();
        let monitor = &container.monitor;

        monitor.create_service("wps-1", "http://old.example/wps").await.unwrap();
        monitor.create_process("wps-1", "Execute", "<Execute/>").await.unwrap();
        assert!(monitor.update_service_address("wps-1", "not a url").await.is_err());
        let updated = monitor
            .update_service_address("wps-1", "http://new.example/wps")
            .await
            .unwrap();
        assert_eq!(updated.address, "http://new.example/wps");
        assert!(
            monitor
                .update_service_address("missing", "http://new.example/wps")
                .await
                .unwrap_err()
                .is_not_found()
        );

        container.start().await.unwrap();
        monitor
            .attach_schedule("wps-1", "Execute", "@hour(1), now, never")
            .await
            .unwrap();
        next_event(&mut executions).await;
        container.wait_for_supervision().await;

        assert_eq!(clients.addresses(), ["http://new.example/wps"]);
        container.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_schedules_survive_restart() {
        let (dir, pool) = setup_test_db().await;
        let container = ServiceContainer::with_client_factory(
            pool,
            &test_config(),
            ScriptedFactory::new(Script::Succeed),
        )
        .unwrap();
        let monitor = &container.monitor;

        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        monitor.create_process("wps-1", "Execute", "<Execute/>").await.unwrap();
        container.start().await.unwrap();
        let kept = monitor
            .attach_schedule("wps-1", "Execute", "@minute(60), 2030-01-01, never")
            .await
            .unwrap();
        let removed = monitor
            .attach_schedule("wps-1", "Execute", "@day(1), 2030-01-01, never")
            .await
            .unwrap();
        assert!(monitor.remove_schedule(removed.id.as_ref().unwrap()).await.unwrap());
        assert!(!monitor.remove_schedule(removed.id.as_ref().unwrap()).await.unwrap());

        // A cadence that ended while the monitor was down.
        let ended = ScheduleEntry::new(
            Utc::now() - TimeDelta::days(30),
            Some(Utc::now() - TimeDelta::days(1)),
            1,
            IntervalUnit::Hour,
        )
        .with_id(TriggerKey::new("ended", "wps-1"));
        SqlxScheduleRepository::new(container.pool.clone())
            .create_schedule("wps-1", "Execute", &ended)
            .await
            .unwrap();

        container.shutdown().await.unwrap();
        assert!(container.is_shutting_down());

        let pool = open_test_db(&dir).await;
        let restarted = ServiceContainer::with_client_factory(
            pool.clone(),
            &test_config(),
            ScriptedFactory::new(Script::Succeed),
        )
        .unwrap();
        assert!(!restarted.is_shutting_down());
        restarted.start().await.unwrap();

        let schedules = restarted.monitor.list_schedules("wps-1", "Execute");
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].id, kept.id);
        assert_eq!((schedules[0].interval, schedules[0].unit), (60, IntervalUnit::Minute));
        assert_eq!(schedules[0].start, kept.start);
        assert_eq!(schedules[0].end, None);
        assert_eq!(
            restarted.monitor.process_status("wps-1", "Execute").await.unwrap(),
            ProcessStatus::Monitoring
        );

        let stored = SqlxScheduleRepository::new(pool)
            .list_schedules("wps-1", "Execute")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1, "ended cadence is dropped");

        restarted.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_service_removes_jobs() {
        let (_dir, pool) = setup_test_db().await;
        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), ScriptedFactory::new(Script::Succeed))
                .unwrap();
        let monitor = &container.monitor;

        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        monitor.create_process("wps-1", "Execute", "").await.unwrap();
        monitor.create_process("wps-1", "Describe", "").await.unwrap();
        monitor
            .attach_schedule("wps-1", "Execute", "@day(1), 2030-01-01, never")
            .await
            .unwrap();

        assert!(monitor.delete_service("wps-1").await.unwrap());
        assert!(container.scheduler.jobs_in("wps-1").is_empty());
        assert!(monitor.list_processes("wps-1").await.unwrap().is_empty());
    }
}

mod firing_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_firing_stores_one_measurement() {
        let (_dir, pool) = setup_test_db().await;
        let clients = ScriptedFactory::new(Script::Succeed);
        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), clients.clone()).unwrap();
        let mut executions = container.subscribe(EXECUTION_CHANNEL).unwrap();

        let monitor = &container.monitor;
        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        monitor.create_process("wps-1", "Execute", "<Execute/>").await.unwrap();
        container.start().await.unwrap();
        monitor
            .attach_schedule("wps-1", "Execute", "@hour(1), now, never")
            .await
            .unwrap();

        let event = next_event(&mut executions).await;
        assert!(matches!(event, MonitorEvent::ExecutionCompleted { failed: false, .. }));
        container.wait_for_supervision().await;

        assert_eq!(clients.calls(), 1);
        let measurements = monitor
            .list_measurements("wps-1", "Execute", None, None, None)
            .await
            .unwrap();
        assert_eq!(measurements.len(), 1);
        let probes: Vec<&str> = measurements[0].results.iter().map(|r| r.probe.as_str()).collect();
        assert_eq!(probes, ["response_time", "response_size"]);
        assert_eq!(
            monitor.process_status("wps-1", "Execute").await.unwrap(),
            ProcessStatus::Monitoring
        );

        container.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_pauses_process() {
        let (_dir, pool) = setup_test_db().await;
        let clients = ScriptedFactory::new(Script::TransportFailure);
        let container =
            ServiceContainer::with_client_factory(pool.clone(), &test_config(), clients.clone()).unwrap();
        let mut failures = container.subscribe(FAILURE_CHANNEL).unwrap();

        let monitor = &container.monitor;
        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        monitor.create_process("wps-1", "Execute", "<Execute/>").await.unwrap();
        container.start().await.unwrap();

        let end = (Utc::now() + TimeDelta::days(30)).format("%Y-%m-%d").to_string();
        monitor
            .attach_schedule("wps-1", "Execute", &format!("@hour(1), now, {end}"))
            .await
            .unwrap();

        let event = next_event(&mut failures).await;
        assert_eq!(event.process_id(), "Execute");
        container.wait_for_supervision().await;

        assert_eq!(clients.calls(), 1, "transport errors are not retried");
        let processes = SqlxProcessRepository::new(pool);
        assert!(processes.find_process("wps-1", "Execute").await.unwrap().unwrap().error);
        assert!(container.scheduler.is_paused(&MonitoredProcess::new("wps-1", "Execute", "").job_key()));
        assert_eq!(
            monitor.process_status("wps-1", "Execute").await.unwrap(),
            ProcessStatus::Paused
        );
        assert!(
            monitor
                .list_measurements("wps-1", "Execute", None, None, None)
                .await
                .unwrap()
                .is_empty()
        );

        assert!(monitor.resume_process("wps-1", "Execute").await.unwrap());
        assert!(!processes.find_process("wps-1", "Execute").await.unwrap().unwrap().error);

        container.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_failures_pause_once() {
        let (_dir, pool) = setup_test_db().await;
        let clients = ScriptedFactory::overlapping(Script::TransportFailure);
        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), clients.clone()).unwrap();
        let mut executions = container.subscribe(EXECUTION_CHANNEL).unwrap();
        let mut failures = container.subscribe(FAILURE_CHANNEL).unwrap();

        let monitor = &container.monitor;
        monitor.create_service("wps-1", "http://localhost/wps").await.unwrap();
        let process = monitor.create_process("wps-1", "Execute", "").await.unwrap();
        container.start().await.unwrap();

        // Two firings, one second apart; the first blocks until the second is in flight.
        let start = Utc::now();
        let entry = ScheduleEntry::new(
            start,
            Some(start + TimeDelta::milliseconds(1500)),
            1,
            IntervalUnit::Second,
        );
        container
            .scheduler
            .attach_schedule(&process.job_key(), &entry)
            .unwrap();

        next_event(&mut failures).await;
        for _ in 0..2 {
            assert!(matches!(
                next_event(&mut executions).await,
                MonitorEvent::ExecutionCompleted { failed: true, .. }
            ));
        }
        container.wait_for_supervision().await;

        assert_eq!(clients.calls(), 2);
        assert!(failures.try_recv().is_err(), "failure announced once");
        assert!(executions.try_recv().is_err());
        assert!(container.scheduler.is_paused(&process.job_key()));

        container.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_keeps_failed_processes_paused() {
        let (_dir, pool) = setup_test_db().await;
        let services = SqlxServiceRepository::new(pool.clone());
        let processes = SqlxProcessRepository::new(pool.clone());
        services
            .create_service(&Service::new("wps-1", "http://localhost/wps"))
            .await
            .unwrap();
        for id in ["Execute", "Describe"] {
            processes
                .create_process(&MonitoredProcess::new("wps-1", id, ""))
                .await
                .unwrap();
        }
        processes.set_error_flag("wps-1", "Execute", true).await.unwrap();

        let container =
            ServiceContainer::with_client_factory(pool, &test_config(), ScriptedFactory::new(Script::Succeed))
                .unwrap();
        container.start().await.unwrap();

        let monitor = &container.monitor;
        assert_eq!(
            monitor.process_status("wps-1", "Execute").await.unwrap(),
            ProcessStatus::Paused
        );
        assert_eq!(
            monitor.process_status("wps-1", "Describe").await.unwrap(),
            ProcessStatus::Monitoring
        );

        container.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_job_scheduled_with_retention() {
        let (_dir, pool) = setup_test_db().await;
        let config = AppConfig {
            measurement_retention_days: 30,
            ..AppConfig::default()
        };
        let container =
            ServiceContainer::with_client_factory(pool, &config, ScriptedFactory::new(Script::Succeed))
                .unwrap();
        container.start().await.unwrap();

        assert_eq!(container.scheduler.jobs_in("system").len(), 1);
        assert!(container.job_types.is_registered("measurement-purge"));

        container.shutdown().await.unwrap();
    }
}
