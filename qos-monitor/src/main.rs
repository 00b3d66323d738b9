use anyhow::Context;
use qos_monitor::config::AppConfig;
use qos_monitor::services::ServiceContainer;
use qos_monitor::{database, logging, panic_hook};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("initializing logging")?;
    panic_hook::install(&config.log_dir);

    let pool = database::init_pool(&config.database_url)
        .await
        .context("opening database")?;
    database::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let container = ServiceContainer::new(pool, &config).context("wiring services")?;
    logging_config.start_retention_cleanup(container.cancellation_token());
    container.start().await.context("starting scheduler")?;

    info!(
        workers = config.scheduler_workers,
        timezone = %config.scheduler_timezone,
        filter = %logging_config.get_filter(),
        "qos-monitor running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}
