//! Listen command implementation

use anyhow::Result;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::load_config;
use crate::cli::args::Cli;
use crate::platform::{DeviceState, SystemDeviceState};
use crate::remote::WebSocketRepositoryProvider;
use crate::services::liveness_worker::WORK_NAME;
use crate::services::{
    FileServerRegistry, JsonLinesSink, LivenessWorker, LockFileForegroundHost, LogNotificationSink,
    NotificationSink, PeriodicScheduler, ServerRegistry, WorkState, WorkerSettings,
    start_liveness_work,
};
use crate::utils::logging::{init_daemon_logging, level_from_flags, parse_level};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn execute_listen_command(
    cli: &Cli,
    once: bool,
    notifications_file: Option<PathBuf>,
) -> Result<()> {
    let path = cli.config_path();
    let config = load_config(cli)?;

    let level = if cli.verbose > 0 || cli.quiet {
        level_from_flags(cli.verbose, cli.quiet)
    } else {
        parse_level(&config.logging.level)
    };
    let log_file = cli.log_file.clone().or_else(|| config.logging.file.clone());
    init_daemon_logging(
        cli.log_json || config.logging.structured,
        log_file.as_deref(),
        Some(level),
    )?;

    if config.servers.is_empty() {
        warn!("No servers configured in {}", path.display());
    }

    let registry: Arc<dyn ServerRegistry> =
        Arc::new(FileServerRegistry::new(&path, config.servers.clone()));
    let device: Arc<dyn DeviceState> = Arc::new(SystemDeviceState::new());
    let sink: Arc<dyn NotificationSink> = match notifications_file {
        Some(file) => {
            info!("Writing notifications to {}", file.display());
            Arc::new(JsonLinesSink::new(file))
        }
        None => Arc::new(LogNotificationSink),
    };
    let apis = Arc::new(WebSocketRepositoryProvider::new(
        registry.clone(),
        device.clone(),
    ));
    let foreground = Arc::new(LockFileForegroundHost::new(
        config.worker.lock_path(),
        sink.clone(),
    ));

    let worker = Arc::new(
        LivenessWorker::new(registry, device, apis, sink, foreground)
            .with_settings(WorkerSettings::from(&config.worker)),
    );
    let (stop_tx, stop_rx) = watch::channel(false);

    if once {
        let work = worker.do_work(stop_rx);
        tokio::pin!(work);
        let outcome = tokio::select! {
            outcome = &mut work => outcome?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping worker");
                let _ = stop_tx.send(true);
                work.await?
            }
        };
        info!("Worker cycle finished: {:?}", outcome);
        return Ok(());
    }

    let scheduler = PeriodicScheduler::new();
    start_liveness_work(&scheduler, worker, config.worker.period(), stop_rx);
    info!(
        "Listening for notifications every {} minute(s), press Ctrl-C to stop",
        config.worker.period_minutes.max(1)
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = stop_tx.send(true);

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while scheduler.work_state(WORK_NAME) == Some(WorkState::Running) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    scheduler.cancel_all();
    Ok(())
}
