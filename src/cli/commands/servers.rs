//! Servers command implementation

use anyhow::Result;
use std::sync::Arc;

use super::load_config;
use crate::cli::args::Cli;
use crate::models::Server;
use crate::platform::{DeviceState, SystemDeviceState};
use crate::remote::WebSocketRepositoryProvider;
use crate::services::{
    LivenessWorker, LockFileForegroundHost, LogNotificationSink, MemoryServerRegistry,
    NotificationSink, ServerRegistry,
};
use crate::utils::logging::init_cli_logging;

pub async fn execute_servers_command(cli: &Cli) -> Result<()> {
    init_cli_logging(cli.verbose, cli.quiet)?;

    let path = cli.config_path();
    let config = load_config(cli)?;
    if config.servers.is_empty() {
        println!("No servers configured in {}", path.display());
        println!("Run `homelink config` to create an example configuration.");
        return Ok(());
    }

    let registry: Arc<dyn ServerRegistry> = Arc::new(MemoryServerRegistry::new(config.servers.clone()));
    let device: Arc<dyn DeviceState> = Arc::new(SystemDeviceState::new());
    let sink: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink);
    let worker = LivenessWorker::new(
        registry.clone(),
        device.clone(),
        Arc::new(WebSocketRepositoryProvider::new(registry, device.clone())),
        sink.clone(),
        Arc::new(LockFileForegroundHost::new(config.worker.lock_path(), sink)),
    );

    println!("Servers in {}:", path.display());
    for server in &config.servers {
        let eligibility = worker.evaluate(server.id).await;
        let internal = server.is_internal(device.as_ref()).await;
        println!(
            "  [{}] {} ({})",
            server.id,
            server.display_name(),
            server.websocket_setting.name()
        );
        println!("      url:        {}", server.url_for(internal));
        println!("      home:       {}", if internal { "yes" } else { "no" });
        println!("      registered: {}", registration(server));
        println!("      connection: {}", eligibility);
    }
    Ok(())
}

fn registration(server: &Server) -> &'static str {
    match (&server.access_token, &server.webhook_id) {
        (Some(_), Some(_)) => "yes",
        (Some(_), None) => "token only, notifications need a webhook_id",
        (None, _) => "no access token",
    }
}
