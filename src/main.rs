//! pingmon - network reachability monitor

use pingmon::config::{MonitorSettings, ServerConfig};
use pingmon::monitor::Monitor;
use pingmon::notify::notifiers_from_settings;
use pingmon::probe::IcmpProber;
use pingmon::scheduler::PingDriver;
use pingmon::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingmon=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    let settings = MonitorSettings::load(&cfg.config_path).await?;
    tracing::info!(
        "Loaded {} devices from {}",
        settings.devices.len(),
        cfg.config_path.display()
    );

    let notifiers = notifiers_from_settings(&settings)?;
    let driver = PingDriver::new(cfg.tick, cfg.dispatch_gap);
    let monitor = Arc::new(Monitor::new(driver, Arc::new(IcmpProber::new()), notifiers));

    for device in settings.devices {
        monitor.add_device(device);
    }
    monitor.start();

    // Start web server
    if cfg.http_port != 0 {
        let server = Server::new(cfg.http_port, monitor.clone());
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                tracing::error!("Web server failed: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    monitor.stop().await;

    Ok(())
}
