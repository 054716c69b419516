use anyhow::{Context, Result};
use helios::device::build_devices;
use helios::measurement::MeasurementClient;
use helios::{Config, ControlLoop, HysteresisScheduler, HysteresisSettings, LoopSettings, SchedulerContext};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    helios::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Helios starting up: inverter {}:{}, {} devices",
        config.inverter.ip,
        config.inverter.port,
        config.devices.len()
    );

    let client = MeasurementClient::modbus(&config.inverter, &config.registers)
        .map_err(|e| anyhow::anyhow!("Failed to create measurement client: {}", e))?;
    let devices = build_devices(&config.devices)
        .map_err(|e| anyhow::anyhow!("Failed to create devices: {}", e))?;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::from(&config.scheduler));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => info!("Termination signal received, shutting down"),
            Err(e) => error!("Signal handler failed: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut control = ControlLoop::new(
        client,
        scheduler,
        SchedulerContext::new(devices),
        LoopSettings::from_config(&config),
        shutdown_rx,
    );

    let result = control.run(config.control.max_cycles).await;
    signal_task.abort();

    match result {
        Ok(stats) => {
            info!("Helios shutdown complete after {} cycles", stats.total_cycles);
            Ok(())
        }
        Err(e) => {
            error!("Control loop failed with error: {}", e);
            Err(anyhow::anyhow!("Control loop error: {}", e))
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
