// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! ipmi-fanctl: system service that polls the BMC for CPU temperature and
//! drives the chassis fans from an idle or sustained-load curve.

use anyhow::Context;
use clap::Parser;
use ipmi_fan_control::config::{Args, Settings};
use ipmi_fan_control::controller::Controller;
use ipmi_fan_control::daemon::FanDaemon;
use ipmi_fan_control::ipmi::Ipmi;
use std::future::Future;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = Settings::load(&args).context("Invalid configuration")?;
    log::info!("Starting temperature control with options: {{{settings}}}");

    // Armed before anything can put the fans into manual mode.
    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;

    let controller = Controller::from_settings(&settings);
    let ipmi = Ipmi::new(
        settings.interface.clone(),
        settings.host.clone(),
        settings.username.clone(),
        settings.password.clone(),
    );

    // Never leave the fans in manual mode, even if we fail to start.
    match ipmi.probe().await {
        Ok(temp) => log::info!("Connected to BMC at {}, reading {temp}°C", settings.host),
        Err(e) => {
            if let Err(release) = ipmi.release().await {
                log::warn!("Failed to release manual fan control: {release}");
            }
            return Err(e).context(format!("Could not reach BMC at {}", settings.host));
        }
    }

    let mut daemon = FanDaemon::new(controller, ipmi.clone(), ipmi);
    daemon
        .run(settings.interval, shutdown)
        .await
        .context("Failed to hand fan control back to the BMC")?;

    log::info!("Daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Install the Ctrl-C and SIGTERM handlers now and return a future that
/// resolves when either arrives.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        log::info!("Received shutdown signal");
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        log::info!("Received shutdown signal");
    })
}
