//! pidmap - watch which processes on an adb device belong to given applications.
//!
//! Polls the device's process table, feeds changes into a `ProcessRegistry`
//! through a `DeviceMonitor`, and prints the owning pids of each requested
//! application id on every tick until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use pidmap_core::device::adb::{self, AdbDevice, AdbShell};
use pidmap_core::{
    CancellationToken, DeviceMonitor, DeviceTransport, ProbeConfig, ProcessRegistry,
    RegistryConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pidmap")]
#[command(about = "Map running processes on an adb device to application ids")]
struct Args {
    /// Device serial (as listed by `adb devices`)
    #[arg(short, long)]
    serial: String,

    /// Application id to look up (repeatable)
    #[arg(short, long = "app", required = true)]
    apps: Vec<String>,

    /// Path to the adb executable
    #[arg(long, default_value = "adb")]
    adb: PathBuf,

    /// Poll and report interval in milliseconds
    #[arg(long, default_value_t = ProbeConfig::DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    interval_ms: u64,

    /// JSON registry config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force the legacy (run-as) resolution path
    #[arg(long)]
    legacy: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => RegistryConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    if args.legacy {
        config = config.with_legacy(true);
    }
    let interval = Duration::from_millis(args.interval_ms.max(1));

    let shell = Arc::new(AdbShell::new(&args.adb, &args.serial));
    let device = Arc::new(
        AdbDevice::connect(shell.clone(), config.probe_timeout())
            .await
            .with_context(|| format!("connecting to {}", args.serial))?,
    );
    device.poll().await.context("reading initial process table")?;

    let registry = Arc::new(ProcessRegistry::new(device.clone(), shell, config)?);
    registry.refresh()?;
    info!(
        "Tracking {} processes on {} ({} resolution)",
        registry.len(),
        device.serial(),
        if registry.is_legacy() { "legacy" } else { "direct" }
    );

    let monitor = DeviceMonitor::spawn(registry.clone());
    let poll_token = CancellationToken::new();
    let poller = adb::watch(device.clone(), monitor.events(), interval, poll_token.clone());

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => report(&registry, &args.apps),
        }
    }
    info!("Shutdown signal received, exiting");

    poll_token.cancel();
    poller.await.context("poller task")?;
    let refreshes = monitor.shutdown().await;
    registry.shutdown();
    info!("Stopped after {} refreshes", refreshes);

    Ok(())
}

/// Print one line per application id: resolved pids, or a name-based guess.
fn report(registry: &ProcessRegistry, apps: &[String]) {
    for app in apps {
        let processes = registry.find_with_name_fallback(app);
        let pids: Vec<String> = processes.iter().map(|p| p.pid().to_string()).collect();
        let guessed = processes.iter().any(|p| !p.is_resolved());
        // Intentional stdout: this is the tool's output.
        match (pids.is_empty(), guessed) {
            (true, _) => println!("{app}: -"),
            (false, false) => println!("{app}: {}", pids.join(",")),
            (false, true) => println!("{app}: {} (by name)", pids.join(",")),
        }
    }
}
