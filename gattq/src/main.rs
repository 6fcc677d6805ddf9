/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use gattq::config::scenario::Step;
use gattq::config::{ConfigManager, Scenario};
use gattq::scheduler;
use gattq::SchedulerEvent;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Runs a scripted scenario through the operation scheduler against the
/// simulated transport.
///
/// Example:
///   gattq -c gattq.yaml -s scenario.yaml --attempt-limit 3 --fault-correction
#[derive(Debug, Parser)]
#[command(
    name = "gattq",
    about = "Single-flight GATT operation scheduler – simulated demo",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML configuration (policy, devices, templates).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Path to the YAML scenario (simulated faults and operation steps).
    #[arg(short = 's', long = "scenario")]
    scenario: PathBuf,

    /// Attempts per device before a disconnect is forced (0 = unlimited).
    /// Overrides the configuration file.
    #[arg(short = 'a', long = "attempt-limit")]
    attempt_limit: Option<u32>,

    /// Inject missing connect / discover operations automatically.
    #[arg(long = "fault-correction", default_value_t = false)]
    fault_correction: bool,

    /// Reconnect devices that drop their link unexpectedly.
    #[arg(long = "auto-reconnect", default_value_t = false)]
    auto_reconnect: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=gattq=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!(
        config           = ?cli.config,
        scenario         = %cli.scenario.display(),
        attempt_limit    = ?cli.attempt_limit,
        fault_correction = cli.fault_correction,
        auto_reconnect   = cli.auto_reconnect,
        "gattq starting up"
    );

    // ── Load configuration ────────────────────────────────────────────────────
    let mut config = ConfigManager::new();
    match &cli.config {
        Some(path) => {
            if let Err(e) = config.load_from_file(path) {
                error!("Failed to load configuration: {:#}", e);
                process::exit(1);
            }
        }
        None => warn!("No configuration file provided, using default policy and no templates"),
    }

    let mut policy = config.policy();
    if let Some(limit) = cli.attempt_limit {
        policy.attempt_limit = limit;
    }
    policy.fault_correction |= cli.fault_correction;
    policy.auto_reconnect |= cli.auto_reconnect;
    config.set_policy(policy);

    let scenario = match Scenario::load_from_file(&cli.scenario) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load scenario: {:#}", e);
            process::exit(1);
        }
    };

    // ── Start the scheduler ───────────────────────────────────────────────────
    let (handle, task) = scheduler::spawn(
        scenario.network(),
        config.policy(),
        config.templates().clone(),
    );

    for (address, name) in config.devices() {
        handle.register_device(address.clone(), Some(name.clone()));
    }

    let mut events = handle.subscribe();
    let observer = tokio::spawn(async move {
        let (mut ok, mut failed) = (0usize, 0usize);
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::Operation(record)) => {
                    if record.is_success() {
                        ok += 1;
                        info!("{}", record);
                    } else {
                        failed += 1;
                        warn!("{}", record);
                    }
                }
                Ok(SchedulerEvent::QueueActiveChanged(active)) => info!(active, "queue activity"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "observer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        (ok, failed)
    });

    // ── Run the steps ─────────────────────────────────────────────────────────
    for step in &scenario.steps {
        let accepted = match step {
            Step::Enqueue(op) => handle.enqueue(op.clone()).await,
            Step::Subscribe {
                address,
                characteristic,
                enable,
                timeout_ms,
            } => {
                handle
                    .subscribe_notifications(address, *characteristic, *enable, *timeout_ms)
                    .await
            }
            Step::WriteValue {
                address,
                characteristic,
                value,
                timeout_ms,
            } => {
                match handle
                    .write_value(address.clone(), *characteristic, value.clone(), *timeout_ms)
                    .await
                {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(?step, "step skipped: {}", e);
                        continue;
                    }
                }
            }
        };
        if !accepted {
            warn!(?step, "step refused as duplicate");
        }
    }

    handle.wait_idle().await;

    for address in scenario.devices() {
        info!(
            address,
            connected = handle.is_connected(address),
            discovered = handle.is_discovered(address),
            "final link state"
        );
    }

    handle.shutdown();
    if let Err(e) = task.await {
        error!("Scheduler task failed: {}", e);
    }
    drop(handle);

    match observer.await {
        Ok((ok, failed)) => info!(ok, failed, "scenario finished"),
        Err(e) => error!("Observer task failed: {}", e),
    }
}
