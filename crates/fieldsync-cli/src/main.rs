//! fieldsync - command-line driver for the offline data manager.
//!
//! Runs the manager against the configured backend so its caching, queueing
//! and sync behaviour can be exercised without the web app.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fieldsync_core::api::Probe;
use fieldsync_core::utils::format_last_sync;
use fieldsync_core::{
    ApiClient, Collaborators, Config, Coordinates, DataType, ManagerOptions, OfflineManager,
    Operation,
};

const USAGE: &str = "\
Usage: fieldsync <command>

Commands:
  status                   Connectivity, last sync and pending operations
  get <lat> <lon> <type>   Best available value (types: smap, modis, weather)
  record <type> <json>     Record a mutation (profile-save, crop-data-update,
                           achievement-unlock, feedback-submit)
  sync                     Sync the pending queue now
  offline <on|off>         Toggle manual offline mode
  watch                    Monitor connectivity until Ctrl-C";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily file under the data directory. The
/// returned guard flushes the file writer when dropped.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fieldsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "help" | "--help" | "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let _guard = init_tracing(&config);
    info!(command, "fieldsync starting");

    let client = Arc::new(
        ApiClient::with_timeouts(
            &config.api_base_url,
            config.request_timeout(),
            config.probe_settings().timeout,
        )
        .context("Failed to build HTTP client")?,
    );

    // No platform signal outside a browser; one probe stands in for it
    let platform_online = client.probe().await.is_ok();
    let options = ManagerOptions::from_config(&config, platform_online)?;
    let manager = OfflineManager::init(options, Collaborators::shared(client)).await;

    let result = run(&manager, command, &args[1..]).await;
    manager.shutdown().await;

    info!("fieldsync shutting down");
    result
}

async fn run(manager: &OfflineManager, command: &str, args: &[String]) -> Result<()> {
    match command {
        "status" => print_status(manager).await,
        "get" => {
            let [lat, lon, data_type] = args else {
                bail!("Usage: fieldsync get <lat> <lon> <type>");
            };
            let lat: f64 = lat.parse().with_context(|| format!("Invalid latitude: {}", lat))?;
            let lon: f64 = lon.parse().with_context(|| format!("Invalid longitude: {}", lon))?;

            let point = manager
                .get_data(Coordinates::new(lat, lon), &DataType::parse(data_type))
                .await;
            println!("{}", serde_json::to_string_pretty(&point)?);
            Ok(())
        }
        "record" => {
            let [kind, payload] = args else {
                bail!("Usage: fieldsync record <type> <json>");
            };
            let payload = serde_json::from_str(payload).context("Payload is not valid JSON")?;
            let operation = Operation::from_parts(kind, payload)
                .with_context(|| format!("Not a valid {} payload", kind))?;

            let outcome = manager.record_mutation(operation).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        "sync" => {
            report_sync(manager).await;
            Ok(())
        }
        "offline" => {
            let enabled = match args.first().map(String::as_str) {
                Some("on") => true,
                Some("off") => false,
                _ => bail!("Usage: fieldsync offline <on|off>"),
            };
            let state = manager.set_manual_offline_mode(enabled).await;
            println!("Connectivity: {}", state);
            if !enabled {
                report_sync(manager).await;
            }
            Ok(())
        }
        "watch" => watch(manager).await,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

/// Sync now and print what each pass did.
async fn report_sync(manager: &OfflineManager) {
    let summaries = manager.sync_now().await;
    let mut printed = false;
    for summary in summaries.iter().filter(|s| s.attempted() > 0) {
        println!("{}", summary.message());
        if let Some(e) = summary.partial_failure() {
            warn!(error = %e, "Sync incomplete");
        }
        printed = true;
    }
    if !printed {
        println!("Nothing to sync");
    }
}

async fn print_status(manager: &OfflineManager) -> Result<()> {
    let status = manager.get_status().await;
    println!("Connectivity: {}", status.connectivity_state);
    println!(
        "Last sync:    {}",
        format_last_sync(status.last_sync_time, Utc::now())
    );
    println!("Pending:      {}", status.pending_operation_count);
    Ok(())
}

async fn watch(manager: &OfflineManager) -> Result<()> {
    let mut transitions = manager.subscribe_transitions();
    let mut summaries = manager.subscribe_sync_summaries();

    print_status(manager).await?;
    println!("Watching connectivity (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = transitions.recv() => match received {
                Ok(t) => println!("[{}] {} -> {}", t.at.format("%H:%M:%S"), t.from, t.to),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            received = summaries.recv() => match received {
                Ok(summary) => println!("[{}] {}", summary.finished_at.format("%H:%M:%S"), summary.message()),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
