use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use cronhost::{
    build_catalog, AppConfig, CatalogHandle, ConcurrencyGate, ConfigWatcher, ExecutionRecorder,
    LogAlertSink, Scheduler, SystemClock, ZoneResolver,
};

/// Cron scheduling host for shell commands.
#[derive(Parser)]
#[command(name = "cronhost", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(
        long,
        env = "CRONHOST_CONFIG",
        default_value = "cronhost.json",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduling host (default when no subcommand is given)
    Serve,
    /// Validate the configuration file and print the report
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
        Some(Command::Check) => check(cli.config),
    }
}

async fn serve(path: PathBuf) {
    // The initial read is the only fatal error; everything after start-up is
    // recoverable.
    let config = AppConfig::load(&path).unwrap_or_else(|e| {
        eprintln!("Failed to read config '{}': {e}", path.display());
        std::process::exit(1);
    });

    let resolver = ZoneResolver;
    let (catalog, report) = build_catalog(&config, &resolver, 0);
    report.log();

    let handle = CatalogHandle::new(catalog);
    let gate = Arc::new(ConcurrencyGate::new(config.scheduler.max_parallelism));
    let recorder = Arc::new(ExecutionRecorder::new(
        config.monitoring.alerts.clone(),
        LogAlertSink,
    ));
    let scheduler = Scheduler::new(handle.clone(), gate, recorder, SystemClock, &config.scheduler);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = ConfigWatcher::new(path, handle, resolver);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_task.await;
    match watcher_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "config watcher exited with error"),
        Err(e) => tracing::error!(error = %e, "config watcher task panicked"),
        Ok(Ok(())) => {}
    }
    tracing::info!("cronhost stopped");
}

fn check(path: PathBuf) {
    let config = AppConfig::load(&path).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let (catalog, report) = build_catalog(&config, &ZoneResolver, 0);

    println!("{:<24} {:<10} {:<20} SCHEDULE", "ID", "STATUS", "ZONE");
    println!("{}", "-".repeat(72));
    for job in &catalog.jobs {
        let status = if job.cron.is_none() {
            "invalid"
        } else if job.enabled {
            "enabled"
        } else {
            "disabled"
        };
        println!(
            "{:<24} {:<10} {:<20} {}",
            job.id, status, job.zone_name, job.cron_source
        );
    }
    println!();
    println!(
        "total {}, enabled {}, disabled {}, invalid cron {}, zone fallbacks {}",
        report.total,
        report.valid_enabled,
        report.disabled,
        report.invalid_cron,
        report.zone_fallbacks
    );
    for issue in &report.issues {
        println!("  {}: {}", issue.id, issue.detail);
    }
    if report.nothing_runnable() {
        println!("warning: configuration contains no runnable commands");
    }
}

/// Resolves when the process receives a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix both signals are handled so service managers (`systemctl stop`,
/// container runtimes) trigger a clean drain of in-flight commands. On
/// non-Unix only Ctrl-C (SIGINT) is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c  => {}
        _ = sigterm => {}
    }
}
