//! sqlprobe - scheduled SQL probes exposed as Prometheus gauges.
//!
//! Usage:
//!   sqlprobe [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Path to configuration file (default: config.yaml)
//!   --dry-run              Run every probe once, print metrics to stdout
//!   -v, --verbose          Enable verbose logging
//!   --json-logs            Output logs in JSON format
//!   -V, --version          Print version information
//!   -h, --help             Print help

use anyhow::{Context, Result};
use clap::Parser;
use sqlprobe::{
    config::{Config, LogFormat},
    metrics::MetricSink,
    probe::Target,
    scheduler::Scheduler,
    server,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// sqlprobe - SQL probe exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Run every probe once, print metrics to stdout, then exit
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .context(format!("Failed to load config from {:?}", args.config))?;

    setup_logging(&args, &config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        targets = config.targets.len(),
        "Starting sqlprobe"
    );

    let sink = Arc::new(MetricSink::new().context("Failed to build metric registry")?);

    let targets: Vec<Arc<Target>> = config
        .targets
        .iter()
        .cloned()
        .map(|target| {
            info!(database = %target.name, host = %target.host, "Registering database target");
            Arc::new(Target::new(target))
        })
        .collect();

    // Handle dry-run mode
    if args.dry_run {
        let (_, shutdown_rx) = watch::channel(false);
        let scheduler = Scheduler::new(
            targets,
            Arc::clone(&sink),
            config.query_timeout,
            shutdown_rx,
        );
        scheduler.run_once().await;
        println!("{}", sink.render()?);
        return Ok(());
    }

    // Setup shutdown signal handling
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Metrics endpoint
    let listen_addr = format!("{}:{}", config.listen_host, config.listen_port);
    let mut server_task = tokio::spawn(server::serve(
        listen_addr,
        Arc::clone(&sink),
        shutdown_rx.clone(),
    ));

    // Probe scheduler
    let scheduler = Scheduler::new(targets, sink, config.query_timeout, shutdown_rx);

    info!(
        timeout_secs = config.query_timeout.as_secs(),
        "Starting probe scheduler"
    );

    tokio::select! {
        res = scheduler.run() => {
            res?;
            server_task
                .await
                .context("Metrics server task panicked")??;
        }
        // A server exit before shutdown means bind or serve failed; that
        // is fatal, matching startup behavior.
        res = &mut server_task => {
            res.context("Metrics server task panicked")??;
        }
    }

    info!("sqlprobe stopped");
    Ok(())
}

fn setup_logging(args: &Args, config: &Config) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        config.logging.level.into()
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("sqlprobe={}", level).parse().unwrap())
        .add_directive("sqlx=warn".parse().unwrap());

    let use_json = args.json_logs || config.logging.format == LogFormat::Json;

    if use_json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
