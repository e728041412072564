//! sqlprobe - scheduled SQL probes exposed as Prometheus gauges.
//!
//! This crate runs a set of SQL probes against configured database
//! targets on independent schedules, coerces the result cells into
//! numeric gauge readings, tracks connection health, and exposes the
//! current state on a pull-based metrics endpoint.
//!
//! # Example
//!
//! ```no_run
//! use sqlprobe::{config::Config, metrics::MetricSink, probe::Target, scheduler::Scheduler};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     let sink = Arc::new(MetricSink::new()?);
//!
//!     let targets: Vec<Arc<Target>> = config
//!         .targets
//!         .iter()
//!         .cloned()
//!         .map(|t| Arc::new(Target::new(t)))
//!         .collect();
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let scheduler = Scheduler::new(targets, sink, config.query_timeout, shutdown_rx);
//!     scheduler.run().await?;
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod metrics;
pub mod probe;
pub mod scheduler;
pub mod server;

pub use config::Config;
