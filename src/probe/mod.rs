//! Probe execution pipeline.
//!
//! A `Target` owns the live connection handle for one configured database.
//! The handle's lifecycle is independent of the target's own: it may be
//! found dead and reopened many times over the process lifetime, which is
//! the job of `ensure_ready`. `run` drives one tick of one probe through
//! the full pipeline: health check, deadline-bounded query, per-cell
//! coercion, gauge emission.
//!
//! Every error here is non-fatal and scoped to a single tick; the durable
//! signal is the gauge state (up=0, error=1, stale value) plus a log entry.

use crate::coerce::{self, Coerced};
use crate::config::{ProbeConfig, TargetConfig};
use crate::metrics::MetricSink;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Connection, Row};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Errors scoped to one tick of one probe
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Connection check failed: {0}")]
    Connect(String),

    #[error("Query timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Cell value is not numeric{}", .raw.as_deref().map(|r| format!(": {:?}", r)).unwrap_or_default())]
    NotNumeric { raw: Option<String> },
}

/// A configured database plus its live connection handle
pub struct Target {
    config: TargetConfig,
    pool: RwLock<PgPool>,
}

impl Target {
    /// Build a target from its configuration. The pool is opened lazily,
    /// so an unreachable database is not an error here.
    pub fn new(config: TargetConfig) -> Self {
        let pool = open_pool(&config);
        Self {
            config,
            pool: RwLock::new(pool),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn probes(&self) -> &[ProbeConfig] {
        &self.config.probes
    }

    /// Liveness check, reopening the handle when it reports closed.
    ///
    /// A closed handle is the one reconnect-recoverable failure: a fresh
    /// pool is opened from the descriptor with the target's own pool
    /// limits re-applied, then probed once more. Any other failure
    /// surfaces without touching the handle. The up gauge is set on every
    /// call, Ready or not.
    pub async fn ensure_ready(&self, sink: &MetricSink) -> Result<(), ProbeError> {
        let mut result = self.ping().await;

        if let Err(err) = &result {
            if matches!(err, sqlx::Error::PoolClosed) {
                info!(database = %self.config.name, "Reconnecting closed database handle");
                let fresh = open_pool(&self.config);
                *self.pool.write().await = fresh;
                result = self.ping().await;
            }
        }

        match result {
            Ok(()) => {
                sink.set_up(&self.config.name, true);
                Ok(())
            }
            Err(err) => {
                sink.set_up(&self.config.name, false);
                Err(ProbeError::Connect(err.to_string()))
            }
        }
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        let pool = self.pool.read().await.clone();
        let mut conn = pool.acquire().await?;
        conn.ping().await
    }

    async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    /// Close the current handle. The next `ensure_ready` reopens it.
    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

fn open_pool(config: &TargetConfig) -> PgPool {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database);

    // Each configured limit binds to its own pool option.
    PgPoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.max_idle_conns.min(config.max_open_conns))
        .connect_lazy_with(options)
}

/// Execute one tick of one probe. Side effects only: gauge updates and
/// log entries. The duration gauge is recorded on every exit path.
pub async fn run(target: &Target, probe: &ProbeConfig, sink: &MetricSink, timeout: Duration) {
    let start = Instant::now();

    match target.ensure_ready(sink).await {
        Ok(()) => match execute(target, probe, sink, timeout).await {
            Ok(cells) => {
                debug!(
                    database = %target.name(),
                    probe = %probe.name,
                    cells,
                    "Probe tick completed"
                );
            }
            Err(err) => {
                warn!(
                    database = %target.name(),
                    probe = %probe.name,
                    error = %err,
                    "Probe tick failed"
                );
                sink.set_error(target.name(), &probe.name, true);
            }
        },
        // Unready: skip the query this tick, up gauge already set.
        Err(err) => {
            warn!(
                database = %target.name(),
                probe = %probe.name,
                error = %err,
                "Target not ready, skipping probe"
            );
        }
    }

    sink.set_duration(target.name(), &probe.name, start.elapsed().as_secs_f64());
}

/// Run the probe's SQL under the process-wide deadline and emit one gauge
/// write per successfully coerced cell. Fail-fast: the first cell that
/// cannot be coerced invalidates the whole tick's reading.
async fn execute(
    target: &Target,
    probe: &ProbeConfig,
    sink: &MetricSink,
    timeout: Duration,
) -> Result<usize, ProbeError> {
    let pool = target.pool().await;

    let rows = tokio::time::timeout(timeout, sqlx::query(&probe.sql).fetch_all(&pool))
        .await
        .map_err(|_| ProbeError::TimedOut(timeout))?
        .map_err(|e| ProbeError::Query(e.to_string()))?;

    let mut cells = 0;
    for row in &rows {
        for index in 0..row.len() {
            let cell = coerce::read_cell(row, index);
            match coerce::coerce(&cell, probe.mode) {
                Coerced::Number(value) => {
                    sink.set_value(target.name(), &probe.name, None, value);
                    sink.set_error(target.name(), &probe.name, false);
                }
                Coerced::Labeled { label, value } => {
                    sink.set_value(target.name(), &probe.name, Some(&label), value);
                    sink.set_error(target.name(), &probe.name, false);
                }
                Coerced::NotNumeric { raw } => {
                    return Err(ProbeError::NotNumeric { raw });
                }
            }
            cells += 1;
        }
    }

    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeMode;

    fn unreachable_target() -> Target {
        Target::new(TargetConfig {
            name: "orders_db".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "scrape".to_string(),
            password: "secret".to_string(),
            database: "orders".to_string(),
            max_idle_conns: 1,
            max_open_conns: 2,
            probes: vec![ProbeConfig {
                name: "active_count".to_string(),
                sql: "SELECT 42".to_string(),
                interval: Duration::from_secs(60),
                mode: ProbeMode::Float,
            }],
        })
    }

    #[tokio::test]
    async fn test_unready_target_sets_up_zero_and_records_duration() {
        let target = unreachable_target();
        let sink = MetricSink::new().unwrap();
        let probe = target.probes()[0].clone();

        run(&target, &probe, &sink, Duration::from_secs(1)).await;

        let body = sink.render().unwrap();
        assert!(body.contains(r#"sqlprobe_up{database="orders_db"} 0"#));
        assert!(body.contains("sqlprobe_probe_duration_seconds"));
        // The query never ran, so no value series exists.
        assert!(!body.contains("sqlprobe_probe_value"));
    }

    #[tokio::test]
    async fn test_unready_is_connect_error() {
        let target = unreachable_target();
        let sink = MetricSink::new().unwrap();

        let err = target.ensure_ready(&sink).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)));
    }

    #[test]
    fn test_error_display() {
        let err = ProbeError::NotNumeric {
            raw: Some("abc".to_string()),
        };
        assert!(err.to_string().contains("abc"));

        let err = ProbeError::NotNumeric { raw: None };
        assert!(err.to_string().contains("not numeric"));

        let err = ProbeError::TimedOut(Duration::from_secs(10));
        assert!(err.to_string().contains("timed out"));
    }
}
