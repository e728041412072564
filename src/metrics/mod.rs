//! Gauge registry for probe readings.
//!
//! One `MetricSink` instance lives for the whole process and is shared by
//! reference with every probe task. It is write-only from the pipeline's
//! point of view: each series holds the latest reading and every write is
//! a plain overwrite, so concurrent probe tasks need no coordination
//! beyond the registry's own locking.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

const NAMESPACE: &str = "sqlprobe";

#[derive(Error, Debug)]
pub enum MetricError {
    #[error("Metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("Exposition encoding failed: {0}")]
    Encoding(String),
}

/// Write-only mapping from probe identity to the latest gauge reading
pub struct MetricSink {
    registry: Registry,

    /// `sqlprobe_up{database}` - target liveness, 1 or 0
    up: GaugeVec,

    /// `sqlprobe_probe_value{database, probe, label}` - latest reading;
    /// the label is empty for float-mode probes
    value: GaugeVec,

    /// `sqlprobe_probe_error{database, probe}` - 1 if the last tick failed
    error: GaugeVec,

    /// `sqlprobe_probe_duration_seconds{database, probe}` - last tick wall clock
    duration: GaugeVec,
}

impl MetricSink {
    pub fn new() -> Result<Self, MetricError> {
        let registry = Registry::new();

        let up = GaugeVec::new(
            Opts::new("up", "Database connection status").namespace(NAMESPACE),
            &["database"],
        )?;
        let value = GaugeVec::new(
            Opts::new("probe_value", "Latest value observed by a probe").namespace(NAMESPACE),
            &["database", "probe", "label"],
        )?;
        let error = GaugeVec::new(
            Opts::new("probe_error", "Whether the probe's last tick failed").namespace(NAMESPACE),
            &["database", "probe"],
        )?;
        let duration = GaugeVec::new(
            Opts::new("probe_duration_seconds", "Wall-clock duration of the probe's last tick")
                .namespace(NAMESPACE),
            &["database", "probe"],
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(value.clone()))?;
        registry.register(Box::new(error.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            up,
            value,
            error,
            duration,
        })
    }

    /// Record target liveness. Called unconditionally on every health check.
    pub fn set_up(&self, database: &str, up: bool) {
        self.up
            .with_label_values(&[database])
            .set(if up { 1.0 } else { 0.0 });
    }

    /// Record a probe reading. `label` is set only for label-mode probes.
    pub fn set_value(&self, database: &str, probe: &str, label: Option<&str>, value: f64) {
        self.value
            .with_label_values(&[database, probe, label.unwrap_or("")])
            .set(value);
    }

    /// Record whether the probe's last tick failed.
    pub fn set_error(&self, database: &str, probe: &str, failed: bool) {
        self.error
            .with_label_values(&[database, probe])
            .set(if failed { 1.0 } else { 0.0 });
    }

    /// Record the probe's last tick duration in seconds.
    pub fn set_duration(&self, database: &str, probe: &str, seconds: f64) {
        self.duration.with_label_values(&[database, probe]).set(seconds);
    }

    /// Snapshot every registered series. Used by the exposition encoder
    /// and by tests asserting on gauge state.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Encode every registered series in the text exposition format.
    pub fn render(&self) -> Result<String, MetricError> {
        let encoder = TextEncoder::new();
        // Families with no samples yet are not encodable.
        let families: Vec<_> = self
            .registry
            .gather()
            .into_iter()
            .filter(|mf| !mf.get_metric().is_empty())
            .collect();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| MetricError::Encoding(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricError::Encoding(e.to_string()))
    }
}
