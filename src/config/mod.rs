//! Configuration for the sqlprobe exporter.
//!
//! Loaded once at startup from a YAML file with `${VAR}` environment
//! expansion. Targets and probes are immutable after load.
//!
//! Numeric-looking fields (ports, timeouts, pool limits, intervals) are
//! carried as strings in the file and parsed during resolution; a value
//! that does not parse as an integer is a fatal startup error.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Field `{field}` is not a valid integer: {value:?}")]
    InvalidInteger { field: String, value: String },
}

/// Resolved top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host the metrics endpoint listens on
    pub listen_host: String,

    /// Port the metrics endpoint listens on
    pub listen_port: u16,

    /// Process-wide deadline applied to every probe query
    pub query_timeout: Duration,

    pub targets: Vec<TargetConfig>,

    pub logging: LoggingConfig,
}

/// One configured database target and its probes
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,

    /// Idle connections the pool keeps alive
    pub max_idle_conns: u32,

    /// Upper bound on open connections
    pub max_open_conns: u32,

    pub probes: Vec<ProbeConfig>,
}

/// A named SQL statement executed on a schedule
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub name: String,
    pub sql: String,

    /// Time between executions (minute granularity in the file)
    pub interval: Duration,

    pub mode: ProbeMode,
}

/// How a probe's result cells are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Cells are coerced to numeric gauge values
    #[default]
    #[serde(alias = "numeric")]
    Float,

    /// Text cells become a metric label with the gauge fixed at 1
    Label,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

// Raw shapes as they appear in the YAML file, before integer parsing.

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_listen_host")]
    host: String,

    #[serde(default = "default_listen_port")]
    port: String,

    #[serde(default = "default_query_timeout")]
    query_timeout: String,

    #[serde(default)]
    targets: Vec<RawTarget>,

    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    name: String,
    host: String,

    #[serde(default = "default_db_port")]
    port: String,

    user: String,
    password: String,
    database: String,

    #[serde(default = "default_pool_limit")]
    max_idle_conns: String,

    #[serde(default = "default_pool_limit")]
    max_open_conns: String,

    #[serde(default)]
    probes: Vec<RawProbe>,
}

#[derive(Debug, Deserialize)]
struct RawProbe {
    name: String,
    sql: String,

    #[serde(default = "default_interval_mins")]
    interval: String,

    #[serde(default)]
    mode: ProbeMode,
}

// Default value functions
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> String {
    "9101".to_string()
}

fn default_query_timeout() -> String {
    "10".to_string()
}

fn default_db_port() -> String {
    "5432".to_string()
}

fn default_pool_limit() -> String {
    "10".to_string()
}

fn default_interval_mins() -> String {
    "1".to_string()
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let raw: RawConfig = serde_yaml::from_str(&expanded)?;
        raw.resolve()
    }

    /// Validate the resolved configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "Query timeout must be at least 1 second".to_string(),
            ));
        }

        for target in &self.targets {
            if target.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Target name cannot be empty".to_string(),
                ));
            }
            if target.host.is_empty() || target.database.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Target {} must set host and database",
                    target.name
                )));
            }
            for probe in &target.probes {
                if probe.name.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "Target {} has a probe with an empty name",
                        target.name
                    )));
                }
                if probe.sql.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "Probe {}/{} has empty SQL",
                        target.name, probe.name
                    )));
                }
            }
        }

        Ok(())
    }
}

impl RawConfig {
    fn resolve(self) -> Result<Config, ConfigError> {
        let listen_port = parse_int::<u16>("port", &self.port)?;
        let timeout_secs = parse_int::<u64>("query_timeout", &self.query_timeout)?;

        let targets = self
            .targets
            .into_iter()
            .map(RawTarget::resolve)
            .collect::<Result<Vec<_>, _>>()?;

        let config = Config {
            listen_host: self.host,
            listen_port,
            query_timeout: Duration::from_secs(timeout_secs),
            targets,
            logging: self.logging,
        };

        config.validate()?;
        Ok(config)
    }
}

impl RawTarget {
    fn resolve(self) -> Result<TargetConfig, ConfigError> {
        let port = parse_int::<u16>("targets.port", &self.port)?;
        let max_idle_conns = parse_int::<u32>("max_idle_conns", &self.max_idle_conns)?;
        let max_open_conns = parse_int::<u32>("max_open_conns", &self.max_open_conns)?;

        let probes = self
            .probes
            .into_iter()
            .map(RawProbe::resolve)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TargetConfig {
            name: self.name,
            host: self.host,
            port,
            user: self.user,
            password: self.password,
            database: self.database,
            max_idle_conns,
            max_open_conns,
            probes,
        })
    }
}

impl RawProbe {
    fn resolve(self) -> Result<ProbeConfig, ConfigError> {
        let minutes = parse_int::<u64>("probes.interval", &self.interval)?;

        Ok(ProbeConfig {
            name: self.name,
            sql: self.sql,
            interval: Duration::from_secs(minutes.max(1) * 60),
            mode: self.mode,
        })
    }
}

fn parse_int<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidInteger {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Expand environment variables in a string using ${VAR} syntax
fn expand_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
targets:
  - name: orders_db
    host: localhost
    user: scrape
    password: secret
    database: orders
    probes:
      - name: active_count
        sql: SELECT count(*) FROM sessions
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.listen_host, "0.0.0.0");
        assert_eq!(config.listen_port, 9101);
        assert_eq!(config.query_timeout, Duration::from_secs(10));

        let target = &config.targets[0];
        assert_eq!(target.port, 5432);
        assert_eq!(target.max_idle_conns, 10);
        assert_eq!(target.max_open_conns, 10);

        let probe = &target.probes[0];
        assert_eq!(probe.interval, Duration::from_secs(60));
        assert_eq!(probe.mode, ProbeMode::Float);
    }

    #[test]
    fn test_invalid_timeout_is_fatal() {
        let yaml = format!("query_timeout: abc\n{}", MINIMAL);
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidInteger { ref field, .. } if field == "query_timeout")
        );
    }

    #[test]
    fn test_invalid_pool_limit_is_fatal() {
        let yaml = MINIMAL.replace(
            "database: orders",
            "database: orders\n    max_open_conns: many",
        );
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidInteger { ref field, .. } if field == "max_open_conns")
        );
    }

    #[test]
    fn test_pool_limits_bind_independently() {
        let yaml = MINIMAL.replace(
            "database: orders",
            "database: orders\n    max_idle_conns: \"3\"\n    max_open_conns: \"7\"",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.targets[0].max_idle_conns, 3);
        assert_eq!(config.targets[0].max_open_conns, 7);
    }

    #[test]
    fn test_probe_mode_aliases() {
        let yaml = MINIMAL.replace(
            "sql: SELECT count(*) FROM sessions",
            "sql: SELECT count(*) FROM sessions\n        mode: label",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.targets[0].probes[0].mode, ProbeMode::Label);

        let yaml = MINIMAL.replace(
            "sql: SELECT count(*) FROM sessions",
            "sql: SELECT count(*) FROM sessions\n        mode: numeric",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.targets[0].probes[0].mode, ProbeMode::Float);
    }

    #[test]
    fn test_empty_probe_sql_rejected() {
        let yaml = MINIMAL.replace("SELECT count(*) FROM sessions", "\"  \"");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_interval_minutes() {
        let yaml = MINIMAL.replace(
            "sql: SELECT count(*) FROM sessions",
            "sql: SELECT count(*) FROM sessions\n        interval: \"5\"",
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.targets[0].probes[0].interval,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("SQLPROBE_TEST_VAR", "hello");
        let result = expand_env_vars("prefix ${SQLPROBE_TEST_VAR} suffix");
        assert_eq!(result, "prefix hello suffix");
    }
}
