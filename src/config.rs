//! Environment-driven configuration (spec §6.1, SPEC_FULL §4.G).
//!
//! All settings are environment variables; the CLI surface stays empty per
//! spec §6.5, but `clap`'s `env` feature gives us both validated parsing and
//! `--help`/`--version` for free, matching the teacher's habit of reading
//! connection settings straight out of the process environment.

use crate::ident::validate_identifier;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "prom2ch", about = "Resumable Prometheus-to-ClickHouse ETL worker", version)]
pub struct Config {
    #[command(flatten)]
    pub prometheus: PrometheusConfig,

    #[command(flatten)]
    pub clickhouse: ClickHouseConfig,

    #[command(flatten)]
    pub etl: EtlConfig,
}

#[derive(Debug, Clone, clap::Args)]
pub struct PrometheusConfig {
    /// Base URL of the Prometheus/Mimir-compatible range-query API.
    #[arg(long = "prometheus-url", env = "PROMETHEUS_URL")]
    pub url: String,

    /// PromQL expression evaluated over each window.
    #[arg(long = "prometheus-query", env = "PROMETHEUS_QUERY")]
    pub query: String,

    #[arg(long = "prometheus-user", env = "PROMETHEUS_USER")]
    pub user: Option<String>,

    #[arg(long = "prometheus-password", env = "PROMETHEUS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long = "prometheus-insecure", env = "PROMETHEUS_INSECURE", default_value_t = false)]
    pub insecure: bool,

    #[arg(long = "prometheus-timeout", env = "PROMETHEUS_TIMEOUT", default_value_t = 10)]
    pub timeout_seconds: u64,

    #[arg(long = "query-step-seconds", env = "QUERY_STEP_SECONDS", default_value_t = 15)]
    pub query_step_seconds: u32,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ClickHouseConfig {
    /// Base URL of the ClickHouse HTTP interface.
    #[arg(long = "clickhouse-url", env = "CLICKHOUSE_URL")]
    pub url: String,

    #[arg(long = "clickhouse-user", env = "CLICKHOUSE_USER")]
    pub user: Option<String>,

    #[arg(long = "clickhouse-password", env = "CLICKHOUSE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long = "clickhouse-insecure", env = "CLICKHOUSE_INSECURE", default_value_t = false)]
    pub insecure: bool,

    #[arg(long = "clickhouse-connect-timeout", env = "CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout_seconds: u64,

    #[arg(long = "clickhouse-send-receive-timeout", env = "SEND_RECEIVE_TIMEOUT", default_value_t = 300)]
    pub send_receive_timeout_seconds: u64,

    #[arg(long = "table-metrics", env = "TABLE_METRICS", default_value = "default.metrics")]
    pub table_metrics: String,

    #[arg(long = "table-etl", env = "TABLE_ETL", default_value = "default.etl")]
    pub table_etl: String,
}

#[derive(Debug, Clone, clap::Args)]
pub struct EtlConfig {
    #[arg(long = "batch-window-size-seconds", env = "BATCH_WINDOW_SIZE_SECONDS", default_value_t = 300)]
    pub batch_window_size_seconds: i64,

    #[arg(long = "batch-window-overlap-seconds", env = "BATCH_WINDOW_OVERLAP_SECONDS", default_value_t = 0)]
    pub batch_window_overlap_seconds: i64,

    #[arg(long = "min-window-start-timestamp", env = "MIN_WINDOW_START_TIMESTAMP", default_value_t = 0)]
    pub min_window_start_timestamp: i64,

    #[arg(long = "temp-dir", env = "TEMP_DIR", default_value = "/tmp")]
    pub temp_dir: String,

    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,
}

/// Basic-auth credentials, normalized per spec §6.1: if `user` is set but
/// `password` is empty/unset, the password is treated as `""` rather than
/// omitting the `Authorization` header entirely.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

impl PrometheusConfig {
    pub fn basic_auth(&self) -> Option<BasicAuth> {
        self.user.clone().map(|user| BasicAuth {
            user,
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

impl ClickHouseConfig {
    pub fn basic_auth(&self) -> Option<BasicAuth> {
        self.user.clone().map(|user| BasicAuth {
            user,
            password: self.password.clone().unwrap_or_default(),
        })
    }
}

impl Config {
    /// Loads configuration from `std::env` (via clap) and validates the
    /// invariants that arithmetic and identifier interpolation depend on.
    /// Fails before any network I/O is attempted (spec §8 scenario 6).
    pub fn load() -> Result<Self, String> {
        let cfg = Config::parse();
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), String> {
        if self.etl.batch_window_size_seconds <= 0 {
            return Err("BATCH_WINDOW_SIZE_SECONDS must be > 0".to_string());
        }
        if self.etl.batch_window_overlap_seconds < 0 {
            return Err("BATCH_WINDOW_OVERLAP_SECONDS must be >= 0".to_string());
        }
        validate_identifier(&self.clickhouse.table_metrics, "TABLE_METRICS")
            .map_err(|e| e.to_string())?;
        validate_identifier(&self.clickhouse.table_etl, "TABLE_ETL").map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            prometheus: PrometheusConfig {
                url: "http://localhost:9090".into(),
                query: "up".into(),
                user: None,
                password: None,
                insecure: false,
                timeout_seconds: 10,
                query_step_seconds: 15,
            },
            clickhouse: ClickHouseConfig {
                url: "http://localhost:8123".into(),
                user: None,
                password: None,
                insecure: false,
                connect_timeout_seconds: 10,
                send_receive_timeout_seconds: 300,
                table_metrics: "default.metrics".into(),
                table_etl: "default.etl".into(),
            },
            etl: EtlConfig {
                batch_window_size_seconds: 300,
                batch_window_overlap_seconds: 0,
                min_window_start_timestamp: 0,
                temp_dir: "/tmp".into(),
                log_level: "INFO".into(),
            },
        }
    }

    #[test]
    fn password_normalization_sends_empty_string_not_none() {
        let mut cfg = base_config();
        cfg.clickhouse.user = Some("alice".into());
        cfg.clickhouse.password = None;
        let auth = cfg.clickhouse.basic_auth().unwrap();
        assert_eq!(auth.user, "alice");
        assert_eq!(auth.password, "");
    }

    #[test]
    fn no_user_means_no_auth() {
        let cfg = base_config();
        assert!(cfg.clickhouse.basic_auth().is_none());
    }

    #[test]
    fn rejects_non_positive_window_size() {
        let mut cfg = base_config();
        cfg.etl.batch_window_size_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_injected_table_identifier() {
        let mut cfg = base_config();
        cfg.clickhouse.table_metrics = "default.metrics; DROP TABLE x".into();
        assert!(cfg.validate().is_err());
    }
}
