//! Entry point for the Prometheus-to-ClickHouse ETL worker.
//!
//! Runs exactly one extract/transform/load cycle per invocation (spec
//! §4.E, §6.5) — scheduling repeated runs is left to the process
//! supervisor (cron, a Kubernetes CronJob, systemd timers), matching the
//! teacher's own preference for a single-shot binary over an internal
//! scheduler loop.

mod config;
mod error;
mod extractor;
mod ident;
mod json_stream;
mod loader;
mod logging;
mod scheduler;
mod state_store;
mod tempfiles;
mod transformer;

use config::Config;
use error::EtlError;
use extractor::HttpMetricsSource;
use loader::HttpSink;
use scheduler::Scheduler;
use state_store::ClickHouseStateStore;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(msg) => {
            // Logging isn't initialized yet if config loading itself failed.
            eprintln!("configuration error: {msg}");
            return ExitCode::from(EtlError::Config(msg).exit_code() as u8);
        }
    };

    logging::init(&cfg.etl.log_level);

    match run(&cfg) {
        Ok(outcome) => {
            info!(
                window_start = outcome.window_start,
                window_end = outcome.window_end,
                rows = outcome.rows,
                series = outcome.series,
                skipped = outcome.skipped,
                "cycle completed successfully"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, retriable = e.is_retriable(), "cycle did not complete");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cfg: &Config) -> Result<scheduler::CycleOutcome, EtlError> {
    let metrics_source = HttpMetricsSource::new(&cfg.prometheus)?;
    let sink = HttpSink::new(&cfg.clickhouse)?;
    let state_store = ClickHouseStateStore::new(&cfg.clickhouse)?;

    let scheduler = Scheduler::new(cfg, metrics_source, sink, state_store);
    scheduler.run_once()
}
