//! The coordinator that runs one extract → transform → load cycle
//! (spec §4.E).
//!
//! Generic over the three seam traits so a full cycle can be exercised with
//! in-memory fakes and no network in reach: `MetricsSource`, `Sink`,
//! `StateStore`. State moves `Idle -> Claimed -> Extracting -> Transforming
//! -> Loading -> Finalizing -> Idle`; every exit path, success or failure,
//! removes the cycle's scratch files.

use crate::config::Config;
use crate::error::EtlError;
use crate::extractor::MetricsSource;
use crate::loader::Sink;
use crate::state_store::{StateRecord, StateStore};
use crate::tempfiles::TempFiles;
use crate::transformer::stream_transform;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, info_span};

/// Abstracts "now", so tests can drive the window-math edge cases (overlap,
/// min-start clamp, end-of-history) without depending on wall-clock time.
pub trait Clock {
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs_f64()
    }
}

/// Result of one completed cycle, surfaced to the caller for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub window_start: f64,
    pub window_end: f64,
    pub rows: u64,
    pub series: u64,
    pub skipped: u64,
}

pub struct Scheduler<M, S, T, C = SystemClock> {
    metrics_source: M,
    sink: S,
    state_store: T,
    clock: C,
    table_metrics: String,
    query: String,
    temp_dir: String,
    batch_window_size_seconds: i64,
    batch_window_overlap_seconds: i64,
    min_window_start_timestamp: i64,
}

impl<M: MetricsSource, S: Sink, T: StateStore> Scheduler<M, S, T, SystemClock> {
    pub fn new(cfg: &Config, metrics_source: M, sink: S, state_store: T) -> Self {
        Scheduler {
            metrics_source,
            sink,
            state_store,
            clock: SystemClock,
            table_metrics: cfg.clickhouse.table_metrics.clone(),
            query: cfg.prometheus.query.clone(),
            temp_dir: cfg.etl.temp_dir.clone(),
            batch_window_size_seconds: cfg.etl.batch_window_size_seconds,
            batch_window_overlap_seconds: cfg.etl.batch_window_overlap_seconds,
            min_window_start_timestamp: cfg.etl.min_window_start_timestamp,
        }
    }
}

impl<M: MetricsSource, S: Sink, T: StateStore, C: Clock> Scheduler<M, S, T, C> {
    #[cfg(test)]
    pub fn with_clock(cfg: &Config, metrics_source: M, sink: S, state_store: T, clock: C) -> Self {
        Scheduler {
            metrics_source,
            sink,
            state_store,
            clock,
            table_metrics: cfg.clickhouse.table_metrics.clone(),
            query: cfg.prometheus.query.clone(),
            temp_dir: cfg.etl.temp_dir.clone(),
            batch_window_size_seconds: cfg.etl.batch_window_size_seconds,
            batch_window_overlap_seconds: cfg.etl.batch_window_overlap_seconds,
            min_window_start_timestamp: cfg.etl.min_window_start_timestamp,
        }
    }

    pub fn run_once(&self) -> Result<CycleOutcome, EtlError> {
        let span = info_span!("etl_cycle");
        let _guard = span.enter();

        if self.state_store.has_running_job()? {
            return Err(EtlError::ConcurrentRunBlocked);
        }

        let claim_ts = self.clock.now();
        if !self.state_store.try_mark_start(claim_ts)? {
            return Err(EtlError::ClaimFailed);
        }
        info!(claim_ts, "claimed cycle");

        let outcome = self.run_claimed_cycle(claim_ts);

        match &outcome {
            Ok(o) => info!(rows = o.rows, series = o.series, skipped = o.skipped, "cycle finished"),
            Err(e) => tracing::error!(error = %e, "cycle failed"),
        }
        outcome
    }

    fn run_claimed_cycle(&self, claim_ts: f64) -> Result<CycleOutcome, EtlError> {
        let state = self.state_store.get_state()?;
        let progress_in = state
            .as_ref()
            .and_then(|s| s.timestamp_progress)
            .ok_or(EtlError::ProgressMissing)?;

        let (window_start, window_end, progress_out, actual_window) = self.compute_window(progress_in);

        let temp_files = TempFiles::new(&self.temp_dir).map_err(|source| {
            EtlError::Config(format!("failed to prepare temp dir {}: {source}", self.temp_dir))
        })?;
        let raw_path = temp_files.raw_path();
        let processed_path = temp_files.processed_path();

        let cycle_result = (|| -> Result<CycleOutcome, EtlError> {
            {
                let _s = info_span!("extract").entered();
                self.metrics_source
                    .query_range_to_file(&self.query, window_start, window_end, &raw_path)?;
            }

            let stats = {
                let _s = info_span!("transform").entered();
                stream_transform(&raw_path, &processed_path)?
            };

            {
                let _s = info_span!("load").entered();
                self.sink.insert_from_file(&self.table_metrics, &processed_path)?;
            }

            {
                let _s = info_span!("finalize").entered();
                // timestamp_end must strictly exceed timestamp_start so the
                // "completed" predicate (timestamp_end IS NOT NULL) can never
                // alias a cycle that took zero wall-clock time with one still
                // in flight.
                let timestamp_end = self.clock.now().max(claim_ts + 1.0);
                let record = StateRecord {
                    timestamp_progress: Some(progress_out),
                    timestamp_start: Some(claim_ts),
                    timestamp_end: Some(timestamp_end),
                    batch_window_seconds: Some(actual_window.max(0.0) as u64),
                    batch_skipped_count: Some(stats.skipped),
                    batch_rows: Some(stats.rows),
                };
                self.state_store.save_state(&record)?;
            }

            Ok(CycleOutcome {
                window_start,
                window_end,
                rows: stats.rows,
                series: stats.series,
                skipped: stats.skipped,
            })
        })();

        TempFiles::cleanup(&raw_path);
        TempFiles::cleanup(&processed_path);

        cycle_result
    }

    /// Returns `(window_start, window_end, progress_out, actual_window)`.
    ///
    /// `actual_window` is left unclamped here; the persisted
    /// `batch_window_seconds` column (unsigned) clamps it to zero at the
    /// write site instead, so `progress_out` always reflects the true
    /// elapsed span even in the degenerate case where `now <= window_start`.
    fn compute_window(&self, progress_in: f64) -> (f64, f64, f64, f64) {
        let min_allowed = self.min_window_start_timestamp as f64;
        let window_start = (progress_in - self.batch_window_overlap_seconds as f64).max(min_allowed);
        let window_end = window_start + self.batch_window_size_seconds as f64;
        let now = self.clock.now();
        let progress_out = window_end.min(now);
        let actual_window = progress_out - window_start;
        (window_start, window_end, progress_out, actual_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractError, LoadError, StateStoreError};
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    struct FixedClock(f64);
    impl Clock for FixedClock {
        fn now(&self) -> f64 {
            self.0
        }
    }

    struct FakeSource;
    impl MetricsSource for FakeSource {
        fn query_range_to_file(&self, _q: &str, _s: f64, _e: f64, out: &Path) -> Result<(), ExtractError> {
            std::fs::write(
                out,
                r#"{"data":{"result":[{"metric":{"__name__":"up"},"values":[[1,"1"]]}]}}"#,
            )
            .map_err(|source| ExtractError::Io { path: out.to_path_buf(), source })
        }
    }

    struct FakeSink {
        inserted: RefCell<Vec<PathBuf>>,
    }
    impl Sink for FakeSink {
        fn insert_from_file(&self, _table: &str, in_path: &Path) -> Result<(), LoadError> {
            self.inserted.borrow_mut().push(in_path.to_path_buf());
            Ok(())
        }
    }

    struct FakeStateStore {
        running: bool,
        progress: Option<f64>,
        saved: RefCell<Vec<StateRecord>>,
    }
    impl StateStore for FakeStateStore {
        fn get_state(&self) -> Result<Option<StateRecord>, StateStoreError> {
            Ok(self.progress.map(|p| StateRecord { timestamp_progress: Some(p), ..Default::default() }))
        }
        fn has_running_job(&self) -> Result<bool, StateStoreError> {
            Ok(self.running)
        }
        fn try_mark_start(&self, _ts: f64) -> Result<bool, StateStoreError> {
            Ok(!self.running)
        }
        fn save_state(&self, record: &StateRecord) -> Result<(), StateStoreError> {
            self.saved.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    fn base_cfg() -> Config {
        use crate::config::{ClickHouseConfig, EtlConfig, PrometheusConfig};
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
                temp_dir: std::env::temp_dir().to_string_lossy().into_owned(),
                log_level: "info".into(),
            },
        }
    }

    #[test]
    fn blocks_when_a_job_is_already_running() {
        let cfg = base_cfg();
        let store = FakeStateStore { running: true, progress: None, saved: Default::default() };
        let sched = Scheduler::with_clock(&cfg, FakeSource, FakeSink { inserted: Default::default() }, store, FixedClock(1700000300.0));
        let err = sched.run_once().unwrap_err();
        assert!(matches!(err, EtlError::ConcurrentRunBlocked));
    }

    #[test]
    fn missing_progress_is_reported_distinctly() {
        let cfg = base_cfg();
        let store = FakeStateStore { running: false, progress: None, saved: Default::default() };
        let sched = Scheduler::with_clock(&cfg, FakeSource, FakeSink { inserted: Default::default() }, store, FixedClock(1700000300.0));
        let err = sched.run_once().unwrap_err();
        assert!(matches!(err, EtlError::ProgressMissing));
    }

    #[test]
    fn happy_path_advances_progress_and_saves_state() {
        let cfg = base_cfg();
        let store = FakeStateStore { running: false, progress: Some(1700000000.0), saved: Default::default() };
        let sched = Scheduler::with_clock(&cfg, FakeSource, FakeSink { inserted: Default::default() }, store, FixedClock(1700000900.0));
        let outcome = sched.run_once().unwrap();
        assert_eq!(outcome.window_start, 1700000000.0);
        assert_eq!(outcome.window_end, 1700000300.0);
        assert_eq!(outcome.rows, 1);
    }

    #[test]
    fn window_end_is_clamped_to_now_near_head_of_history() {
        let cfg = base_cfg();
        let store = FakeStateStore { running: false, progress: Some(1700000000.0), saved: Default::default() };
        // now is only 100s after progress, well short of the 300s window.
        let sched = Scheduler::with_clock(&cfg, FakeSource, FakeSink { inserted: Default::default() }, store, FixedClock(1700000100.0));
        let (window_start, window_end, progress_out, actual_window) = sched.compute_window(1700000000.0);
        assert_eq!(window_start, 1700000000.0);
        assert_eq!(window_end, 1700000300.0);
        assert_eq!(progress_out, 1700000100.0);
        assert_eq!(actual_window, 100.0);
    }

    #[test]
    fn min_window_start_timestamp_clamps_overlap_underflow() {
        let mut cfg = base_cfg();
        cfg.etl.batch_window_overlap_seconds = 1000;
        cfg.etl.min_window_start_timestamp = 500;
        let store = FakeStateStore { running: false, progress: Some(600.0), saved: Default::default() };
        let sched = Scheduler::with_clock(&cfg, FakeSource, FakeSink { inserted: Default::default() }, store, FixedClock(10_000.0));
        let (window_start, _, _, _) = sched.compute_window(600.0);
        assert_eq!(window_start, 500.0);
    }
}
