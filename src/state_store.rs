//! ClickHouse-backed progress tracking and distributed single-writer lock
//! (spec §4.A).
//!
//! The same append-only table serves two purposes: a `ReplacingMergeTree`
//! history of completed windows, and a lock. The claim row for a cycle
//! (`timestamp_start` set, `timestamp_end` null) is never deleted; a cycle
//! completes by appending a second, later-versioned row for the same
//! dedup key with `timestamp_end` set, and relies on `FINAL` to collapse
//! the two into the cycle's current state. So both `getState` and
//! `hasRunningJob` must read the table `FINAL` — reading the raw unmerged
//! rowset would see the original claim row forever and report a finished
//! cycle as still running. The one read that must stay unmerged is the
//! claim-verification step inside `tryMarkStart`: immediately after two
//! concurrent writers each append a claim row, neither has had a chance to
//! merge yet, and `FINAL` could not be trusted to show both. Swapping which
//! read uses `FINAL` reopens the race this table exists to close.

use crate::config::{BasicAuth, ClickHouseConfig};
use crate::error::StateStoreError;
use crate::ident::validate_identifier;
use crate::transformer::{escape_tsv_field, format_float};
use std::time::Duration;

/// One row of the ETL state table (spec §3.2). All fields are optional
/// because the very first run finds no rows at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateRecord {
    pub timestamp_progress: Option<f64>,
    pub timestamp_start: Option<f64>,
    pub timestamp_end: Option<f64>,
    pub batch_window_seconds: Option<u64>,
    pub batch_skipped_count: Option<u64>,
    pub batch_rows: Option<u64>,
}

pub trait StateStore {
    /// Latest merged state, or `None` if the table is empty.
    fn get_state(&self) -> Result<Option<StateRecord>, StateStoreError>;

    /// Whether a row with `timestamp_end IS NULL` is visible in the
    /// `FINAL`-merged view — i.e. whether a cycle claim is outstanding.
    fn has_running_job(&self) -> Result<bool, StateStoreError>;

    /// Appends a claim row (`timestamp_start` set, `timestamp_end` null)
    /// then re-reads the unmerged view to verify no concurrent writer also
    /// appended a claim. Returns `true` if this process won the race.
    fn try_mark_start(&self, timestamp_start: f64) -> Result<bool, StateStoreError>;

    /// Appends the completed-window row.
    fn save_state(&self, record: &StateRecord) -> Result<(), StateStoreError>;
}

pub struct ClickHouseStateStore {
    client: reqwest::blocking::Client,
    base_url: String,
    auth: Option<BasicAuth>,
    table: String,
}

impl ClickHouseStateStore {
    pub fn new(cfg: &ClickHouseConfig) -> Result<Self, StateStoreError> {
        validate_identifier(&cfg.table_etl, "TABLE_ETL")?;
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(cfg.insecure)
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
            .timeout(Duration::from_secs(cfg.send_receive_timeout_seconds))
            .build()
            .map_err(StateStoreError::Transport)?;
        Ok(ClickHouseStateStore {
            client,
            base_url: cfg.url.clone(),
            auth: cfg.basic_auth(),
            table: cfg.table_etl.clone(),
        })
    }

    fn execute(&self, query: &str) -> Result<String, StateStoreError> {
        let mut req = self.client.post(&self.base_url).body(query.to_string());
        if let Some(auth) = &self.auth {
            req = req.basic_auth(&auth.user, Some(&auth.password));
        }
        let resp = req.send().map_err(StateStoreError::Transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body_prefix: String = resp
                .text()
                .unwrap_or_default()
                .chars()
                .take(1024)
                .collect();
            return Err(StateStoreError::Http { status: status.as_u16(), body_prefix });
        }
        resp.text().map_err(StateStoreError::Transport)
    }

    fn select_state(&self, final_view: bool) -> Result<Option<StateRecord>, StateStoreError> {
        validate_identifier(&self.table, "TABLE_ETL")?;
        let final_clause = if final_view { " FINAL" } else { "" };
        let query = format!(
            "SELECT timestamp_progress, timestamp_start, timestamp_end, batch_window_seconds, \
             batch_skipped_count, batch_rows FROM {}{} ORDER BY timestamp_progress DESC NULLS LAST, \
             timestamp_start DESC NULLS LAST, timestamp_end DESC NULLS LAST LIMIT 1 \
             FORMAT TabSeparated",
            self.table, final_clause
        );
        let body = self.execute(&query)?;
        let line = body.lines().next();
        match line {
            None | Some("") => Ok(None),
            Some(line) => Ok(Some(parse_state_line(line)?)),
        }
    }

    /// Counts rows with `timestamp_end IS NULL`, optionally over the
    /// `FINAL`-merged view.
    fn count_running(&self, final_view: bool) -> Result<u64, StateStoreError> {
        validate_identifier(&self.table, "TABLE_ETL")?;
        let final_clause = if final_view { " FINAL" } else { "" };
        let query = format!(
            "SELECT count() FROM {}{} WHERE timestamp_end IS NULL FORMAT TabSeparated",
            self.table, final_clause
        );
        let body = self.execute(&query)?;
        body.trim().parse().map_err(|_| StateStoreError::Parse {
            detail: format!("non-numeric running-job count: {body:?}"),
        })
    }
}

fn parse_field(raw: &str) -> Option<f64> {
    if raw == "\\N" || raw.is_empty() {
        None
    } else {
        raw.parse().ok()
    }
}

fn parse_state_line(line: &str) -> Result<StateRecord, StateStoreError> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() != 6 {
        return Err(StateStoreError::Parse {
            detail: format!("expected 6 columns, got {}: {line:?}", cols.len()),
        });
    }
    Ok(StateRecord {
        timestamp_progress: parse_field(cols[0]),
        timestamp_start: parse_field(cols[1]),
        timestamp_end: parse_field(cols[2]),
        batch_window_seconds: parse_field(cols[3]).map(|v| v as u64),
        batch_skipped_count: parse_field(cols[4]).map(|v| v as u64),
        batch_rows: parse_field(cols[5]).map(|v| v as u64),
    })
}

fn nullable_float(v: Option<f64>) -> String {
    match v {
        Some(v) => format_float(v),
        None => "\\N".to_string(),
    }
}

fn nullable_int(v: Option<u64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "\\N".to_string(),
    }
}

impl StateStore for ClickHouseStateStore {
    fn get_state(&self) -> Result<Option<StateRecord>, StateStoreError> {
        self.select_state(true)
    }

    fn has_running_job(&self) -> Result<bool, StateStoreError> {
        Ok(self.count_running(true)? > 0)
    }

    fn try_mark_start(&self, timestamp_start: f64) -> Result<bool, StateStoreError> {
        validate_identifier(&self.table, "TABLE_ETL")?;
        let insert = format!(
            "INSERT INTO {} (timestamp_start) VALUES ({}) FORMAT TabSeparated",
            self.table,
            escape_tsv_field(&format_float(timestamp_start))
        );
        self.execute(&insert)?;
        // Verify against the unmerged view: the merge that would collapse
        // two concurrent claim rows hasn't necessarily run yet, so only the
        // raw rowset can be trusted to reveal a competing claim here.
        let query = format!(
            "SELECT count() FROM {} WHERE timestamp_end IS NULL AND timestamp_start = {} \
             FORMAT TabSeparated",
            self.table,
            format_float(timestamp_start)
        );
        let body = self.execute(&query)?;
        let count: u64 = body.trim().parse().map_err(|_| StateStoreError::Parse {
            detail: format!("non-numeric claim-verification count: {body:?}"),
        })?;
        // But "is any other cycle already running" must read the merged
        // view, or a prior cycle's claim row (never deleted, only
        // superseded by a later-versioned completion row) would look like
        // an outstanding claim forever.
        let total_running = self.count_running(true)?;
        Ok(count > 0 && total_running == 1)
    }

    fn save_state(&self, record: &StateRecord) -> Result<(), StateStoreError> {
        validate_identifier(&self.table, "TABLE_ETL")?;
        let insert = format!(
            "INSERT INTO {} (timestamp_progress, timestamp_start, timestamp_end, batch_window_seconds, \
             batch_skipped_count, batch_rows) VALUES ({}, {}, {}, {}, {}, {}) FORMAT TabSeparated",
            self.table,
            nullable_float(record.timestamp_progress),
            nullable_float(record.timestamp_start),
            nullable_float(record.timestamp_end),
            nullable_int(record.batch_window_seconds),
            nullable_int(record.batch_skipped_count),
            nullable_int(record.batch_rows),
        );
        self.execute(&insert)?;
        Ok(())
    }
}
