//! Range-query extraction from the upstream time-series API (spec §4.B).

use crate::config::PrometheusConfig;
use crate::error::ExtractError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

const DIAGNOSTIC_BODY_BYTES: usize = 1024;
const STREAM_CHUNK_HINT: usize = 8 * 1024;

pub trait MetricsSource {
    /// Runs a range query and streams the raw JSON response to `out_path`.
    /// On failure, `out_path` is left as-is (possibly partially written) —
    /// the caller owns cleanup.
    fn query_range_to_file(
        &self,
        query: &str,
        start: f64,
        end: f64,
        out_path: &Path,
    ) -> Result<(), ExtractError>;
}

pub struct HttpMetricsSource {
    client: reqwest::blocking::Client,
    base_url: String,
    auth: Option<crate::config::BasicAuth>,
    step_seconds: u32,
}

impl HttpMetricsSource {
    pub fn new(cfg: &PrometheusConfig) -> Result<Self, ExtractError> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(cfg.insecure)
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .map_err(ExtractError::Transport)?;
        Ok(HttpMetricsSource {
            client,
            base_url: cfg.url.clone(),
            auth: cfg.basic_auth(),
            step_seconds: cfg.query_step_seconds,
        })
    }
}

impl MetricsSource for HttpMetricsSource {
    fn query_range_to_file(
        &self,
        query: &str,
        start: f64,
        end: f64,
        out_path: &Path,
    ) -> Result<(), ExtractError> {
        let url = format!("{}/api/v1/query_range", self.base_url.trim_end_matches('/'));
        let mut req = self.client.get(&url).query(&[
            ("query", query.to_string()),
            ("start", format!("{start}")),
            ("end", format!("{end}")),
            ("step", format!("{}", self.step_seconds)),
        ]);
        if let Some(auth) = &self.auth {
            req = req.basic_auth(&auth.user, Some(&auth.password));
        }

        let resp = req.send().map_err(classify_send_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body_prefix: String = resp
                .text()
                .unwrap_or_default()
                .chars()
                .take(DIAGNOSTIC_BODY_BYTES)
                .collect();
            return Err(ExtractError::Http { status: status.as_u16(), body_prefix });
        }

        let file = File::create(out_path).map_err(|source| ExtractError::Io {
            path: out_path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::with_capacity(STREAM_CHUNK_HINT, file);
        let bytes = resp.bytes().map_err(ExtractError::Transport)?;
        writer.write_all(&bytes).map_err(|source| ExtractError::Io {
            path: out_path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|source| ExtractError::Io {
            path: out_path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

fn classify_send_error(e: reqwest::Error) -> ExtractError {
    if e.is_timeout() {
        ExtractError::Timeout(e)
    } else if e.is_connect() {
        ExtractError::Connection(e)
    } else {
        ExtractError::Transport(e)
    }
}
