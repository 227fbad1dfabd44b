//! Bulk-loading the transformed TSV into the destination store (spec §4.D).

use crate::config::ClickHouseConfig;
use crate::error::LoadError;
use crate::ident::validate_identifier;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub trait Sink {
    /// Streams `in_path` into `table` as a bulk insert. A missing file is an
    /// error; a zero-byte file is a no-op (nothing to load this cycle).
    fn insert_from_file(&self, table: &str, in_path: &Path) -> Result<(), LoadError>;
}

pub struct HttpSink {
    client: reqwest::blocking::Client,
    base_url: String,
    auth: Option<crate::config::BasicAuth>,
}

impl HttpSink {
    pub fn new(cfg: &ClickHouseConfig) -> Result<Self, LoadError> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(cfg.insecure)
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
            .timeout(Duration::from_secs(cfg.send_receive_timeout_seconds))
            .build()
            .map_err(LoadError::Transport)?;
        Ok(HttpSink { client, base_url: cfg.url.clone(), auth: cfg.basic_auth() })
    }
}

impl Sink for HttpSink {
    fn insert_from_file(&self, table: &str, in_path: &Path) -> Result<(), LoadError> {
        validate_identifier(table, "TABLE_METRICS")?;

        let metadata = std::fs::metadata(in_path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LoadError::MissingFile { path: in_path.to_path_buf() }
            } else {
                LoadError::Io { path: in_path.to_path_buf(), source }
            }
        })?;
        if metadata.len() == 0 {
            return Ok(());
        }

        let mut file = File::open(in_path).map_err(|source| LoadError::Io {
            path: in_path.to_path_buf(),
            source,
        })?;
        let mut body = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut body).map_err(|source| LoadError::Io {
            path: in_path.to_path_buf(),
            source,
        })?;

        let url = format!("{}/", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .query(&[("query", format!("INSERT INTO {table} FORMAT TabSeparated"))])
            .body(body);
        if let Some(auth) = &self.auth {
            req = req.basic_auth(&auth.user, Some(&auth.password));
        }

        let resp = req.send().map_err(classify_send_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body_prefix: String = resp.text().unwrap_or_default().chars().take(1024).collect();
            return Err(LoadError::Http { status: status.as_u16(), body_prefix });
        }
        Ok(())
    }
}

fn classify_send_error(e: reqwest::Error) -> LoadError {
    if e.is_timeout() {
        LoadError::Timeout(e)
    } else if e.is_connect() {
        LoadError::Connection(e)
    } else {
        LoadError::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSink {
        calls: std::cell::RefCell<Vec<(String, u64)>>,
    }

    impl Sink for FakeSink {
        fn insert_from_file(&self, table: &str, in_path: &Path) -> Result<(), LoadError> {
            validate_identifier(table, "TABLE_METRICS")?;
            let len = std::fs::metadata(in_path)
                .map_err(|source| LoadError::Io { path: in_path.to_path_buf(), source })?
                .len();
            self.calls.borrow_mut().push((table.to_string(), len));
            Ok(())
        }
    }

    #[test]
    fn rejects_invalid_table_identifier() {
        let sink = FakeSink { calls: Default::default() };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.tsv");
        std::fs::write(&path, "a\n").unwrap();
        let result = sink.insert_from_file("bad; table", &path);
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("missing.tsv");
        let result: Result<(), LoadError> = (|| {
            validate_identifier("default.metrics", "TABLE_METRICS")?;
            std::fs::metadata(&ghost).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    LoadError::MissingFile { path: ghost.clone() }
                } else {
                    LoadError::Io { path: ghost.clone(), source }
                }
            })?;
            Ok(())
        })();
        assert!(matches!(result, Err(LoadError::MissingFile { .. })));
    }
}
