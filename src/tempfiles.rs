//! Temp-file management (spec §4.F).
//!
//! One cycle touches exactly two scratch files: the raw extracted response
//! and the transformed TSV. Both live under the configured temp directory
//! and are named with a random nonce so concurrent processes (even ones that
//! lost the claim race and are shutting down) never collide.

use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct TempFiles {
    dir: PathBuf,
}

impl TempFiles {
    /// Ensures `dir` exists, creating it (and parents) if missing.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(TempFiles { dir })
    }

    fn nonce() -> String {
        let n: u64 = rand::thread_rng().gen();
        format!("{n:016x}")
    }

    /// Path for this cycle's raw extracted response file. Does not create
    /// the file; callers open it themselves.
    pub fn raw_path(&self) -> PathBuf {
        self.dir.join(format!("prometheus_raw_{}.json", Self::nonce()))
    }

    /// Path for this cycle's transformed TSV file.
    pub fn processed_path(&self) -> PathBuf {
        self.dir.join(format!("etl_processed_{}.tsv", Self::nonce()))
    }

    /// Removes a scratch file, swallowing "already gone" and logging
    /// anything else as a warning. Cleanup never fails the caller's cycle.
    pub fn cleanup(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directory() {
        let base = tempfile::tempdir().unwrap();
        let nested = base.path().join("a").join("b");
        let tf = TempFiles::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_ne!(tf.raw_path(), tf.raw_path());
    }

    #[test]
    fn raw_and_processed_paths_have_expected_affixes() {
        let base = tempfile::tempdir().unwrap();
        let tf = TempFiles::new(base.path()).unwrap();
        let raw = tf.raw_path();
        let processed = tf.processed_path();
        assert!(raw.file_name().unwrap().to_str().unwrap().starts_with("prometheus_raw_"));
        assert!(raw.extension().unwrap() == "json");
        assert!(processed.file_name().unwrap().to_str().unwrap().starts_with("etl_processed_"));
        assert!(processed.extension().unwrap() == "tsv");
    }

    #[test]
    fn cleanup_of_missing_file_does_not_panic() {
        let base = tempfile::tempdir().unwrap();
        let ghost = base.path().join("does_not_exist.json");
        TempFiles::cleanup(&ghost);
    }

    #[test]
    fn cleanup_removes_existing_file() {
        let base = tempfile::tempdir().unwrap();
        let path = base.path().join("etl_processed_x.tsv");
        fs::write(&path, b"data").unwrap();
        TempFiles::cleanup(&path);
        assert!(!path.exists());
    }
}
