//! Component error kinds (spec §7) and the top-level error used by `main`.

use crate::ident::InvalidIdentifier;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the Extractor (spec §4.B).
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("timed out querying upstream range API")]
    Timeout(#[source] reqwest::Error),

    #[error("failed to connect to upstream range API")]
    Connection(#[source] reqwest::Error),

    #[error("upstream range API returned HTTP {status}: {body_prefix}")]
    Http { status: u16, body_prefix: String },

    #[error("transport error querying upstream range API")]
    Transport(#[source] reqwest::Error),

    #[error("failed to write extracted response to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the Transformer (spec §4.C).
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to read extracted file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write transformed file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in extracted response at {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },
}

/// Errors raised by the Loader (spec §4.D).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("input file {path} does not exist")]
    MissingFile { path: PathBuf },

    #[error(transparent)]
    Identifier(#[from] InvalidIdentifier),

    #[error("failed to open {path} for streaming insert")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("destination insert timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("failed to connect to destination store")]
    Connection(#[source] reqwest::Error),

    #[error("destination store returned HTTP {status}: {body_prefix}")]
    Http { status: u16, body_prefix: String },

    #[error("transport error during destination insert")]
    Transport(#[source] reqwest::Error),
}

/// Errors raised by the State Store Adapter (spec §4.A).
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error(transparent)]
    Identifier(#[from] InvalidIdentifier),

    #[error("state store query failed")]
    Transport(#[source] reqwest::Error),

    #[error("state store returned HTTP {status}: {body_prefix}")]
    Http { status: u16, body_prefix: String },

    #[error("failed to parse state store response: {detail}")]
    Parse { detail: String },
}

/// Top-level failure taxonomy for one `runOnce` cycle (spec §4.E, §7).
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("concurrent run blocked: another cycle is already in progress")]
    ConcurrentRunBlocked,

    #[error("claim failed: lost the race to start this cycle")]
    ClaimFailed,

    #[error("timestamp_progress is missing; seed the state table before the first run")]
    ProgressMissing,

    #[error("extract failed")]
    Extract(#[from] ExtractError),

    #[error("transform failed")]
    Transform(#[from] TransformError),

    #[error("load failed")]
    Load(#[from] LoadError),

    #[error("state store operation failed")]
    StateStore(#[from] StateStoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    /// Process exit code per spec §6.5: `0` on success, `1` on any
    /// core-raised failure. Configuration errors are distinguished in logs
    /// but still exit `1` — there are no other exit codes on the core
    /// surface.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Whether the driver should treat this as retriable without operator
    /// intervention (spec §7 failure taxonomy).
    pub fn is_retriable(&self) -> bool {
        !matches!(self, EtlError::ProgressMissing | EtlError::Config(_))
    }
}
