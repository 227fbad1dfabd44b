//! Structured logging setup (SPEC_FULL §4.H).
//!
//! Mirrors `logging_config.py`'s intent — one process-wide leveled logger,
//! configured from `LOG_LEVEL` — using `tracing` instead of Python's stdlib
//! `logging` module. Structured context (operation tag, path, identifier)
//! is attached as tracing fields at each call site rather than folded into
//! the message string.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber from `log_level`.
///
/// An unrecognized level falls back to `info` and logs a warning about the
/// fallback, rather than failing process startup over a logging typo.
pub fn init(log_level: &str) {
    let normalized = log_level.trim().to_ascii_lowercase();
    let (directive, fell_back) = match normalized.as_str() {
        "trace" | "debug" | "info" | "warn" | "warning" | "error" | "critical" => {
            let level = if normalized == "warning" {
                "warn"
            } else if normalized == "critical" {
                "error"
            } else {
                normalized.as_str()
            };
            (level.to_string(), false)
        }
        _ => ("info".to_string(), true),
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if fell_back {
        tracing::warn!(
            configured_level = log_level,
            fallback_level = "info",
            "unrecognized LOG_LEVEL, falling back to info"
        );
    }
}
