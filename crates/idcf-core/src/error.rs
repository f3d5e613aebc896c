//! Error taxonomy for the download/validation pipeline.
//!
//! Per-task and per-identifier failures are values, not aborts: a
//! `ResolutionError` drops one identifier from the run, a `TransferError`
//! is retried and then recorded in the task's outcome. Only disk-space
//! exhaustion and explicit cancellation stop a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// An identifier yielded no series. Recoverable: the run proceeds with the
/// remaining identifiers and the failure is reported in the manifest summary.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no series found for collection '{0}'")]
    EmptyCollection(String),
    #[error("no series found for identifier '{0}'")]
    UnknownSeries(String),
    #[error("query '{0}' matched no series")]
    EmptyQuery(String),
    #[error("series '{0}' has no source locator in the index")]
    MissingLocator(String),
}

/// The input specification itself is unusable (no identifier form matched,
/// manifest unreadable, duplicate series ids). Fatal for the invocation.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read manifest {path}: {source}")]
    ManifestUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest {0} matched no known format (locator lines, bare series ids, or a SeriesInstanceUID column)")]
    UnrecognizedManifest(PathBuf),
    #[error("manifest {0} contains no series")]
    EmptyManifest(PathBuf),
    #[error("duplicate series id in run: {0}")]
    DuplicateSeries(String),
    #[error("input requires a series index (see --index)")]
    IndexRequired,
    #[error("failed to read series index: {0}")]
    IndexUnreadable(#[source] csv::Error),
    #[error("series index is missing a '{0}' column")]
    IndexMissingColumn(&'static str),
}

/// Failure of a single object-store transfer. Classified by the retry
/// module into retryable and terminal kinds.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer: {0}")]
    Curl(#[from] curl::Error),
    #[error("HTTP {0}")]
    Http(u32),
    #[error("locator not found (HTTP {0})")]
    NotFound(u32),
    #[error("unsupported locator scheme: {0}")]
    UnsupportedLocator(String),
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
}

/// Why a run stopped issuing tasks before the task list was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Free space fell below the low-water mark; in-flight tasks were allowed
    /// to finish, completed output was kept.
    DiskSpaceExhausted,
    /// Cooperative cancellation (e.g. Ctrl-C).
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::DiskSpaceExhausted => write!(f, "disk space exhausted"),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}
