//! Download orchestrator.
//!
//! Drives the resolved task list batch-by-batch: disk-space guard before
//! and between batches, a bounded worker pool within a batch, retry with
//! backoff per task, checkpoint persistence after every recorded outcome,
//! and graceful cancellation. The crash-recovery unit is one
//! batch: on resume, series the checkpoint records as completed are
//! skipped and everything else (in flight, failed, partial) is
//! re-attempted.

mod batch;
mod outcome;
mod run;

pub use batch::make_batches;
pub use outcome::{DownloadOutcome, TaskStatus};
pub use run::{Orchestrator, RunOptions, RunSummary};

/// Name of the failed-series listing written next to the checkpoint when a
/// run ends with failures. One series id per line; the manifest resolver
/// accepts the file back as a bare-id manifest (with an index attached) so
/// exactly those series can be retried.
pub const FAILED_LIST_FILE: &str = "failed_series.txt";
