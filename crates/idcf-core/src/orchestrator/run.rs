//! The run loop: batches, worker pool, checkpointing, cancellation.

use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::checkpoint::Checkpoint;
use crate::config::IdcfConfig;
use crate::control::RunControl;
use crate::error::{AbortReason, TransferError};
use crate::manifest::SeriesTask;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::space::DiskSpaceGuard;
use crate::storage;
use crate::transfer::Transfer;

use super::batch::make_batches;
use super::outcome::{DownloadOutcome, TaskStatus};
use super::FAILED_LIST_FILE;

/// Per-invocation options.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Honor an existing checkpoint (skip series already completed).
    pub resume: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { resume: true }
    }
}

/// Aggregate result of one orchestrator invocation.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: BTreeMap<String, DownloadOutcome>,
    pub bytes_transferred: u64,
    /// Set when the run stopped issuing tasks before the list was done.
    pub aborted: Option<AbortReason>,
}

impl RunSummary {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.outcomes.values().filter(|o| o.status == status).count()
    }

    /// True when nothing failed and the run was not aborted.
    pub fn fully_successful(&self) -> bool {
        self.aborted.is_none()
            && self.count(TaskStatus::Failed) == 0
            && self.count(TaskStatus::Partial) == 0
    }

    /// Series ids an operator would re-attempt (failed or partial).
    pub fn retryable_series(&self) -> Vec<String> {
        self.outcomes
            .values()
            .filter(|o| matches!(o.status, TaskStatus::Failed | TaskStatus::Partial))
            .map(|o| o.series_id.clone())
            .collect()
    }
}

/// Executes `SeriesTask`s against the transfer boundary.
pub struct Orchestrator {
    transfer: Arc<dyn Transfer>,
    guard: DiskSpaceGuard,
    policy: RetryPolicy,
    batch_size: usize,
    max_batch_bytes: u64,
    unknown_allowance: u64,
    workers: usize,
}

impl Orchestrator {
    pub fn new(cfg: &IdcfConfig, transfer: Arc<dyn Transfer>) -> Self {
        let disk = cfg.disk.clone().unwrap_or_default();
        let unknown_allowance = disk.unknown_series_floor_mb * 1024 * 1024;
        Self {
            transfer,
            guard: DiskSpaceGuard::new(disk),
            policy: cfg
                .retry
                .as_ref()
                .map(RetryPolicy::from_config)
                .unwrap_or_default(),
            batch_size: cfg.batch_size,
            max_batch_bytes: cfg.max_batch_mb * 1024 * 1024,
            unknown_allowance,
            workers: cfg.workers.max(1),
        }
    }

    /// Replace the disk guard (tests inject a fake free-space probe).
    pub fn with_guard(mut self, guard: DiskSpaceGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Run the task list to completion, abort, or cancellation.
    ///
    /// Every task that is issued ends with exactly one recorded outcome;
    /// tasks never issued because of an abort are absent from the summary
    /// and `aborted` says why.
    pub async fn run(
        &self,
        tasks: Vec<SeriesTask>,
        destination_root: &Path,
        opts: RunOptions,
        control: Arc<RunControl>,
        progress_tx: Option<mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<RunSummary> {
        fs::create_dir_all(destination_root)
            .with_context(|| format!("create {}", destination_root.display()))?;

        let fingerprint = Checkpoint::fingerprint(&tasks);
        let mut checkpoint = match opts.resume {
            true => Checkpoint::load_matching(destination_root, &fingerprint),
            false => None,
        }
        .unwrap_or_else(|| Checkpoint::new(fingerprint));

        let mut outcomes: BTreeMap<String, DownloadOutcome> = BTreeMap::new();
        let mut pending = Vec::new();
        for task in tasks {
            // Only completed work is skipped on resume; failed and partial
            // tasks from the previous run are re-attempted.
            let settled = checkpoint
                .outcomes
                .get(&task.series_id)
                .map(|o| o.status.is_settled())
                .unwrap_or(false);
            if settled {
                outcomes.insert(
                    task.series_id.clone(),
                    DownloadOutcome::skipped(&task.series_id),
                );
            } else {
                pending.push(task);
            }
        }
        if !outcomes.is_empty() {
            tracing::info!("skipping {} previously completed series", outcomes.len());
        }

        let estimate = self.guard.estimate(&pending);
        let tracker = ProgressTracker::new(
            outcomes.len() + pending.len(),
            estimate.total_bytes(),
        );
        for o in outcomes.values() {
            tracker.record(o);
        }

        let mut aborted = None;
        if !pending.is_empty()
            && !self
                .guard
                .check(estimate.total_bytes(), destination_root)?
        {
            tracing::error!(
                expected_bytes = estimate.total_bytes(),
                "insufficient disk space, refusing to start transfers"
            );
            aborted = Some(AbortReason::DiskSpaceExhausted);
        }

        if aborted.is_none() {
            aborted = self
                .run_batches(
                    pending,
                    destination_root,
                    &mut checkpoint,
                    &mut outcomes,
                    &tracker,
                    &control,
                    progress_tx.as_ref(),
                )
                .await?;
        }

        let summary = RunSummary {
            bytes_transferred: tracker.snapshot().bytes_transferred,
            outcomes,
            aborted,
        };
        self.write_failed_list(destination_root, &summary)?;
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batches(
        &self,
        pending: Vec<SeriesTask>,
        destination_root: &Path,
        checkpoint: &mut Checkpoint,
        outcomes: &mut BTreeMap<String, DownloadOutcome>,
        tracker: &ProgressTracker,
        control: &Arc<RunControl>,
        progress_tx: Option<&mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<Option<AbortReason>> {
        let mut batches: VecDeque<Vec<SeriesTask>> = make_batches(
            pending,
            self.batch_size,
            self.max_batch_bytes,
            self.unknown_allowance,
        )
        .into();
        let total_batches = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));

        let mut batch_no = 0usize;
        while let Some(batch) = batches.pop_front() {
            batch_no += 1;
            if control.is_cancelled() {
                return Ok(Some(AbortReason::Cancelled));
            }

            // The pre-run check covered everything; later batches get a
            // fresh look because actual sizes may have exceeded estimates.
            if batch_no > 1 {
                let remaining: Vec<SeriesTask> = batch
                    .iter()
                    .cloned()
                    .chain(batches.iter().flatten().cloned())
                    .collect();
                let estimate = self.guard.estimate(&remaining);
                if !self.guard.check(estimate.total_bytes(), destination_root)? {
                    tracing::error!(
                        batch = batch_no,
                        "free space below low-water mark, suspending task starts"
                    );
                    return Ok(Some(AbortReason::DiskSpaceExhausted));
                }
            }

            tracing::info!(
                batch = batch_no,
                of = total_batches,
                series = batch.len(),
                "starting batch"
            );

            let mut join_set = JoinSet::new();
            for task in batch {
                let transfer = Arc::clone(&self.transfer);
                let policy = self.policy;
                let semaphore = Arc::clone(&semaphore);
                let control = Arc::clone(control);
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("worker semaphore closed");
                    // A cancel may have arrived while this task waited for a
                    // worker slot; leave it unrecorded so a resume picks it up.
                    if control.is_cancelled() {
                        return Ok(None);
                    }
                    tokio::task::spawn_blocking(move || execute_task(&*transfer, &policy, &task))
                        .await
                        .map(Some)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let outcome = joined
                    .map_err(|e| anyhow!("worker join: {e}"))?
                    .map_err(|e| anyhow!("transfer thread join: {e}"))?;
                let Some(outcome) = outcome else {
                    continue;
                };
                if outcome.status == TaskStatus::Failed {
                    tracing::warn!(
                        series = %outcome.series_id,
                        attempts = outcome.attempts,
                        error = outcome.error_detail.as_deref().unwrap_or("unknown"),
                        "series download failed"
                    );
                }
                checkpoint.record(outcome.clone());
                checkpoint.save(destination_root)?;
                tracker.record(&outcome);
                if let Some(tx) = progress_tx {
                    let _ = tx.try_send(tracker.snapshot());
                }
                outcomes.insert(outcome.series_id.clone(), outcome);
            }

            if control.is_cancelled() {
                return Ok(Some(AbortReason::Cancelled));
            }
        }
        Ok(None)
    }

    /// Write (or clear) the failed-series listing next to the checkpoint.
    fn write_failed_list(&self, destination_root: &Path, summary: &RunSummary) -> Result<()> {
        let path = destination_root.join(FAILED_LIST_FILE);
        let failed = summary.retryable_series();
        if failed.is_empty() {
            if path.exists() {
                let _ = fs::remove_file(&path);
            }
            return Ok(());
        }
        fs::write(&path, failed.join("\n") + "\n")
            .with_context(|| format!("write {}", path.display()))?;
        tracing::info!("failed series listed in {}", path.display());
        Ok(())
    }
}

/// One task from start to a recorded outcome: stage, transfer with retry,
/// promote. Ends `Completed`, `Failed`, or `Partial` (the transfer moved
/// bytes but fell short).
fn execute_task(
    transfer: &dyn Transfer,
    policy: &RetryPolicy,
    task: &SeriesTask,
) -> DownloadOutcome {
    let staging = match storage::stage_dir(&task.destination_path) {
        Ok(s) => s,
        Err(e) => {
            return DownloadOutcome {
                series_id: task.series_id.clone(),
                status: TaskStatus::Failed,
                bytes_transferred: 0,
                attempts: 0,
                error_detail: Some(format!("staging: {e:#}")),
            }
        }
    };

    let (result, attempts) =
        run_with_retry(policy, || transfer.transfer(&task.source_locator, &staging));

    match result {
        Ok(bytes) => match storage::promote_dir(&staging, &task.destination_path) {
            Ok(()) => DownloadOutcome {
                series_id: task.series_id.clone(),
                status: TaskStatus::Completed,
                bytes_transferred: bytes,
                attempts,
                error_detail: None,
            },
            Err(e) => {
                storage::discard_dir(&staging);
                DownloadOutcome {
                    series_id: task.series_id.clone(),
                    status: TaskStatus::Failed,
                    bytes_transferred: 0,
                    attempts,
                    error_detail: Some(format!("promote: {e:#}")),
                }
            }
        },
        Err(e) => {
            storage::discard_dir(&staging);
            let status = match e {
                TransferError::PartialTransfer { .. } => TaskStatus::Partial,
                _ => TaskStatus::Failed,
            };
            DownloadOutcome {
                series_id: task.series_id.clone(),
                status,
                bytes_transferred: 0,
                attempts,
                error_detail: Some(e.to_string()),
            }
        }
    }
}
