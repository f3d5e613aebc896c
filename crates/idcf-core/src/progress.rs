//! Progress aggregation for a download run.
//!
//! The tracker only aggregates; it never prints or schedules anything
//! itself. Consumers take immutable snapshots and decide their own
//! emission cadence. Rate is a moving average over the most recent task
//! completions so the ETA tracks current throughput, not the whole run.

use crate::orchestrator::{DownloadOutcome, TaskStatus};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

/// Completions kept for the moving throughput window.
const RATE_WINDOW: usize = 8;

/// Immutable view of a run's progress.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub tasks_total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub partial: usize,
    pub bytes_transferred: u64,
    /// Projected total bytes for the run (estimate; 0 when unknown).
    pub expected_total_bytes: u64,
    pub elapsed_secs: f64,
    /// Moving-average throughput over recent completions, bytes/sec.
    pub recent_bytes_per_sec: f64,
}

impl ProgressSnapshot {
    pub fn tasks_done(&self) -> usize {
        self.completed + self.failed + self.skipped + self.partial
    }

    /// Overall rate since start (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if no usable rate).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self
            .expected_total_bytes
            .saturating_sub(self.bytes_transferred);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = if self.recent_bytes_per_sec > 0.0 {
            self.recent_bytes_per_sec
        } else {
            self.bytes_per_sec()
        };
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction of tasks resolved, in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.tasks_total == 0 {
            return 1.0;
        }
        (self.tasks_done() as f64 / self.tasks_total as f64).min(1.0)
    }
}

struct Inner {
    started: Instant,
    completed: usize,
    failed: usize,
    skipped: usize,
    partial: usize,
    bytes_transferred: u64,
    /// (elapsed secs at completion, cumulative bytes then) for recent tasks.
    window: VecDeque<(f64, u64)>,
}

/// Aggregates task outcomes as they reach a terminal state.
pub struct ProgressTracker {
    tasks_total: usize,
    expected_total_bytes: u64,
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new(tasks_total: usize, expected_total_bytes: u64) -> Self {
        Self {
            tasks_total,
            expected_total_bytes,
            inner: Mutex::new(Inner {
                started: Instant::now(),
                completed: 0,
                failed: 0,
                skipped: 0,
                partial: 0,
                bytes_transferred: 0,
                window: VecDeque::with_capacity(RATE_WINDOW + 1),
            }),
        }
    }

    pub fn record(&self, outcome: &DownloadOutcome) {
        let mut inner = self.inner.lock().unwrap();
        match outcome.status {
            TaskStatus::Completed => inner.completed += 1,
            TaskStatus::Failed => inner.failed += 1,
            TaskStatus::Skipped => inner.skipped += 1,
            TaskStatus::Partial => inner.partial += 1,
        }
        inner.bytes_transferred += outcome.bytes_transferred;
        let elapsed = inner.started.elapsed().as_secs_f64();
        let cumulative = inner.bytes_transferred;
        inner.window.push_back((elapsed, cumulative));
        while inner.window.len() > RATE_WINDOW {
            inner.window.pop_front();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.lock().unwrap();
        let recent = match (inner.window.front(), inner.window.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 && b1 > b0 => {
                (b1 - b0) as f64 / (t1 - t0)
            }
            _ => 0.0,
        };
        ProgressSnapshot {
            tasks_total: self.tasks_total,
            completed: inner.completed,
            failed: inner.failed,
            skipped: inner.skipped,
            partial: inner.partial,
            bytes_transferred: inner.bytes_transferred,
            expected_total_bytes: self.expected_total_bytes,
            elapsed_secs: inner.started.elapsed().as_secs_f64(),
            recent_bytes_per_sec: recent,
        }
    }
}
