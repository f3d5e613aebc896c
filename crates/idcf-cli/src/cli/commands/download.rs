//! `idcf download` – resolve the input to series tasks and run them.

use anyhow::{bail, Result};
use idcf_core::config::IdcfConfig;
use idcf_core::control::RunControl;
use idcf_core::index::CsvIndex;
use idcf_core::manifest::{InputSpec, ManifestResolver};
use idcf_core::orchestrator::{Orchestrator, RunOptions, RunSummary, TaskStatus, FAILED_LIST_FILE};
use idcf_core::progress::ProgressSnapshot;
use idcf_core::space::DiskSpaceGuard;
use idcf_core::transfer::HttpTransfer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub struct DownloadArgs {
    pub collection: Option<String>,
    pub uids: Vec<String>,
    pub query: Option<String>,
    pub manifest: Option<PathBuf>,
    pub output: PathBuf,
    pub index: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub jobs: Option<usize>,
    pub dry_run: bool,
    pub no_resume: bool,
}

pub async fn run_download(args: DownloadArgs, mut cfg: IdcfConfig) -> Result<i32> {
    if let Some(n) = args.batch_size {
        cfg.batch_size = n;
    }
    if let Some(n) = args.jobs {
        cfg.workers = n;
    }

    let input = if let Some(path) = &args.manifest {
        InputSpec::ManifestFile(path.clone())
    } else if let Some(id) = &args.collection {
        InputSpec::Collection(id.clone())
    } else if let Some(expr) = &args.query {
        InputSpec::Query(expr.clone())
    } else {
        InputSpec::SeriesUids(args.uids.clone())
    };

    let index = match &args.index {
        Some(path) => Some(CsvIndex::open(path)?),
        None => None,
    };
    let mut resolver = ManifestResolver::new(&args.output);
    if let Some(ix) = &index {
        resolver = resolver.with_index(ix);
    }
    let resolved = resolver.resolve(&input)?;
    for err in &resolved.unresolved {
        tracing::warn!("unresolved input: {err}");
        eprintln!("warning: {err}");
    }
    if resolved.tasks.is_empty() {
        bail!("no series resolved from the given input");
    }

    let guard = DiskSpaceGuard::new(cfg.disk.clone().unwrap_or_default());
    let estimate = guard.estimate(&resolved.tasks);
    println!(
        "{} series to download, {:.1} MiB projected ({} with unknown size)",
        resolved.tasks.len(),
        estimate.total_bytes() as f64 / 1_048_576.0,
        estimate.unknown_tasks
    );

    if args.dry_run {
        std::fs::create_dir_all(&args.output)?;
        let fits = guard.check(estimate.total_bytes(), &args.output)?;
        println!(
            "destination {} {} the projected size with headroom",
            args.output.display(),
            if fits { "fits" } else { "does NOT fit" }
        );
        return Ok(if fits { 0 } else { 3 });
    }

    let control = Arc::new(RunControl::new());
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupt received, letting in-flight transfers finish");
                control.request_cancel();
            }
        });
    }

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<ProgressSnapshot>(16);
    let progress_interval_ms = cfg.progress_interval_ms;
    let progress_handle = tokio::spawn(async move {
        let mut last_print = Instant::now();
        while let Some(snap) = progress_rx.recv().await {
            let now = Instant::now();
            if now.duration_since(last_print).as_millis() as u64 >= progress_interval_ms
                || snap.tasks_done() == snap.tasks_total
            {
                let done_mib = snap.bytes_transferred as f64 / 1_048_576.0;
                let rate_mib = snap.bytes_per_sec() / 1_048_576.0;
                let eta = snap
                    .eta_secs()
                    .map(|s| format!("{:.0}s", s))
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "  {} / {} series  {:.1} MiB  {:.2} MiB/s  ETA {}",
                    snap.tasks_done(),
                    snap.tasks_total,
                    done_mib,
                    rate_mib,
                    eta
                );
                last_print = now;
            }
        }
    });

    let orchestrator = Orchestrator::new(&cfg, Arc::new(HttpTransfer::default()));
    let summary = orchestrator
        .run(
            resolved.tasks,
            &args.output,
            RunOptions {
                resume: !args.no_resume,
            },
            control,
            Some(progress_tx),
        )
        .await?;
    let _ = progress_handle.await;

    print_summary(&summary, &args.output);
    Ok(match summary.aborted {
        Some(reason) => {
            eprintln!("run aborted: {reason}");
            3
        }
        None if summary.fully_successful() => 0,
        None => 2,
    })
}

fn print_summary(summary: &RunSummary, output: &std::path::Path) {
    println!(
        "done: {} completed, {} failed, {} partial, {} skipped ({:.1} MiB transferred)",
        summary.count(TaskStatus::Completed),
        summary.count(TaskStatus::Failed),
        summary.count(TaskStatus::Partial),
        summary.count(TaskStatus::Skipped),
        summary.bytes_transferred as f64 / 1_048_576.0
    );
    if !summary.retryable_series().is_empty() {
        println!(
            "failed series listed in {}",
            output.join(FAILED_LIST_FILE).display()
        );
    }
}
