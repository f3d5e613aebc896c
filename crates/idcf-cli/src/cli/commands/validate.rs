//! `idcf validate` – check a downloaded tree and report verdicts.

use anyhow::Result;
use idcf_core::config::IdcfConfig;
use idcf_core::manifest::{InputSpec, ManifestResolver};
use idcf_core::validate::{Validator, VerdictStatus};
use std::path::PathBuf;

pub struct ValidateArgs {
    pub dir: PathBuf,
    pub manifest: Option<PathBuf>,
    pub check_geometry: bool,
    pub output: Option<PathBuf>,
    pub jobs: Option<usize>,
}

pub async fn run_validate(args: ValidateArgs, cfg: IdcfConfig) -> Result<i32> {
    let tasks = match &args.manifest {
        Some(path) => {
            let resolved = ManifestResolver::new(&args.dir)
                .resolve(&InputSpec::ManifestFile(path.clone()))?;
            Some(resolved.tasks)
        }
        None => None,
    };

    let mut validator = Validator::new(&cfg).check_geometry(args.check_geometry);
    if let Some(n) = args.jobs {
        validator = validator.jobs(n);
    }
    let report = validator.run(&args.dir, tasks.as_deref()).await?;

    println!(
        "validated {} series: {} valid, {} incomplete, {} corrupted, {} geometry issues, {} not found",
        report.summary.total,
        report.summary.valid,
        report.summary.incomplete,
        report.summary.corrupted,
        report.summary.geometry_inconsistent,
        report.summary.not_found
    );
    for verdict in report
        .verdicts
        .iter()
        .filter(|v| v.status != VerdictStatus::Valid)
    {
        let detail = verdict
            .detail
            .as_ref()
            .map(|d| format!(" ({d})"))
            .unwrap_or_default();
        println!("  {}: {}{}", verdict.series_id, verdict.status.as_str(), detail);
    }

    if let Some(path) = &args.output {
        report.write_json(path)?;
        println!("report written to {}", path.display());
    }

    Ok(if report.all_valid() { 0 } else { 2 })
}
