//! Post-download validation of a series tree.
//!
//! A separate pass over the finished tree, never concurrent with a
//! download of the same series: the atomic promote in `storage` means any
//! directory with a final name holds everything the transfer delivered.
//! Series are validated independently on a bounded pool; per-file checks
//! commute, and the geometry check sees each series' complete file set.

pub mod geometry;
pub mod integrity;
pub mod report;
#[cfg(test)]
pub(crate) mod testdata;

pub use report::{ValidationReport, ValidationVerdict, VerdictStatus};

use crate::config::{GeometryConfig, IdcfConfig};
use crate::manifest::SeriesTask;
use crate::storage::TEMP_SUFFIX;
use anyhow::{anyhow, bail, Context, Result};
use geometry::SliceGeometry;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct Validator {
    geometry_cfg: GeometryConfig,
    check_geometry: bool,
    jobs: usize,
}

impl Validator {
    pub fn new(cfg: &IdcfConfig) -> Self {
        Self {
            geometry_cfg: cfg.geometry.clone().unwrap_or_default(),
            check_geometry: false,
            jobs: cfg.workers.max(1),
        }
    }

    pub fn check_geometry(mut self, on: bool) -> Self {
        self.check_geometry = on;
        self
    }

    pub fn jobs(mut self, n: usize) -> Self {
        self.jobs = n.max(1);
        self
    }

    /// Validate every series under `root`. With a manifest, expected counts
    /// come from it and series whose destination is missing get a
    /// `not_found` verdict; series on disk but not in the manifest are
    /// still validated, just without a count expectation.
    pub async fn run(
        &self,
        root: &Path,
        manifest: Option<&[SeriesTask]>,
    ) -> Result<ValidationReport> {
        if !root.is_dir() {
            bail!("validation root {} is not a directory", root.display());
        }

        let discovered = discover_series_dirs(root)?;
        let mut verdicts = Vec::new();
        let mut jobs: Vec<SeriesJob> = Vec::new();

        match manifest {
            Some(tasks) => {
                let mut claimed: HashSet<PathBuf> = HashSet::new();
                for task in tasks {
                    if task.destination_path.is_dir() {
                        claimed.insert(task.destination_path.clone());
                        jobs.push(SeriesJob {
                            dir: task.destination_path.clone(),
                            id_hint: Some(task.series_id.clone()),
                            expected: task.expected_instance_count,
                        });
                    } else {
                        verdicts.push(report::build_verdict(
                            &task.series_id,
                            task.expected_instance_count,
                            None,
                            None,
                        ));
                    }
                }
                for dir in discovered {
                    if !claimed.contains(&dir) {
                        jobs.push(SeriesJob {
                            dir,
                            id_hint: None,
                            expected: None,
                        });
                    }
                }
            }
            None => {
                for dir in discovered {
                    jobs.push(SeriesJob {
                        dir,
                        id_hint: None,
                        expected: None,
                    });
                }
            }
        }

        tracing::info!(
            series = jobs.len() + verdicts.len(),
            geometry = self.check_geometry,
            "validating {}",
            root.display()
        );

        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut join_set = JoinSet::new();
        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let geom_cfg = self.geometry_cfg.clone();
            let check_geometry = self.check_geometry;
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("validator semaphore closed");
                tokio::task::spawn_blocking(move || {
                    validate_series_dir(&job.dir, job.id_hint, job.expected, check_geometry, &geom_cfg)
                })
                .await
            });
        }
        while let Some(joined) = join_set.join_next().await {
            let verdict = joined
                .map_err(|e| anyhow!("validator join: {e}"))?
                .map_err(|e| anyhow!("validator thread join: {e}"))?;
            if verdict.status != VerdictStatus::Valid {
                tracing::warn!(
                    series = %verdict.series_id,
                    status = verdict.status.as_str(),
                    "series is not valid"
                );
            }
            verdicts.push(verdict);
        }

        Ok(ValidationReport::new(root, verdicts))
    }
}

struct SeriesJob {
    dir: PathBuf,
    id_hint: Option<String>,
    expected: Option<u32>,
}

/// Directories under `root` that directly contain DICOM files. Staging
/// directories (`.part` names) are not descended into.
fn discover_series_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut has_dicom = false;
        let entries =
            fs::read_dir(&dir).with_context(|| format!("read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if !name.ends_with(TEMP_SUFFIX) {
                    stack.push(path);
                }
            } else if is_dicom_name(&name) {
                has_dicom = true;
            }
        }
        if has_dicom {
            found.push(dir);
        }
    }
    found.sort();
    Ok(found)
}

fn is_dicom_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".dcm")
}

/// Full check of one series directory (blocking; runs on the pool).
fn validate_series_dir(
    dir: &Path,
    id_hint: Option<String>,
    expected: Option<u32>,
    check_geometry: bool,
    geom_cfg: &GeometryConfig,
) -> ValidationVerdict {
    let fallback_id = || {
        id_hint.clone().unwrap_or_else(|| {
            dir.file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string())
        })
    };

    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .map(|n| is_dicom_name(&n.to_string_lossy()))
                        .unwrap_or(false)
            })
            .collect(),
        // Vanished between discovery and validation.
        Err(_) => return report::build_verdict(&fallback_id(), expected, None, None),
    };
    files.sort();

    let mut probes = Vec::with_capacity(files.len());
    let mut objects = Vec::new();
    for file in &files {
        let (probe, object) = integrity::probe_file(file);
        probes.push(probe);
        if let Some(obj) = object {
            objects.push(obj);
        }
    }

    let series_id = id_hint
        .clone()
        .or_else(|| objects.first().and_then(integrity::series_uid))
        .unwrap_or_else(fallback_id);

    let aggregated = integrity::aggregate(probes, expected);

    let geometry = if check_geometry {
        match objects.first().and_then(integrity::modality) {
            Some(m) if integrity::VOLUMETRIC_MODALITIES.contains(&m.as_str()) => {
                let slices: Vec<SliceGeometry> = objects
                    .iter()
                    .filter_map(SliceGeometry::from_object)
                    .collect();
                Some(geometry::check_series(&slices, geom_cfg))
            }
            _ => None,
        }
    } else {
        None
    };

    report::build_verdict(&series_id, expected, Some(&aggregated), geometry.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(root: &Path, id: &str, expected: Option<u32>) -> SeriesTask {
        SeriesTask {
            series_id: id.to_string(),
            collection_id: "c".to_string(),
            expected_instance_count: expected,
            expected_size_bytes: None,
            source_locator: format!("https://h/{id}"),
            destination_path: root.join("c").join(id),
        }
    }

    fn validator() -> Validator {
        Validator::new(&IdcfConfig::default())
    }

    #[tokio::test]
    async fn downloaded_series_valid_missing_series_not_found() {
        let dir = tempfile::tempdir().unwrap();
        testdata::write_ct_stack(&dir.path().join("c/S1"), "S1", 3);
        let manifest = vec![
            task(dir.path(), "S1", Some(3)),
            task(dir.path(), "S2", Some(5)),
        ];

        let report = validator().run(dir.path(), Some(&manifest)).await.unwrap();
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.verdicts[0].series_id, "S1");
        assert_eq!(report.verdicts[0].status, VerdictStatus::Valid);
        assert_eq!(report.verdicts[1].series_id, "S2");
        assert_eq!(report.verdicts[1].status, VerdictStatus::NotFound);
        assert_eq!(report.retry_series(), vec!["S2".to_string()]);
    }

    #[tokio::test]
    async fn truncated_file_makes_series_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let series = dir.path().join("c/S1");
        testdata::write_ct_stack(&series, "S1", 2);
        testdata::write_truncated_slice(&series, "000003.dcm");
        let manifest = vec![task(dir.path(), "S1", Some(3))];

        let report = validator().run(dir.path(), Some(&manifest)).await.unwrap();
        let v = &report.verdicts[0];
        assert_eq!(v.status, VerdictStatus::Corrupted);
        assert_eq!(v.corrupted_files.len(), 1);
        assert!(v.corrupted_files[0].sha256.is_some());
    }

    #[tokio::test]
    async fn short_series_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        testdata::write_ct_stack(&dir.path().join("c/S1"), "S1", 2);
        let manifest = vec![task(dir.path(), "S1", Some(3))];

        let report = validator().run(dir.path(), Some(&manifest)).await.unwrap();
        assert_eq!(report.verdicts[0].status, VerdictStatus::Incomplete);
        assert!(report.verdicts[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("expected 3"));
    }

    #[tokio::test]
    async fn gap_in_stack_flagged_when_geometry_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let series = dir.path().join("c/S1");
        for (i, z) in [0.0, 1.0, 2.0, 4.0, 5.0].iter().enumerate() {
            testdata::write_slice(
                &series,
                &format!("{:06}.dcm", i + 1),
                &testdata::ct_slice("S1", i as u32 + 1, *z),
            );
        }
        let manifest = vec![task(dir.path(), "S1", Some(5))];

        let report = validator()
            .check_geometry(true)
            .run(dir.path(), Some(&manifest))
            .await
            .unwrap();
        let v = &report.verdicts[0];
        assert_eq!(v.status, VerdictStatus::GeometryInconsistent);
        assert!(!v.geometry_violations.is_empty());

        // Same tree passes when the geometry check is off.
        let report = validator().run(dir.path(), Some(&manifest)).await.unwrap();
        assert_eq!(report.verdicts[0].status, VerdictStatus::Valid);
    }

    #[tokio::test]
    async fn discovery_without_manifest_reads_series_uids() {
        let dir = tempfile::tempdir().unwrap();
        testdata::write_ct_stack(&dir.path().join("c/1.2.3"), "1.2.3", 2);
        testdata::write_ct_stack(&dir.path().join("c/1.2.4"), "1.2.4", 2);

        let report = validator().run(dir.path(), None).await.unwrap();
        assert_eq!(report.summary.total, 2);
        let ids: Vec<&str> = report.verdicts.iter().map(|v| v.series_id.as_str()).collect();
        assert_eq!(ids, vec!["1.2.3", "1.2.4"]);
        assert!(report.all_valid());
    }

    #[tokio::test]
    async fn staging_directories_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        testdata::write_ct_stack(&dir.path().join("c/S1"), "S1", 2);
        testdata::write_ct_stack(&dir.path().join("c/S2.part"), "S2", 1);

        let report = validator().run(dir.path(), None).await.unwrap();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.verdicts[0].series_id, "S1");
    }

    #[tokio::test]
    async fn unmanifested_series_still_validated() {
        let dir = tempfile::tempdir().unwrap();
        testdata::write_ct_stack(&dir.path().join("c/S1"), "S1", 2);
        testdata::write_ct_stack(&dir.path().join("c/extra"), "1.7.7", 2);
        let manifest = vec![task(dir.path(), "S1", Some(2))];

        let report = validator().run(dir.path(), Some(&manifest)).await.unwrap();
        assert_eq!(report.summary.total, 2);
        let extra = report
            .verdicts
            .iter()
            .find(|v| v.series_id == "1.7.7")
            .unwrap();
        assert_eq!(extra.status, VerdictStatus::Valid);
        assert_eq!(extra.expected_instance_count, None);
    }
}
