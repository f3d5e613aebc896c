//! Verdicts and the machine-readable validation report.

use super::geometry::GeometryCheck;
use super::integrity::{ParseFailure, SeriesIntegrity};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Final per-series verdict. One category per series, picked by strict
/// precedence: `NotFound > Corrupted > Incomplete > GeometryInconsistent
/// > Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Valid,
    Incomplete,
    Corrupted,
    GeometryInconsistent,
    NotFound,
}

impl VerdictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Valid => "valid",
            VerdictStatus::Incomplete => "incomplete",
            VerdictStatus::Corrupted => "corrupted",
            VerdictStatus::GeometryInconsistent => "geometry_inconsistent",
            VerdictStatus::NotFound => "not_found",
        }
    }
}

/// One corrupted file, with enough detail to chase the cause.
#[derive(Debug, Clone, Serialize)]
pub struct CorruptedFile {
    pub file_path: PathBuf,
    pub failure: ParseFailure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationVerdict {
    pub series_id: String,
    pub status: VerdictStatus,
    pub file_count: usize,
    pub parsed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_instance_count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub corrupted_files: Vec<CorruptedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_without_pixel_data: Vec<PathBuf>,
    /// "consistent", "insufficient_data" or "inconsistent"; absent when the
    /// geometry check did not apply (non-volumetric series or disabled).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub geometry_violations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Combine integrity and geometry findings into one verdict.
/// `integrity = None` means the destination directory does not exist.
pub fn build_verdict(
    series_id: &str,
    expected_instance_count: Option<u32>,
    integrity: Option<&SeriesIntegrity>,
    geometry: Option<&GeometryCheck>,
) -> ValidationVerdict {
    let Some(integrity) = integrity else {
        return ValidationVerdict {
            series_id: series_id.to_string(),
            status: VerdictStatus::NotFound,
            file_count: 0,
            parsed_files: 0,
            expected_instance_count,
            corrupted_files: Vec::new(),
            files_without_pixel_data: Vec::new(),
            geometry: None,
            geometry_violations: Vec::new(),
            detail: Some("destination directory missing".to_string()),
        };
    };

    let corrupted_files: Vec<CorruptedFile> = integrity
        .files
        .iter()
        .filter(|f| !f.parse_ok)
        .map(|f| CorruptedFile {
            file_path: f.file_path.clone(),
            failure: f.failure.unwrap_or(ParseFailure::Structural),
            sha256: f.sha256.clone(),
            error: f.error.clone(),
        })
        .collect();
    let files_without_pixel_data: Vec<PathBuf> = integrity
        .files
        .iter()
        .filter(|f| f.parse_ok && !f.has_pixel_data)
        .map(|f| f.file_path.clone())
        .collect();
    let geometry_violations: Vec<String> = geometry
        .map(|g| g.violations().to_vec())
        .unwrap_or_default();

    let (status, detail) = if !corrupted_files.is_empty() {
        (
            VerdictStatus::Corrupted,
            Some(format!("{} file(s) failed to parse", corrupted_files.len())),
        )
    } else if integrity.complete == Some(false) {
        (
            VerdictStatus::Incomplete,
            Some(format!(
                "expected {} instance(s), parsed {}",
                expected_instance_count.unwrap_or(0),
                integrity.parsed_files
            )),
        )
    } else if matches!(geometry, Some(GeometryCheck::Inconsistent(_))) {
        (VerdictStatus::GeometryInconsistent, None)
    } else {
        (VerdictStatus::Valid, None)
    };

    ValidationVerdict {
        series_id: series_id.to_string(),
        status,
        file_count: integrity.files.len(),
        parsed_files: integrity.parsed_files,
        expected_instance_count,
        corrupted_files,
        files_without_pixel_data,
        geometry: geometry.map(|g| g.as_str().to_string()),
        geometry_violations,
        detail,
    }
}

/// Counts per verdict category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub valid: usize,
    pub incomplete: usize,
    pub corrupted: usize,
    pub geometry_inconsistent: usize,
    pub not_found: usize,
}

/// Full validation report: summary plus one entry per series, sorted by id.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub generated_at: u64,
    pub root: PathBuf,
    pub summary: ReportSummary,
    pub verdicts: Vec<ValidationVerdict>,
}

impl ValidationReport {
    pub fn new(root: &Path, mut verdicts: Vec<ValidationVerdict>) -> Self {
        verdicts.sort_by(|a, b| a.series_id.cmp(&b.series_id));
        let mut summary = ReportSummary {
            total: verdicts.len(),
            ..ReportSummary::default()
        };
        for v in &verdicts {
            match v.status {
                VerdictStatus::Valid => summary.valid += 1,
                VerdictStatus::Incomplete => summary.incomplete += 1,
                VerdictStatus::Corrupted => summary.corrupted += 1,
                VerdictStatus::GeometryInconsistent => summary.geometry_inconsistent += 1,
                VerdictStatus::NotFound => summary.not_found += 1,
            }
        }
        Self {
            generated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            root: root.to_path_buf(),
            summary,
            verdicts,
        }
    }

    pub fn all_valid(&self) -> bool {
        self.summary.valid == self.summary.total
    }

    /// Series ids worth re-downloading. Data only; feeding them back into
    /// the orchestrator is the caller's business.
    pub fn retry_series(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .filter(|v| v.status != VerdictStatus::Valid)
            .map(|v| v.series_id.clone())
            .collect()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("write report {}", path.display()))?;
        Ok(())
    }
}
