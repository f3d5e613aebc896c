//! Per-file parse and pixel-payload checks, aggregated per series.

use crate::checksum;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, DefaultDicomObject};
use dicom_pixeldata::PixelDecoder;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Modalities whose instances carry a pixel grid; for these the payload is
/// materialized, not just the header parsed.
pub const IMAGE_MODALITIES: &[&str] = &["CT", "MR", "PT", "CR", "DX", "SM"];

/// Modalities validated as 3D volumes by the geometry check.
pub const VOLUMETRIC_MODALITIES: &[&str] = &["CT", "MR", "PT"];

/// Why a file failed to parse. Truncation points at the download
/// (re-fetch may fix it); structural corruption points at the source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailure {
    Truncated,
    Structural,
}

/// Result of probing a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileIntegrity {
    pub file_path: PathBuf,
    pub parse_ok: bool,
    pub has_pixel_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ParseFailure>,
    /// Digest of the bytes on disk, recorded for corrupted files so two bad
    /// downloads of the same object can be told apart from source corruption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse one file and, for image modalities, materialize its pixel payload.
/// The parsed dataset is returned alongside so the geometry check can reuse
/// it without a second read.
pub fn probe_file(path: &Path) -> (FileIntegrity, Option<DefaultDicomObject>) {
    match open_file(path) {
        Ok(obj) => {
            let needs_pixels = modality(&obj)
                .map(|m| IMAGE_MODALITIES.contains(&m.as_str()))
                .unwrap_or(false);
            let (has_pixel_data, error) = if needs_pixels {
                match obj.decode_pixel_data() {
                    Ok(_) => (true, None),
                    Err(e) => (false, Some(format!("pixel data: {e}"))),
                }
            } else {
                // SR, SEG and friends have no simple pixel grid; exempt.
                (true, None)
            };
            (
                FileIntegrity {
                    file_path: path.to_path_buf(),
                    parse_ok: true,
                    has_pixel_data,
                    failure: None,
                    sha256: None,
                    error,
                },
                Some(obj),
            )
        }
        Err(e) => {
            let failure = if is_truncation(&e) {
                ParseFailure::Truncated
            } else {
                ParseFailure::Structural
            };
            (
                FileIntegrity {
                    file_path: path.to_path_buf(),
                    parse_ok: false,
                    has_pixel_data: false,
                    failure: Some(failure),
                    sha256: checksum::sha256_path(path).ok(),
                    error: Some(e.to_string()),
                },
                None,
            )
        }
    }
}

/// Modality of a parsed dataset, trimmed of padding.
pub fn modality(obj: &DefaultDicomObject) -> Option<String> {
    obj.element(tags::MODALITY)
        .ok()?
        .to_str()
        .ok()
        .map(|s| s.trim().to_string())
}

/// Series Instance UID of a parsed dataset.
pub fn series_uid(obj: &DefaultDicomObject) -> Option<String> {
    obj.element(tags::SERIES_INSTANCE_UID)
        .ok()?
        .to_str()
        .ok()
        .map(|s| s.trim_end_matches('\0').trim().to_string())
}

/// True when the error chain bottoms out in an unexpected-EOF read, the
/// signature of a cut-short transfer rather than malformed data.
fn is_truncation<E>(err: &E) -> bool
where
    E: std::error::Error + 'static,
{
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        if e.to_string().to_ascii_lowercase().contains("end of file") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Per-series aggregation of file probes.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesIntegrity {
    pub files: Vec<FileIntegrity>,
    pub parsed_files: usize,
    pub corrupted_files: usize,
    /// `parse_ok` count vs the manifest's expectation; `None` when no
    /// expectation is available.
    pub complete: Option<bool>,
}

pub fn aggregate(files: Vec<FileIntegrity>, expected_instance_count: Option<u32>) -> SeriesIntegrity {
    let parsed_files = files.iter().filter(|f| f.parse_ok).count();
    let corrupted_files = files.len() - parsed_files;
    let complete = expected_instance_count.map(|n| parsed_files == n as usize);
    SeriesIntegrity {
        files,
        parsed_files,
        corrupted_files,
        complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::testdata;

    #[test]
    fn well_formed_file_parses_with_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = testdata::write_slice(dir.path(), "000001.dcm", &testdata::ct_slice("1.2.3", 1, 0.0));
        let (fi, obj) = probe_file(&path);
        assert!(fi.parse_ok);
        assert!(fi.has_pixel_data);
        assert!(fi.failure.is_none());
        let obj = obj.unwrap();
        assert_eq!(modality(&obj).as_deref(), Some("CT"));
        assert_eq!(series_uid(&obj).as_deref(), Some("1.2.3"));
    }

    #[test]
    fn truncated_file_classified_as_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = testdata::write_truncated_slice(dir.path(), "000001.dcm");
        let (fi, obj) = probe_file(&path);
        assert!(!fi.parse_ok);
        assert_eq!(fi.failure, Some(ParseFailure::Truncated));
        assert!(fi.sha256.is_some());
        assert!(obj.is_none());
    }

    #[test]
    fn garbage_file_classified_as_structural() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dcm");
        std::fs::write(&path, b"this is not a dataset, no preamble, no magic").unwrap();
        let (fi, _) = probe_file(&path);
        assert!(!fi.parse_ok);
        assert_eq!(fi.failure, Some(ParseFailure::Structural));
        assert!(fi.error.is_some());
    }

    #[test]
    fn count_law_complete_vs_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let k = 3u32;
        let probes: Vec<FileIntegrity> = (0..k)
            .map(|i| {
                let path = testdata::write_slice(
                    dir.path(),
                    &format!("{i:06}.dcm"),
                    &testdata::ct_slice("1.2.3", i, i as f64),
                );
                probe_file(&path).0
            })
            .collect();

        let agg = aggregate(probes.clone(), Some(k));
        assert_eq!(agg.parsed_files, k as usize);
        assert_eq!(agg.corrupted_files, 0);
        assert_eq!(agg.complete, Some(true));

        let agg = aggregate(probes, Some(k + 1));
        assert_eq!(agg.complete, Some(false));
    }

    #[test]
    fn unknown_expectation_leaves_completeness_open() {
        let agg = aggregate(Vec::new(), None);
        assert_eq!(agg.complete, None);
        assert_eq!(agg.parsed_files, 0);
    }
}
