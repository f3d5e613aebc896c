//! Cross-slice geometry consistency for volumetric series.
//!
//! Count checks cannot tell a substituted slice from the real one; a wrong
//! slice betrays itself through mismatched dimensions, spacing, orientation,
//! or an irregular step between sorted slice positions. The check is pure
//! over extracted per-slice geometry so it can be exercised without files.

use crate::config::GeometryConfig;
use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;

/// Geometry attributes of one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceGeometry {
    pub rows: u16,
    pub cols: u16,
    /// Row spacing, column spacing (mm).
    pub pixel_spacing: [f64; 2],
    /// Image Position (Patient), mm.
    pub position: [f64; 3],
    /// Image Orientation (Patient): row cosines then column cosines.
    pub orientation: [f64; 6],
    pub slice_thickness: Option<f64>,
}

impl SliceGeometry {
    /// Extract geometry from a parsed dataset. `None` when any required
    /// attribute is absent or malformed; such slices are simply not part
    /// of the geometry check.
    pub fn from_object(obj: &DefaultDicomObject) -> Option<Self> {
        let rows = obj.element(tags::ROWS).ok()?.to_int::<u16>().ok()?;
        let cols = obj.element(tags::COLUMNS).ok()?.to_int::<u16>().ok()?;
        let spacing = obj.element(tags::PIXEL_SPACING).ok()?.to_multi_float64().ok()?;
        let position = obj
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        let orientation = obj
            .element(tags::IMAGE_ORIENTATION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        if spacing.len() < 2 || position.len() < 3 || orientation.len() < 6 {
            return None;
        }
        let slice_thickness = obj
            .element(tags::SLICE_THICKNESS)
            .ok()
            .and_then(|e| e.to_float64().ok());
        Some(Self {
            rows,
            cols,
            pixel_spacing: [spacing[0], spacing[1]],
            position: [position[0], position[1], position[2]],
            orientation: [
                orientation[0],
                orientation[1],
                orientation[2],
                orientation[3],
                orientation[4],
                orientation[5],
            ],
            slice_thickness,
        })
    }

    /// Normal of the slice plane (row cosines × column cosines).
    fn normal(&self) -> [f64; 3] {
        let r = &self.orientation[0..3];
        let c = &self.orientation[3..6];
        [
            r[1] * c[2] - r[2] * c[1],
            r[2] * c[0] - r[0] * c[2],
            r[0] * c[1] - r[1] * c[0],
        ]
    }

    /// Signed distance of this slice along `normal`.
    fn offset_along(&self, normal: &[f64; 3]) -> f64 {
        self.position[0] * normal[0] + self.position[1] * normal[1] + self.position[2] * normal[2]
    }
}

/// Outcome of the per-series geometry check.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryCheck {
    Consistent,
    /// Fewer than two usable slices; no conclusion either way.
    InsufficientData,
    Inconsistent(Vec<String>),
}

impl GeometryCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryCheck::Consistent => "consistent",
            GeometryCheck::InsufficientData => "insufficient_data",
            GeometryCheck::Inconsistent(_) => "inconsistent",
        }
    }

    pub fn violations(&self) -> &[String] {
        match self {
            GeometryCheck::Inconsistent(v) => v,
            _ => &[],
        }
    }
}

/// Check one series' slices for internal consistency.
pub fn check_series(slices: &[SliceGeometry], cfg: &GeometryConfig) -> GeometryCheck {
    if slices.len() < 2 {
        return GeometryCheck::InsufficientData;
    }

    let mut violations = Vec::new();
    let first = &slices[0];

    if slices
        .iter()
        .any(|s| s.rows != first.rows || s.cols != first.cols)
    {
        violations.push(format!(
            "slice dimensions vary (first slice is {}x{})",
            first.rows, first.cols
        ));
    }

    if slices.iter().any(|s| {
        (s.pixel_spacing[0] - first.pixel_spacing[0]).abs() > cfg.spacing_tolerance
            || (s.pixel_spacing[1] - first.pixel_spacing[1]).abs() > cfg.spacing_tolerance
    }) {
        violations.push(format!(
            "pixel spacing varies beyond {} mm",
            cfg.spacing_tolerance
        ));
    }

    if slices.iter().any(|s| {
        s.orientation
            .iter()
            .zip(first.orientation.iter())
            .any(|(a, b)| (a - b).abs() > cfg.orientation_tolerance)
    }) {
        violations.push("image orientation varies across slices".to_string());
    }

    // Gap regularity only means something when the slices share a plane
    // orientation; skip it if that already failed.
    if violations.is_empty() {
        if let Some(v) = check_gaps(slices, cfg) {
            violations.push(v);
        }
    }

    if violations.is_empty() {
        GeometryCheck::Consistent
    } else {
        GeometryCheck::Inconsistent(violations)
    }
}

/// Sort slices along the shared normal and flag irregular inter-slice gaps.
/// Catches missing and duplicated slices that leave the file count intact.
fn check_gaps(slices: &[SliceGeometry], cfg: &GeometryConfig) -> Option<String> {
    let normal = slices[0].normal();
    let mut offsets: Vec<f64> = slices.iter().map(|s| s.offset_along(&normal)).collect();
    offsets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let gaps: Vec<f64> = offsets.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= f64::EPSILON {
        return Some("all slice positions coincide".to_string());
    }
    let worst = gaps
        .iter()
        .map(|g| (g - mean).abs() / mean)
        .fold(0.0f64, f64::max);
    if worst > cfg.gap_tolerance {
        return Some(format!(
            "inter-slice gap varies by {:.1}% (tolerance {:.1}%), missing or duplicated slices likely",
            worst * 100.0,
            cfg.gap_tolerance * 100.0
        ));
    }
    None
}
