//! Synthetic DICOM fixtures for validator tests.

use dicom_core::value::PrimitiveValue;
use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use std::fs;
use std::path::{Path, PathBuf};

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

/// Everything needed to emit one synthetic slice.
pub struct SliceSpec {
    pub series_uid: String,
    pub sop_uid: String,
    pub modality: String,
    pub rows: u16,
    pub cols: u16,
    pub pixel_spacing: [f64; 2],
    pub position: [f64; 3],
    pub orientation: [f64; 6],
    pub slice_thickness: f64,
}

/// A small axial CT slice at height `z`.
pub fn ct_slice(series_uid: &str, instance: u32, z: f64) -> SliceSpec {
    SliceSpec {
        series_uid: series_uid.to_string(),
        sop_uid: format!("{series_uid}.{instance}"),
        modality: "CT".to_string(),
        rows: 4,
        cols: 4,
        pixel_spacing: [0.7, 0.7],
        position: [0.0, 0.0, z],
        orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        slice_thickness: 1.0,
    }
}

/// Write a complete, parseable file for `spec` and return its path.
pub fn write_slice(dir: &Path, name: &str, spec: &SliceSpec) -> PathBuf {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(CT_IMAGE_STORAGE),
    ));
    obj.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(spec.sop_uid.as_str()),
    ));
    obj.put(DataElement::new(
        tags::SERIES_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(spec.series_uid.as_str()),
    ));
    obj.put(DataElement::new(
        tags::MODALITY,
        VR::CS,
        PrimitiveValue::from(spec.modality.as_str()),
    ));
    obj.put(DataElement::new(
        tags::ROWS,
        VR::US,
        PrimitiveValue::from(spec.rows),
    ));
    obj.put(DataElement::new(
        tags::COLUMNS,
        VR::US,
        PrimitiveValue::from(spec.cols),
    ));
    obj.put(DataElement::new(
        tags::BITS_ALLOCATED,
        VR::US,
        PrimitiveValue::from(16u16),
    ));
    obj.put(DataElement::new(
        tags::BITS_STORED,
        VR::US,
        PrimitiveValue::from(16u16),
    ));
    obj.put(DataElement::new(
        tags::HIGH_BIT,
        VR::US,
        PrimitiveValue::from(15u16),
    ));
    obj.put(DataElement::new(
        tags::PIXEL_REPRESENTATION,
        VR::US,
        PrimitiveValue::from(0u16),
    ));
    obj.put(DataElement::new(
        tags::SAMPLES_PER_PIXEL,
        VR::US,
        PrimitiveValue::from(1u16),
    ));
    obj.put(DataElement::new(
        tags::PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        PrimitiveValue::from("MONOCHROME2"),
    ));
    obj.put(DataElement::new(
        tags::PIXEL_SPACING,
        VR::DS,
        dicom_value!(
            Strs,
            [
                spec.pixel_spacing[0].to_string(),
                spec.pixel_spacing[1].to_string()
            ]
        ),
    ));
    obj.put(DataElement::new(
        tags::IMAGE_POSITION_PATIENT,
        VR::DS,
        dicom_value!(
            Strs,
            [
                spec.position[0].to_string(),
                spec.position[1].to_string(),
                spec.position[2].to_string()
            ]
        ),
    ));
    obj.put(DataElement::new(
        tags::IMAGE_ORIENTATION_PATIENT,
        VR::DS,
        dicom_value!(
            Strs,
            [
                spec.orientation[0].to_string(),
                spec.orientation[1].to_string(),
                spec.orientation[2].to_string(),
                spec.orientation[3].to_string(),
                spec.orientation[4].to_string(),
                spec.orientation[5].to_string()
            ]
        ),
    ));
    obj.put(DataElement::new(
        tags::SLICE_THICKNESS,
        VR::DS,
        PrimitiveValue::from(spec.slice_thickness.to_string()),
    ));
    let pixel_bytes = spec.rows as usize * spec.cols as usize * 2;
    obj.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::from(vec![0u8; pixel_bytes]),
    ));

    let file_obj = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(spec.sop_uid.as_str()),
        )
        .expect("build file meta");

    fs::create_dir_all(dir).expect("create fixture dir");
    let path = dir.join(name);
    file_obj.write_to_file(&path).expect("write fixture");
    path
}

/// Write a valid slice, then cut it short mid-dataset.
pub fn write_truncated_slice(dir: &Path, name: &str) -> PathBuf {
    let path = write_slice(dir, name, &ct_slice("1.9.9", 1, 0.0));
    let bytes = fs::read(&path).expect("read fixture");
    let keep = bytes.len() * 3 / 5;
    fs::write(&path, &bytes[..keep]).expect("truncate fixture");
    path
}

/// Write `n` slices of a regular 1mm CT stack under `dir`.
pub fn write_ct_stack(dir: &Path, series_uid: &str, n: u32) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            write_slice(
                dir,
                &format!("{:06}.dcm", i + 1),
                &ct_slice(series_uid, i + 1, i as f64),
            )
        })
        .collect()
}
