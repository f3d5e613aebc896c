//! Series index boundary: the external metadata-query capability.
//!
//! The core resolves collections and series identifiers against this trait
//! and does not know how the rows are produced. The provided `CsvIndex`
//! reads a materialized query result (CSV) so the CLI works against an
//! index snapshot; a remote query service would implement the same trait.

use crate::error::InputError;
use std::collections::HashMap;
use std::path::Path;

/// One row of the series index: everything the downloader and validator
/// need to know about a series before any bytes move.
#[derive(Debug, Clone)]
pub struct SeriesRow {
    pub series_id: String,
    pub collection_id: String,
    pub patient_id: Option<String>,
    pub modality: Option<String>,
    pub instance_count: Option<u32>,
    pub size_bytes: Option<u64>,
    /// Object-store locator for the series payload. Tasks without one
    /// cannot be downloaded and are reported as unresolved.
    pub locator: Option<String>,
}

/// Query forms understood by the index.
#[derive(Debug, Clone)]
pub enum IndexQuery {
    /// All series of one collection.
    Collection(String),
    /// An explicit list of series identifiers.
    Series(Vec<String>),
    /// Free-form filter expression passed through to the backing store.
    /// `CsvIndex` accepts whitespace-separated `field=value` clauses
    /// (all must match); a remote index may support richer syntax.
    Filter(String),
}

/// Metadata query capability. Implementations answer from whatever backing
/// store they have; an empty result is a resolution miss, not an error.
pub trait SeriesIndex: Send + Sync {
    fn resolve(&self, query: &IndexQuery) -> Vec<SeriesRow>;
}

/// In-memory index loaded from a CSV snapshot.
///
/// Recognized columns (first match wins, case-insensitive):
/// series id: `SeriesInstanceUID` | `series_id`; collection: `collection_id`;
/// patient: `PatientID`; modality: `Modality`; count: `instanceCount` |
/// `instance_count`; size: `series_size_MB` | `size_bytes`;
/// locator: `series_aws_url` | `locator`.
pub struct CsvIndex {
    rows: Vec<SeriesRow>,
    by_series: HashMap<String, usize>,
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        candidates
            .iter()
            .any(|c| h.trim().eq_ignore_ascii_case(c))
    })
}

fn field(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    let v = record.get(idx?)?.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

impl CsvIndex {
    pub fn open(path: &Path) -> Result<Self, InputError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(InputError::IndexUnreadable)?;
        let headers = reader
            .headers()
            .map_err(InputError::IndexUnreadable)?
            .clone();

        let series_col = find_column(&headers, &["SeriesInstanceUID", "series_id"])
            .ok_or(InputError::IndexMissingColumn("SeriesInstanceUID"))?;
        let collection_col = find_column(&headers, &["collection_id"]);
        let patient_col = find_column(&headers, &["PatientID", "patient_id"]);
        let modality_col = find_column(&headers, &["Modality"]);
        let count_col = find_column(&headers, &["instanceCount", "instance_count"]);
        let size_mb_col = find_column(&headers, &["series_size_MB"]);
        let size_bytes_col = find_column(&headers, &["size_bytes"]);
        let locator_col = find_column(&headers, &["series_aws_url", "locator"]);

        let mut rows = Vec::new();
        let mut by_series = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(InputError::IndexUnreadable)?;
            let Some(series_id) = field(&record, Some(series_col)) else {
                continue;
            };
            let size_bytes = match field(&record, size_bytes_col) {
                Some(v) => v.parse::<u64>().ok(),
                None => field(&record, size_mb_col)
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(|mb| (mb * 1024.0 * 1024.0) as u64),
            };
            let row = SeriesRow {
                collection_id: field(&record, collection_col)
                    .unwrap_or_else(|| "unknown".to_string()),
                patient_id: field(&record, patient_col),
                modality: field(&record, modality_col),
                instance_count: field(&record, count_col).and_then(|v| v.parse().ok()),
                size_bytes,
                locator: field(&record, locator_col),
                series_id: series_id.clone(),
            };
            by_series.insert(series_id, rows.len());
            rows.push(row);
        }

        Ok(Self { rows, by_series })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl SeriesIndex for CsvIndex {
    fn resolve(&self, query: &IndexQuery) -> Vec<SeriesRow> {
        match query {
            IndexQuery::Collection(id) => self
                .rows
                .iter()
                .filter(|r| r.collection_id == *id)
                .cloned()
                .collect(),
            IndexQuery::Series(uids) => uids
                .iter()
                .filter_map(|uid| self.by_series.get(uid).map(|&i| self.rows[i].clone()))
                .collect(),
            IndexQuery::Filter(expr) => {
                let clauses: Vec<(String, String)> = expr
                    .split_whitespace()
                    .filter_map(|c| c.split_once('='))
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect();
                if clauses.is_empty() {
                    return Vec::new();
                }
                self.rows
                    .iter()
                    .filter(|r| clauses.iter().all(|(k, v)| row_matches(r, k, v)))
                    .cloned()
                    .collect()
            }
        }
    }
}

/// One `field=value` clause against a row. Unknown fields match nothing,
/// so a typo yields an empty result rather than the whole index.
fn row_matches(row: &SeriesRow, key: &str, value: &str) -> bool {
    match key {
        "collection_id" | "collection" => row.collection_id == value,
        "patientid" | "patient_id" | "patient" => row.patient_id.as_deref() == Some(value),
        "modality" => row
            .modality
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(value))
            .unwrap_or(false),
        "seriesinstanceuid" | "series_id" => row.series_id == value,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_index(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    const SAMPLE: &str = "\
SeriesInstanceUID,collection_id,PatientID,Modality,instanceCount,series_size_MB,series_aws_url
1.2.3.1,nlst,P1,CT,100,50.0,s3://bucket/nlst/1.2.3.1/*
1.2.3.2,nlst,P2,MR,80,40.5,s3://bucket/nlst/1.2.3.2/*
1.2.4.1,rider_pilot,P3,CT,120,60.0,s3://bucket/rider/1.2.4.1/*
";

    #[test]
    fn resolves_collection() {
        let f = write_index(SAMPLE);
        let idx = CsvIndex::open(f.path()).unwrap();
        let rows = idx.resolve(&IndexQuery::Collection("nlst".into()));
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.collection_id == "nlst"));
    }

    #[test]
    fn resolves_series_list_preserving_hits() {
        let f = write_index(SAMPLE);
        let idx = CsvIndex::open(f.path()).unwrap();
        let rows = idx.resolve(&IndexQuery::Series(vec![
            "1.2.4.1".into(),
            "no.such.uid".into(),
        ]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].series_id, "1.2.4.1");
        assert_eq!(rows[0].instance_count, Some(120));
    }

    #[test]
    fn size_mb_converted_to_bytes() {
        let f = write_index(SAMPLE);
        let idx = CsvIndex::open(f.path()).unwrap();
        let rows = idx.resolve(&IndexQuery::Series(vec!["1.2.3.1".into()]));
        assert_eq!(rows[0].size_bytes, Some(50 * 1024 * 1024));
    }

    #[test]
    fn filter_query_requires_all_clauses() {
        let f = write_index(SAMPLE);
        let idx = CsvIndex::open(f.path()).unwrap();
        let rows = idx.resolve(&IndexQuery::Filter("collection_id=nlst Modality=CT".into()));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].series_id, "1.2.3.1");
        let rows = idx.resolve(&IndexQuery::Filter("PatientID=P3".into()));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].collection_id, "rider_pilot");
    }

    #[test]
    fn filter_query_unknown_field_matches_nothing() {
        let f = write_index(SAMPLE);
        let idx = CsvIndex::open(f.path()).unwrap();
        assert!(idx.resolve(&IndexQuery::Filter("bogus=1".into())).is_empty());
        assert!(idx.resolve(&IndexQuery::Filter("not a clause".into())).is_empty());
    }

    #[test]
    fn missing_series_column_rejected() {
        let f = write_index("foo,bar\n1,2\n");
        match CsvIndex::open(f.path()) {
            Err(InputError::IndexMissingColumn(_)) => {}
            other => panic!("expected missing-column error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn alternate_column_names_accepted() {
        let f = write_index("series_id,instance_count,size_bytes,locator\nA,5,1000,s3://b/a\n");
        let idx = CsvIndex::open(f.path()).unwrap();
        let rows = idx.resolve(&IndexQuery::Series(vec!["A".into()]));
        assert_eq!(rows[0].instance_count, Some(5));
        assert_eq!(rows[0].size_bytes, Some(1000));
        assert_eq!(rows[0].locator.as_deref(), Some("s3://b/a"));
    }
}
