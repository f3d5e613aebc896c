//! Manifest resolution: turn an input specification into download tasks.
//!
//! Inputs are a collection id, an explicit series-UID list, an index filter
//! query, or a manifest file (locator-per-line text, bare series ids per
//! line, or CSV with a SeriesInstanceUID column).
//! Output is an ordered list of `SeriesTask` with expected counts/sizes where
//! the index knows them. Identifiers that resolve to nothing are recorded as
//! unresolved and the run continues without them; only an unusable input
//! specification is fatal.

use crate::error::{InputError, ResolutionError};
use crate::index::{IndexQuery, SeriesIndex, SeriesRow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One series to download. Immutable after creation; identity is
/// `series_id`, unique within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesTask {
    pub series_id: String,
    pub collection_id: String,
    pub expected_instance_count: Option<u32>,
    pub expected_size_bytes: Option<u64>,
    pub source_locator: String,
    pub destination_path: PathBuf,
}

/// Input forms accepted by the resolver.
#[derive(Debug, Clone)]
pub enum InputSpec {
    Collection(String),
    SeriesUids(Vec<String>),
    /// Free-form filter expression answered by the attached index.
    Query(String),
    ManifestFile(PathBuf),
}

/// Resolver output: the tasks to run plus identifiers that matched nothing.
#[derive(Debug)]
pub struct ResolvedManifest {
    pub tasks: Vec<SeriesTask>,
    pub unresolved: Vec<ResolutionError>,
}

impl ResolvedManifest {
    /// Sum of the declared sizes of tasks that have one.
    pub fn known_expected_bytes(&self) -> u64 {
        self.tasks
            .iter()
            .filter_map(|t| t.expected_size_bytes)
            .sum()
    }

    /// Number of tasks with no declared size (locator-only manifests).
    pub fn unknown_size_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.expected_size_bytes.is_none())
            .count()
    }
}

/// Collection id used for locator-only manifest entries, which carry no
/// collection metadata.
const MANIFEST_COLLECTION: &str = "manifest";

pub struct ManifestResolver<'a> {
    index: Option<&'a dyn SeriesIndex>,
    destination_root: PathBuf,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(destination_root: impl Into<PathBuf>) -> Self {
        Self {
            index: None,
            destination_root: destination_root.into(),
        }
    }

    pub fn with_index(mut self, index: &'a dyn SeriesIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Resolve an input specification to tasks. Pure apart from reading the
    /// manifest file and one index query.
    pub fn resolve(&self, input: &InputSpec) -> Result<ResolvedManifest, InputError> {
        let resolved = match input {
            InputSpec::Collection(id) => self.resolve_collection(id)?,
            InputSpec::SeriesUids(uids) => self.resolve_uids(uids)?,
            InputSpec::Query(expr) => self.resolve_query(expr)?,
            InputSpec::ManifestFile(path) => self.resolve_manifest_file(path)?,
        };
        check_unique(&resolved.tasks)?;
        Ok(resolved)
    }

    fn resolve_collection(&self, id: &str) -> Result<ResolvedManifest, InputError> {
        let index = self.index.ok_or(InputError::IndexRequired)?;
        let rows = index.resolve(&IndexQuery::Collection(id.to_string()));
        if rows.is_empty() {
            return Ok(ResolvedManifest {
                tasks: Vec::new(),
                unresolved: vec![ResolutionError::EmptyCollection(id.to_string())],
            });
        }
        Ok(self.tasks_from_rows(rows, None))
    }

    fn resolve_uids(&self, uids: &[String]) -> Result<ResolvedManifest, InputError> {
        let index = self.index.ok_or(InputError::IndexRequired)?;
        let rows = index.resolve(&IndexQuery::Series(uids.to_vec()));
        let found: HashSet<String> = rows.iter().map(|r| r.series_id.clone()).collect();
        let mut resolved = self.tasks_from_rows(rows, None);
        for uid in uids {
            if !found.contains(uid.as_str()) {
                resolved
                    .unresolved
                    .push(ResolutionError::UnknownSeries(uid.clone()));
            }
        }
        Ok(resolved)
    }

    fn resolve_query(&self, expr: &str) -> Result<ResolvedManifest, InputError> {
        let index = self.index.ok_or(InputError::IndexRequired)?;
        let rows = index.resolve(&IndexQuery::Filter(expr.to_string()));
        if rows.is_empty() {
            return Ok(ResolvedManifest {
                tasks: Vec::new(),
                unresolved: vec![ResolutionError::EmptyQuery(expr.to_string())],
            });
        }
        Ok(self.tasks_from_rows(rows, None))
    }

    fn resolve_manifest_file(&self, path: &Path) -> Result<ResolvedManifest, InputError> {
        let data = fs::read_to_string(path).map_err(|source| InputError::ManifestUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let first_data_line = data
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'));
        let Some(first) = first_data_line else {
            return Err(InputError::EmptyManifest(path.to_path_buf()));
        };

        if is_locator(first) {
            return self.resolve_locator_lines(&data);
        }
        if looks_tabular(first) {
            return self.resolve_tabular(path);
        }
        if is_bare_id(first) {
            // One series id per line, e.g. a failed_series.txt from an
            // earlier run. Locators come from the index.
            let uids: Vec<String> = data
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect();
            return self.resolve_uids(&uids);
        }
        Err(InputError::UnrecognizedManifest(path.to_path_buf()))
    }

    /// Plain-text manifest: one object-store locator per line, `#` comments
    /// ignored. No size hints; the disk guard falls back to its
    /// unknown-size policy for these tasks.
    fn resolve_locator_lines(&self, data: &str) -> Result<ResolvedManifest, InputError> {
        let mut tasks = Vec::new();
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let series_id = locator_stem(line);
            tasks.push(SeriesTask {
                destination_path: self
                    .destination_root
                    .join(MANIFEST_COLLECTION)
                    .join(&series_id),
                series_id,
                collection_id: MANIFEST_COLLECTION.to_string(),
                expected_instance_count: None,
                expected_size_bytes: None,
                source_locator: line.to_string(),
            });
        }
        Ok(ResolvedManifest {
            tasks,
            unresolved: Vec::new(),
        })
    }

    /// Tabular manifest: CSV with at least a SeriesInstanceUID column.
    /// Rows without a locator are looked up in the index when one is
    /// attached; otherwise they are reported as unresolved.
    fn resolve_tabular(&self, path: &Path) -> Result<ResolvedManifest, InputError> {
        let local = crate::index::CsvIndex::open(path)?;
        if local.is_empty() {
            return Err(InputError::EmptyManifest(path.to_path_buf()));
        }
        // Re-read every row through the index trait to keep one row shape.
        let all_uids: Vec<String> = {
            let mut rdr = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_path(path)
                .map_err(InputError::IndexUnreadable)?;
            let headers = rdr.headers().map_err(InputError::IndexUnreadable)?.clone();
            let col = headers
                .iter()
                .position(|h| {
                    h.eq_ignore_ascii_case("SeriesInstanceUID") || h.eq_ignore_ascii_case("series_id")
                })
                .ok_or(InputError::IndexMissingColumn("SeriesInstanceUID"))?;
            rdr.records()
                .filter_map(|r| r.ok())
                .filter_map(|r| r.get(col).map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect()
        };
        let rows = local.resolve(&IndexQuery::Series(all_uids));
        Ok(self.tasks_from_rows(rows, self.index))
    }

    fn tasks_from_rows(
        &self,
        rows: Vec<SeriesRow>,
        fallback: Option<&dyn SeriesIndex>,
    ) -> ResolvedManifest {
        let mut tasks = Vec::new();
        let mut unresolved = Vec::new();
        for mut row in rows {
            if row.locator.is_none() {
                if let Some(index) = fallback {
                    if let Some(full) = index
                        .resolve(&IndexQuery::Series(vec![row.series_id.clone()]))
                        .into_iter()
                        .next()
                    {
                        // Prefer the manifest's declared expectations, fill
                        // the rest from the index.
                        row.locator = full.locator;
                        row.instance_count = row.instance_count.or(full.instance_count);
                        row.size_bytes = row.size_bytes.or(full.size_bytes);
                        if row.collection_id == "unknown" {
                            row.collection_id = full.collection_id;
                        }
                        row.modality = row.modality.or(full.modality);
                    }
                }
            }
            let Some(locator) = row.locator else {
                unresolved.push(ResolutionError::MissingLocator(row.series_id));
                continue;
            };
            tasks.push(SeriesTask {
                destination_path: self
                    .destination_root
                    .join(&row.collection_id)
                    .join(&row.series_id),
                series_id: row.series_id,
                collection_id: row.collection_id,
                expected_instance_count: row.instance_count,
                expected_size_bytes: row.size_bytes,
                source_locator: locator,
            });
        }
        ResolvedManifest { tasks, unresolved }
    }
}

fn check_unique(tasks: &[SeriesTask]) -> Result<(), InputError> {
    let mut seen = HashSet::new();
    for t in tasks {
        if !seen.insert(t.series_id.as_str()) {
            return Err(InputError::DuplicateSeries(t.series_id.clone()));
        }
    }
    Ok(())
}

fn is_locator(line: &str) -> bool {
    ["s3://", "gs://", "http://", "https://"]
        .iter()
        .any(|p| line.starts_with(p))
}

fn is_bare_id(line: &str) -> bool {
    !line.is_empty() && !line.contains(',') && !line.contains(char::is_whitespace)
}

fn looks_tabular(header: &str) -> bool {
    header
        .split(',')
        .any(|c| c.trim().eq_ignore_ascii_case("SeriesInstanceUID")
            || c.trim().eq_ignore_ascii_case("series_id"))
}

/// Derive a task id from a locator's trailing path segment, without its
/// extension and any trailing wildcard.
fn locator_stem(locator: &str) -> String {
    let no_query = locator.split(['?', '#']).next().unwrap_or(locator);
    let trimmed = no_query.trim_end_matches(['/', '*']);
    let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
    // Strip archive extensions only; dotted series UIDs stay intact.
    let stem = match tail.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && ext.len() <= 4
                && ext.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => tail,
    };
    stem.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CsvIndex;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    const INDEX: &str = "\
SeriesInstanceUID,collection_id,Modality,instanceCount,series_size_MB,series_aws_url
1.2.3.1,nlst,CT,100,50.0,s3://bucket/nlst/1.2.3.1/*
1.2.3.2,nlst,MR,80,40.0,s3://bucket/nlst/1.2.3.2/*
";

    #[test]
    fn collection_resolves_to_tasks() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::Collection("nlst".into()))
            .unwrap();
        assert_eq!(resolved.tasks.len(), 2);
        assert!(resolved.unresolved.is_empty());
        let t = &resolved.tasks[0];
        assert_eq!(t.collection_id, "nlst");
        assert_eq!(t.expected_instance_count, Some(100));
        assert_eq!(t.destination_path, PathBuf::from("/data/nlst/1.2.3.1"));
    }

    #[test]
    fn unknown_collection_is_recoverable() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::Collection("nope".into()))
            .unwrap();
        assert!(resolved.tasks.is_empty());
        assert_eq!(resolved.unresolved.len(), 1);
    }

    #[test]
    fn unknown_uid_reported_but_run_continues() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::SeriesUids(vec![
                "1.2.3.1".into(),
                "no.such".into(),
            ]))
            .unwrap();
        assert_eq!(resolved.tasks.len(), 1);
        assert_eq!(resolved.unresolved.len(), 1);
    }

    #[test]
    fn query_resolves_through_index() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::Query("collection_id=nlst Modality=CT".into()))
            .unwrap();
        assert_eq!(resolved.tasks.len(), 1);
        assert_eq!(resolved.tasks[0].series_id, "1.2.3.1");
    }

    #[test]
    fn empty_query_is_recoverable() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::Query("Modality=US".into()))
            .unwrap();
        assert!(resolved.tasks.is_empty());
        assert!(matches!(
            resolved.unresolved[0],
            ResolutionError::EmptyQuery(_)
        ));
    }

    #[test]
    fn collection_without_index_is_input_error() {
        let resolver = ManifestResolver::new("/data");
        match resolver.resolve(&InputSpec::Collection("nlst".into())) {
            Err(InputError::IndexRequired) => {}
            other => panic!("expected IndexRequired, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn locator_manifest_has_no_size_hints() {
        let manifest = write_file(
            "# comment\ns3://bucket/a/series-one.zip\n\nhttps://store.example/series-two/\n",
        );
        let resolver = ManifestResolver::new("/data");
        let resolved = resolver
            .resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf()))
            .unwrap();
        assert_eq!(resolved.tasks.len(), 2);
        assert_eq!(resolved.tasks[0].series_id, "series-one");
        assert_eq!(resolved.tasks[1].series_id, "series-two");
        assert!(resolved.tasks.iter().all(|t| t.expected_size_bytes.is_none()));
        assert_eq!(resolved.unknown_size_count(), 2);
        assert_eq!(resolved.known_expected_bytes(), 0);
    }

    #[test]
    fn tabular_manifest_enriched_from_index() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        let manifest = write_file("SeriesInstanceUID\n1.2.3.2\n");
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf()))
            .unwrap();
        assert_eq!(resolved.tasks.len(), 1);
        let t = &resolved.tasks[0];
        assert_eq!(t.expected_instance_count, Some(80));
        assert_eq!(t.source_locator, "s3://bucket/nlst/1.2.3.2/*");
        assert_eq!(t.collection_id, "nlst");
    }

    #[test]
    fn tabular_manifest_without_locator_or_index_unresolved() {
        let manifest = write_file("SeriesInstanceUID,instanceCount\n1.9.9,7\n");
        let resolver = ManifestResolver::new("/data");
        let resolved = resolver
            .resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf()))
            .unwrap();
        assert!(resolved.tasks.is_empty());
        assert!(matches!(
            resolved.unresolved[0],
            ResolutionError::MissingLocator(_)
        ));
    }

    #[test]
    fn bare_id_manifest_resolved_through_index() {
        let idx_file = write_file(INDEX);
        let idx = CsvIndex::open(idx_file.path()).unwrap();
        // The shape of a failed_series.txt from an earlier run.
        let manifest = write_file("# retry these\n1.2.3.2\n1.2.3.1\nno.such\n");
        let resolver = ManifestResolver::new("/data").with_index(&idx);
        let resolved = resolver
            .resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf()))
            .unwrap();
        assert_eq!(resolved.tasks.len(), 2);
        assert!(resolved
            .tasks
            .iter()
            .all(|t| t.source_locator.starts_with("s3://")));
        assert!(matches!(
            resolved.unresolved[0],
            ResolutionError::UnknownSeries(_)
        ));
    }

    #[test]
    fn bare_id_manifest_requires_index() {
        let manifest = write_file("1.2.3.2\n");
        let resolver = ManifestResolver::new("/data");
        match resolver.resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf())) {
            Err(InputError::IndexRequired) => {}
            other => panic!("expected IndexRequired, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_manifest_rejected() {
        let manifest = write_file("# only comments\n");
        let resolver = ManifestResolver::new("/data");
        match resolver.resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf())) {
            Err(InputError::EmptyManifest(_)) => {}
            other => panic!("expected EmptyManifest, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn duplicate_series_rejected() {
        let manifest = write_file("s3://b/x/same.zip\ns3://b/y/same.zip\n");
        let resolver = ManifestResolver::new("/data");
        match resolver.resolve(&InputSpec::ManifestFile(manifest.path().to_path_buf())) {
            Err(InputError::DuplicateSeries(id)) => assert_eq!(id, "same"),
            other => panic!("expected DuplicateSeries, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn locator_stem_variants() {
        assert_eq!(locator_stem("s3://b/k/1.2.3.zip"), "1.2.3");
        assert_eq!(locator_stem("s3://b/k/series/*"), "series");
        assert_eq!(locator_stem("https://h/p/series-x?sig=abc"), "series-x");
        assert_eq!(locator_stem("s3://b/nlst/1.2.840.4711/*"), "1.2.840.4711");
    }
}
