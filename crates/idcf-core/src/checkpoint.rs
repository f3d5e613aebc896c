//! Versioned run checkpoint: the last recorded outcome per task.
//!
//! The checkpoint is rewritten (atomically, via the `.part` rename) after
//! every recorded outcome, so a kill at any point loses at most the
//! in-flight tasks' progress. A resume skips only tasks recorded as
//! completed; failed and partial ones are re-attempted. It records a fingerprint of the task set; a
//! resume against a different manifest is detected and handled
//! conservatively by ignoring the checkpoint instead of guessing.

use crate::checksum::sha256_hex;
use crate::manifest::SeriesTask;
use crate::orchestrator::DownloadOutcome;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CHECKPOINT_FILE: &str = ".idcf-checkpoint.json";
const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    version: u32,
    manifest_fingerprint: String,
    updated_at: u64,
    pub outcomes: BTreeMap<String, DownloadOutcome>,
}

impl Checkpoint {
    pub fn path(destination_root: &Path) -> PathBuf {
        destination_root.join(CHECKPOINT_FILE)
    }

    /// Identity of a task set: digest over the sorted series ids. Order in
    /// the manifest does not matter, membership does.
    pub fn fingerprint(tasks: &[SeriesTask]) -> String {
        let mut ids: Vec<&str> = tasks.iter().map(|t| t.series_id.as_str()).collect();
        ids.sort_unstable();
        sha256_hex(ids.join("\n").as_bytes())
    }

    pub fn new(manifest_fingerprint: String) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            manifest_fingerprint,
            updated_at: unix_now(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Load the checkpoint under `destination_root` if it exists, parses,
    /// and matches `fingerprint`. Any mismatch (version, task set, or an
    /// unreadable file) is logged and treated as "no checkpoint".
    pub fn load_matching(destination_root: &Path, fingerprint: &str) -> Option<Checkpoint> {
        let path = Self::path(destination_root);
        let data = match fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("unreadable checkpoint {}: {}", path.display(), e);
                return None;
            }
        };
        let cp: Checkpoint = match serde_json::from_str(&data) {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!("corrupt checkpoint {}: {}", path.display(), e);
                return None;
            }
        };
        if cp.version != CHECKPOINT_VERSION {
            tracing::warn!(
                "checkpoint version {} != {}, starting fresh",
                cp.version,
                CHECKPOINT_VERSION
            );
            return None;
        }
        if cp.manifest_fingerprint != fingerprint {
            tracing::warn!("manifest changed since last run, ignoring checkpoint");
            return None;
        }
        Some(cp)
    }

    /// Record one task outcome. Call `save` afterwards to persist.
    pub fn record(&mut self, outcome: DownloadOutcome) {
        self.updated_at = unix_now();
        self.outcomes.insert(outcome.series_id.clone(), outcome);
    }

    /// Atomically rewrite the checkpoint file.
    pub fn save(&self, destination_root: &Path) -> Result<()> {
        let path = Self::path(destination_root);
        let tmp = crate::storage::temp_path(&path);
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename {}", path.display()))?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
