//! Disk-space guard: free space vs projected download size.
//!
//! Checked once before transfers start (abort before moving any bytes) and
//! re-checked between batches, since later tasks' actual sizes may exceed
//! their estimates. Tasks with unknown sizes are charged per the configured
//! policy rather than silently ignored.

use crate::config::{DiskConfig, UnknownSizePolicy};
use crate::manifest::SeriesTask;
use std::io;
use std::path::Path;

/// Free bytes on the filesystem containing `path` (statvfs).
#[cfg(unix)]
pub fn free_bytes(path: &Path) -> io::Result<u64> {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free-space probe not implemented on this platform",
    ))
}

/// Size estimate for a set of tasks under the configured unknown-size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    pub known_bytes: u64,
    pub known_tasks: usize,
    pub unknown_tasks: usize,
    /// Bytes charged for the unknown tasks.
    pub allowance_bytes: u64,
}

impl SizeEstimate {
    pub fn total_bytes(&self) -> u64 {
        self.known_bytes + self.allowance_bytes
    }
}

/// Guard over a destination filesystem. The free-space probe is injectable
/// so policy can be tested without a real filesystem.
pub struct DiskSpaceGuard {
    cfg: DiskConfig,
    probe: Box<dyn Fn(&Path) -> io::Result<u64> + Send + Sync>,
}

impl DiskSpaceGuard {
    pub fn new(cfg: DiskConfig) -> Self {
        Self {
            cfg,
            probe: Box::new(free_bytes),
        }
    }

    pub fn with_probe<F>(cfg: DiskConfig, probe: F) -> Self
    where
        F: Fn(&Path) -> io::Result<u64> + Send + Sync + 'static,
    {
        Self {
            cfg,
            probe: Box::new(probe),
        }
    }

    /// Project the bytes required by `tasks`, charging unknown-size tasks
    /// per the configured policy.
    pub fn estimate(&self, tasks: &[SeriesTask]) -> SizeEstimate {
        let known: Vec<u64> = tasks.iter().filter_map(|t| t.expected_size_bytes).collect();
        let known_bytes: u64 = known.iter().sum();
        let unknown_tasks = tasks.len() - known.len();

        let floor = self.cfg.unknown_series_floor_mb * 1024 * 1024;
        let per_unknown = match self.cfg.unknown_size_policy {
            UnknownSizePolicy::FixedFloor => floor,
            UnknownSizePolicy::AverageOfKnown => {
                if known.is_empty() {
                    floor
                } else {
                    known_bytes / known.len() as u64
                }
            }
        };

        SizeEstimate {
            known_bytes,
            known_tasks: known.len(),
            unknown_tasks,
            allowance_bytes: per_unknown * unknown_tasks as u64,
        }
    }

    /// True when the destination filesystem has enough headroom for
    /// `total_expected_bytes` under the configured safety factor.
    pub fn check(&self, total_expected_bytes: u64, destination_root: &Path) -> io::Result<bool> {
        let free = (self.probe)(destination_root)?;
        let required = (total_expected_bytes as f64 * self.cfg.safety_factor) as u64;
        tracing::debug!(
            free_bytes = free,
            required_bytes = required,
            safety_factor = self.cfg.safety_factor,
            "disk space check"
        );
        Ok(free >= required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task(id: &str, size: Option<u64>) -> SeriesTask {
        SeriesTask {
            series_id: id.to_string(),
            collection_id: "c".to_string(),
            expected_instance_count: None,
            expected_size_bytes: size,
            source_locator: format!("s3://b/{id}"),
            destination_path: PathBuf::from("/data/c").join(id),
        }
    }

    fn guard_with_free(cfg: DiskConfig, free: u64) -> DiskSpaceGuard {
        DiskSpaceGuard::with_probe(cfg, move |_| Ok(free))
    }

    #[test]
    fn refuses_when_headroom_insufficient() {
        // free = X, expected = Y, Y * 1.5 > X -> refuse.
        let guard = guard_with_free(DiskConfig::default(), 1_000_000);
        assert!(!guard.check(700_000, Path::new("/data")).unwrap());
        assert!(guard.check(600_000, Path::new("/data")).unwrap());
    }

    #[test]
    fn fixed_floor_charges_unknown_tasks() {
        let cfg = DiskConfig {
            unknown_series_floor_mb: 1,
            ..DiskConfig::default()
        };
        let guard = guard_with_free(cfg, 0);
        let tasks = vec![task("a", Some(100)), task("b", None), task("c", None)];
        let est = guard.estimate(&tasks);
        assert_eq!(est.known_bytes, 100);
        assert_eq!(est.unknown_tasks, 2);
        assert_eq!(est.allowance_bytes, 2 * 1024 * 1024);
        assert_eq!(est.total_bytes(), 100 + 2 * 1024 * 1024);
    }

    #[test]
    fn average_policy_uses_observed_mean() {
        let cfg = DiskConfig {
            unknown_size_policy: UnknownSizePolicy::AverageOfKnown,
            ..DiskConfig::default()
        };
        let guard = guard_with_free(cfg, 0);
        let tasks = vec![task("a", Some(100)), task("b", Some(300)), task("c", None)];
        let est = guard.estimate(&tasks);
        assert_eq!(est.allowance_bytes, 200);
    }

    #[test]
    fn average_policy_falls_back_to_floor() {
        let cfg = DiskConfig {
            unknown_size_policy: UnknownSizePolicy::AverageOfKnown,
            unknown_series_floor_mb: 2,
            ..DiskConfig::default()
        };
        let guard = guard_with_free(cfg, 0);
        let tasks = vec![task("a", None)];
        let est = guard.estimate(&tasks);
        assert_eq!(est.allowance_bytes, 2 * 1024 * 1024);
    }

    #[cfg(unix)]
    #[test]
    fn real_probe_reports_nonzero_free_space() {
        let dir = tempfile::tempdir().unwrap();
        let free = free_bytes(dir.path()).unwrap();
        assert!(free > 0);
    }
}
