use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per series transfer (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// How the disk-space guard accounts for series whose size the manifest
/// does not declare (locator-only manifests carry no size hints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSizePolicy {
    /// Charge a fixed per-series allowance (`unknown_series_floor_mb`).
    #[default]
    FixedFloor,
    /// Charge the average declared size of the known tasks in the run;
    /// falls back to the fixed floor when no sizes are known at all.
    AverageOfKnown,
}

/// Disk-space guard parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Required headroom: refuse to start unless
    /// `free >= expected * safety_factor`.
    pub safety_factor: f64,
    /// Accounting policy for tasks with unknown expected size.
    #[serde(default)]
    pub unknown_size_policy: UnknownSizePolicy,
    /// Per-series allowance (MiB) used by the fixed-floor policy.
    pub unknown_series_floor_mb: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            safety_factor: 1.5,
            unknown_size_policy: UnknownSizePolicy::FixedFloor,
            unknown_series_floor_mb: 256,
        }
    }
}

/// Geometry consistency tolerances (optional section in config.toml).
/// Different modalities may warrant different values; these are the defaults
/// the validator applies when the section is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Absolute tolerance for pixel-spacing equality across slices (mm).
    pub spacing_tolerance: f64,
    /// Absolute tolerance for orientation-cosine equality across slices.
    pub orientation_tolerance: f64,
    /// Maximum relative variation of inter-slice gaps (1% default).
    pub gap_tolerance: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            spacing_tolerance: 1e-3,
            orientation_tolerance: 1e-3,
            gap_tolerance: 0.01,
        }
    }
}

/// Global configuration loaded from `~/.config/idcf/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdcfConfig {
    /// Number of series per batch; the checkpoint is the recovery boundary,
    /// so a crash loses at most one batch of progress beyond it.
    pub batch_size: usize,
    /// Cap on the projected bytes of a single batch (MiB); a batch closes
    /// early when adding the next task would exceed it.
    pub max_batch_mb: u64,
    /// Concurrent transfers within a batch.
    pub workers: usize,
    /// Minimum milliseconds between progress lines on the terminal.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Optional disk-space guard parameters.
    #[serde(default)]
    pub disk: Option<DiskConfig>,
    /// Optional geometry tolerances for the validator.
    #[serde(default)]
    pub geometry: Option<GeometryConfig>,
}

fn default_progress_interval_ms() -> u64 {
    500
}

impl Default for IdcfConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_batch_mb: 8192,
            workers: 4,
            progress_interval_ms: default_progress_interval_ms(),
            retry: None,
            disk: None,
            geometry: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("idcf")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<IdcfConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = IdcfConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: IdcfConfig = toml::from_str(&data)?;
    Ok(cfg)
}
