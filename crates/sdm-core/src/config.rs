//! Engine configuration: a validated option record with defaults
//! materialized at load time, read from `~/.config/sdm/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::downloader::CoordinatorConfig;
use crate::retry::{DownloadError, ErrorKind, JitterMode, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdmConfig {
    /// Cap on segments per download (1-16).
    pub max_connections: usize,
    /// Minimum size to consider multi-mode.
    pub multi_connection_threshold_bytes: u64,
    /// Lower bound on one segment.
    pub min_segment_size_bytes: u64,
    /// Per-read transfer granularity.
    pub chunk_size_bytes: usize,

    pub enable_bandwidth_limiting: bool,
    /// Global token refill rate; 0 means unlimited.
    pub global_bandwidth_limit_bps: u64,
    /// Per-task refill rate override; 0 means unlimited.
    pub per_task_bandwidth_limit_bps: u64,

    /// Global concurrency governor.
    pub max_active_downloads: usize,
    pub per_host_enabled: bool,
    pub per_host_max_active: usize,

    pub retry_enabled: bool,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_s: f64,
    pub retry_backoff_max_s: f64,
    pub retry_jitter_mode: JitterMode,

    pub priority_aging_enabled: bool,
    pub priority_aging_step: u8,
    pub priority_aging_interval_s: f64,

    pub persist_queue: bool,
    pub queue_state_path: PathBuf,
    pub history_path: PathBuf,

    /// Minimum spacing of per-task progress events.
    pub progress_throttle_ms: u64,
    /// Remove multi-mode partials and the resume record on cancel.
    pub cleanup_on_cancel: bool,
}

impl Default for SdmConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            multi_connection_threshold_bytes: 8 * 1024 * 1024,
            min_segment_size_bytes: 1024 * 1024,
            chunk_size_bytes: 64 * 1024,
            enable_bandwidth_limiting: false,
            global_bandwidth_limit_bps: 0,
            per_task_bandwidth_limit_bps: 0,
            max_active_downloads: 2,
            per_host_enabled: false,
            per_host_max_active: 2,
            retry_enabled: false,
            retry_max_attempts: 3,
            retry_backoff_base_s: 2.0,
            retry_backoff_max_s: 300.0,
            retry_jitter_mode: JitterMode::Proportional,
            priority_aging_enabled: false,
            priority_aging_step: 1,
            priority_aging_interval_s: 60.0,
            persist_queue: false,
            queue_state_path: PathBuf::from("data/queue_state.json"),
            history_path: PathBuf::from("data/history.jsonl"),
            progress_throttle_ms: 250,
            cleanup_on_cancel: false,
        }
    }
}

impl SdmConfig {
    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), DownloadError> {
        let invalid = |msg: String| DownloadError::new(ErrorKind::Validation, msg);
        if !(1..=16).contains(&self.max_connections) {
            return Err(invalid(format!(
                "max_connections {} outside 1-16",
                self.max_connections
            )));
        }
        if self.min_segment_size_bytes == 0 {
            return Err(invalid("min_segment_size_bytes must be positive".into()));
        }
        if self.chunk_size_bytes == 0 {
            return Err(invalid("chunk_size_bytes must be positive".into()));
        }
        if self.max_active_downloads == 0 {
            return Err(invalid("max_active_downloads must be positive".into()));
        }
        if self.per_host_enabled && self.per_host_max_active == 0 {
            return Err(invalid("per_host_max_active must be positive".into()));
        }
        if self.retry_enabled && self.retry_max_attempts == 0 {
            return Err(invalid("retry_max_attempts must be positive".into()));
        }
        if self.retry_backoff_base_s <= 0.0 || self.retry_backoff_max_s <= 0.0 {
            return Err(invalid("retry backoff bounds must be positive".into()));
        }
        if self.priority_aging_enabled && self.priority_aging_interval_s <= 0.0 {
            return Err(invalid("priority_aging_interval_s must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_secs_f64(self.retry_backoff_base_s),
            max_delay: Duration::from_secs_f64(self.retry_backoff_max_s),
            jitter: self.retry_jitter_mode,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_connections: self.max_connections,
            multi_connection_threshold_bytes: self.multi_connection_threshold_bytes,
            min_segment_size_bytes: self.min_segment_size_bytes,
            chunk_size_bytes: self.chunk_size_bytes,
            cleanup_on_cancel: self.cleanup_on_cancel,
            progress_interval: Duration::from_millis(self.progress_throttle_ms.max(1)),
        }
    }

    pub fn progress_throttle(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<SdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = SdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = std::fs::read_to_string(&path)?;
    let cfg: SdmConfig = toml::from_str(&data)?;
    cfg.validate().map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(cfg)
}
