use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/sdm/config.toml`.
///
/// These are the defaults applied when a queue is created without explicit
/// settings; individual queues can override every one of them at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdmConfig {
    /// Maximum downloads a queue runs at once.
    pub max_concurrent: usize,
    /// Byte-range segments per download.
    pub threads_per_task: usize,
    /// Retries per segment (and per HEAD probe) before a task fails.
    pub max_retries: u32,
    /// Aggregate queue speed limit in bytes per second (0 = unlimited).
    pub speed_limit_bps: u64,
    /// Scheduler poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Receive buffer size per transfer, in bytes.
    pub buffer_size: usize,
}

impl Default for SdmConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            threads_per_task: 1,
            max_retries: 3,
            speed_limit_bps: 0,
            poll_interval_ms: 500,
            buffer_size: 64 * 1024,
        }
    }
}

impl SdmConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
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
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: SdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
