use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for nicetop.
///
/// The config file is optional; every field has an explicit default. The
/// shared log path lives here (not in a global) so components receive it by
/// injection and tests can point sinks elsewhere.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Shared log configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Sampling and TUI refresh configuration.
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Flood workload configuration.
    #[serde(default)]
    pub flood: FloodConfig,
}

/// Shared log configuration.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Well-known append-only log file all invocations write to.
    /// Default: `<tmpdir>/nicetop.log`.
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

/// Sampling and TUI refresh configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// TUI poll/render interval. Default: 200ms.
    #[serde(default = "default_tick", with = "humantime_serde")]
    pub tick: Duration,

    /// Per-target poll timeout within a tick; a target that misses it is
    /// rendered stale instead of stalling the other column. Must be shorter
    /// than `tick`. Default: 150ms.
    #[serde(default = "default_poll_budget", with = "humantime_serde")]
    pub poll_budget: Duration,
}

/// Flood workload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FloodConfig {
    /// Safety bound: at most this many workers per logical core. Requests
    /// above the bound are refused outright, never capped. Default: 2.
    #[serde(default = "default_max_threads_per_core")]
    pub max_threads_per_core: usize,

    /// How often the flood session samples its own workers into the shared
    /// log. Default: 500ms.
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,
}

// --- Default value functions ---

fn default_log_path() -> PathBuf {
    std::env::temp_dir().join("nicetop.log")
}

fn default_tick() -> Duration {
    Duration::from_millis(200)
}

fn default_poll_budget() -> Duration {
    Duration::from_millis(150)
}

fn default_max_threads_per_core() -> usize {
    2
}

fn default_monitor_interval() -> Duration {
    Duration::from_millis(500)
}

// --- Default trait impls ---

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            poll_budget: default_poll_budget(),
        }
    }
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_threads_per_core: default_max_threads_per_core(),
            monitor_interval: default_monitor_interval(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.log.path.as_os_str().is_empty() {
            bail!("log.path must not be empty");
        }

        if self.sampler.tick.is_zero() {
            bail!("sampler.tick must be positive");
        }

        if self.sampler.poll_budget.is_zero() {
            bail!("sampler.poll_budget must be positive");
        }

        if self.sampler.poll_budget >= self.sampler.tick {
            bail!(
                "sampler.poll_budget ({:?}) must be shorter than sampler.tick ({:?})",
                self.sampler.poll_budget,
                self.sampler.tick
            );
        }

        if self.flood.max_threads_per_core == 0 {
            bail!("flood.max_threads_per_core must be at least 1");
        }

        if self.flood.monitor_interval.is_zero() {
            bail!("flood.monitor_interval must be positive");
        }

        Ok(())
    }
}
