//! Engine configuration (TOML).
//!
//! Every section is optional in the file; missing values take the documented
//! defaults. [`EngineConfig::validate`] repairs out-of-range values and
//! reports each repair as a [`Warning`] instead of failing the load.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, Warning, WarningKind};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Longest accepted sampling cadence (one day).
pub const MAX_CADENCE_SECONDS: u64 = 86_400;

/// Longest accepted story retention (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub sampling: SamplingConfig,
    pub stability: StabilityConfig,
    pub battery: BatteryConfig,
    pub duplicates: DuplicateConfig,
    pub story: StoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub sampling_cadence_seconds: u64,
    /// Sliding window length for rolling statistics.
    pub window_duration_seconds: u64,
    /// Per-process samples retained for stability scoring.
    pub history_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub runtime_weight: f64,
    pub stability_threshold: f64,
    pub min_samples: usize,
    /// CPU variance (percent squared) at which the CPU sub-score reaches 0.
    pub cpu_variance_ceiling: f64,
    /// Memory excursions beyond `mean + spike_k * stddev` count as spikes.
    pub spike_k: f64,
    /// Sub-score points lost per memory spike.
    pub spike_penalty: f64,
    pub runtime_variance_ceiling: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub min_distinct_dates: usize,
    pub forecast_horizon_days: u32,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub duplicate_scan_root: PathBuf,
    pub recursive: bool,
    pub chunk_size: usize,
    /// Hashing threads; 0 picks the available parallelism.
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    pub cpu_peak_threshold: f64,
    pub cpu_peak_penalty: f64,
    pub unstable_app_penalty: f64,
    pub unstable_app_penalty_cap: f64,
    pub storage_waste_budget_bytes: u64,
    pub storage_penalty: f64,
    pub top_k: usize,
    pub reports_dir: PathBuf,
    pub retention_days: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sampling_cadence_seconds: 5,
            window_duration_seconds: 600,
            history_len: 60,
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            cpu_weight: 0.5,
            memory_weight: 0.3,
            runtime_weight: 0.2,
            stability_threshold: 50.0,
            min_samples: 3,
            cpu_variance_ceiling: 400.0,
            spike_k: 2.0,
            spike_penalty: 20.0,
            runtime_variance_ceiling: 100.0,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            min_distinct_dates: 5,
            forecast_horizon_days: 180,
            log_path: data_dir().join("battery_health_log.json"),
        }
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            duplicate_scan_root: home_dir().join("Downloads"),
            recursive: true,
            chunk_size: 64 * 1024,
            workers: 0,
        }
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            cpu_peak_threshold: 90.0,
            cpu_peak_penalty: 20.0,
            unstable_app_penalty: 5.0,
            unstable_app_penalty_cap: 25.0,
            storage_waste_budget_bytes: 1024 * 1024 * 1024,
            storage_penalty: 20.0,
            top_k: 5,
            reports_dir: data_dir().join("reports"),
            retention_days: 30,
        }
    }
}

impl SamplingConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.sampling_cadence_seconds)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_duration_seconds)
    }
}

impl StabilityConfig {
    /// The three weights as `(cpu, memory, runtime)`.
    pub fn weights(&self) -> (f64, f64, f64) {
        (self.cpu_weight, self.memory_weight, self.runtime_weight)
    }

    /// Bring weights into `[0, 1]` summing to 1.
    ///
    /// Out-of-range or all-zero weights fall back to the defaults; weights
    /// with a non-unit sum are renormalized. Either repair yields a warning.
    pub fn normalize_weights(&mut self) -> Option<Warning> {
        let (c, m, r) = self.weights();
        let in_range = [c, m, r]
            .iter()
            .all(|w| w.is_finite() && (0.0..=1.0).contains(w));
        let sum = c + m + r;

        if !in_range || sum <= 0.0 {
            let defaults = StabilityConfig::default();
            self.cpu_weight = defaults.cpu_weight;
            self.memory_weight = defaults.memory_weight;
            self.runtime_weight = defaults.runtime_weight;
            return Some(Warning::new(
                WarningKind::ConfigInvalid,
                format!(
                    "stability weights ({c}, {m}, {r}) out of range; using defaults ({}, {}, {})",
                    defaults.cpu_weight, defaults.memory_weight, defaults.runtime_weight
                ),
            ));
        }

        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            self.cpu_weight = c / sum;
            self.memory_weight = m / sum;
            self.runtime_weight = r / sum;
            return Some(Warning::new(
                WarningKind::ConfigInvalid,
                format!("stability weights sum to {sum:.4}; renormalized to 1"),
            ));
        }
        None
    }
}

/// A loaded configuration plus the repairs applied to it.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: EngineConfig,
    pub warnings: Vec<Warning>,
}

impl EngineConfig {
    /// Parse TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<ConfigLoad> {
        let mut config: EngineConfig = toml::from_str(content)?;
        let warnings = config.validate();
        Ok(ConfigLoad { config, warnings })
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<ConfigLoad> {
        let content = fs::read_to_string(path)?;
        let loaded = Self::from_toml_str(&content)?;
        for w in &loaded.warnings {
            log::warn!("{}: {w}", path.display());
        }
        Ok(loaded)
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<ConfigLoad> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("no config at {}, using defaults", path.display());
            Ok(ConfigLoad {
                config: Self::default(),
                warnings: Vec::new(),
            })
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Repair invalid values in place, returning one warning per repair.
    pub fn validate(&mut self) -> Vec<Warning> {
        let mut warnings = Vec::new();
        let sampling_defaults = SamplingConfig::default();

        if self.sampling.sampling_cadence_seconds == 0 {
            self.sampling.sampling_cadence_seconds = sampling_defaults.sampling_cadence_seconds;
            warnings.push(invalid(format!(
                "sampling_cadence_seconds must be positive; using {}",
                sampling_defaults.sampling_cadence_seconds
            )));
        }
        if self.sampling.sampling_cadence_seconds > MAX_CADENCE_SECONDS {
            self.sampling.sampling_cadence_seconds = MAX_CADENCE_SECONDS;
            warnings.push(invalid(format!(
                "sampling_cadence_seconds capped at {MAX_CADENCE_SECONDS}"
            )));
        }
        if self.sampling.window_duration_seconds == 0 {
            self.sampling.window_duration_seconds = sampling_defaults.window_duration_seconds;
            warnings.push(invalid(format!(
                "window_duration_seconds must be positive; using {}",
                sampling_defaults.window_duration_seconds
            )));
        }
        if self.sampling.history_len == 0 {
            self.sampling.history_len = sampling_defaults.history_len;
            warnings.push(invalid(format!(
                "history_len must be positive; using {}",
                sampling_defaults.history_len
            )));
        }

        if let Some(w) = self.stability.normalize_weights() {
            warnings.push(w);
        }
        let stability_defaults = StabilityConfig::default();
        if !(0.0..=100.0).contains(&self.stability.stability_threshold) {
            self.stability.stability_threshold = stability_defaults.stability_threshold;
            warnings.push(invalid(format!(
                "stability_threshold must be within [0, 100]; using {}",
                stability_defaults.stability_threshold
            )));
        }
        if self.stability.min_samples == 0 {
            self.stability.min_samples = stability_defaults.min_samples;
            warnings.push(invalid(format!(
                "min_samples must be positive; using {}",
                stability_defaults.min_samples
            )));
        }
        if !(self.stability.cpu_variance_ceiling > 0.0) {
            self.stability.cpu_variance_ceiling = stability_defaults.cpu_variance_ceiling;
            warnings.push(invalid("cpu_variance_ceiling must be positive"));
        }
        if !(self.stability.runtime_variance_ceiling > 0.0) {
            self.stability.runtime_variance_ceiling = stability_defaults.runtime_variance_ceiling;
            warnings.push(invalid("runtime_variance_ceiling must be positive"));
        }

        if !(self.stability.spike_k.is_finite() && self.stability.spike_k >= 0.0) {
            self.stability.spike_k = stability_defaults.spike_k;
            warnings.push(invalid(format!(
                "spike_k must be a non-negative number; using {}",
                stability_defaults.spike_k
            )));
        }
        if !(self.stability.spike_penalty.is_finite() && self.stability.spike_penalty >= 0.0) {
            self.stability.spike_penalty = stability_defaults.spike_penalty;
            warnings.push(invalid(format!(
                "spike_penalty must be a non-negative number; using {}",
                stability_defaults.spike_penalty
            )));
        }

        if self.battery.min_distinct_dates < 2 {
            let fallback = BatteryConfig::default().min_distinct_dates;
            warnings.push(invalid(format!(
                "min_distinct_dates must be at least 2 to fit a line; using {fallback}"
            )));
            self.battery.min_distinct_dates = fallback;
        }

        if self.duplicates.chunk_size == 0 {
            self.duplicates.chunk_size = DuplicateConfig::default().chunk_size;
            warnings.push(invalid("chunk_size must be positive"));
        }

        if self.story.retention_days > MAX_RETENTION_DAYS {
            self.story.retention_days = MAX_RETENTION_DAYS;
            warnings.push(invalid(format!(
                "retention_days capped at {MAX_RETENTION_DAYS}"
            )));
        }

        if self.story.top_k == 0 {
            self.story.top_k = StoryConfig::default().top_k;
            warnings.push(invalid("top_k must be positive"));
        }

        warnings
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        config_dir()
            .map(|d| d.join("hostpulse").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("hostpulse.toml"))
    }
}

fn invalid(message: impl Into<String>) -> Warning {
    Warning::new(WarningKind::ConfigInvalid, message)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
}

fn data_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local").join("share"))
        .join("hostpulse")
}
