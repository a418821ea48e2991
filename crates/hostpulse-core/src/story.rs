//! Daily story composition and storage.
//!
//! The composer is a pure function of its inputs: the day's CPU/RAM/network
//! statistics, top apps, stability records, and storage pressure. The
//! narrative is a fixed template filled from the numeric fields.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::WindowStats;
use crate::config::StoryConfig;
use crate::duplicates::ScanReport;
use crate::error::{EngineError, Result};
use crate::session::format_iso8601;
use crate::stability::StabilityRecord;

/// Reclaimable bytes from the latest duplicate scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePressure {
    pub wasted_bytes: u64,
}

impl From<&ScanReport> for StoragePressure {
    fn from(report: &ScanReport) -> Self {
        Self {
            wasted_bytes: report.total_wasted_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopApp {
    pub name: String,
    /// Ticks in which this app was the top CPU consumer.
    pub active_ticks: u64,
}

/// Everything the composer needs for one day.
#[derive(Debug, Clone)]
pub struct StoryInputs {
    pub date: NaiveDate,
    pub cpu: WindowStats,
    pub ram: WindowStats,
    pub network: WindowStats,
    pub network_total_bytes: u64,
    pub top_apps: Vec<(String, u64)>,
    pub stability: Vec<StabilityRecord>,
    pub storage: StoragePressure,
}

/// How the health score was reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthPenalties {
    pub cpu_peak: f64,
    pub unstable_apps: f64,
    pub storage: f64,
}

impl HealthPenalties {
    pub fn total(&self) -> f64 {
        self.cpu_peak + self.unstable_apps + self.storage
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStory {
    pub date: NaiveDate,
    pub cpu_avg: f64,
    pub cpu_peak: f64,
    pub ram_avg: f64,
    pub ram_peak: f64,
    pub network_total_bytes: u64,
    /// Highest network rate seen, bytes/sec.
    pub network_peak_rate: f64,
    /// When CPU peaked, in unix milliseconds.
    pub busiest_timestamp_ms: Option<u64>,
    pub top_apps: Vec<TopApp>,
    pub unstable_apps: Vec<String>,
    pub storage_wasted_bytes: u64,
    pub penalties: HealthPenalties,
    pub health_score: f64,
    pub recommendation: String,
    pub narrative_text: String,
}

#[derive(Debug, Clone)]
pub struct DailyStoryComposer {
    config: StoryConfig,
}

impl DailyStoryComposer {
    pub fn new(config: &StoryConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn penalties(&self, inputs: &StoryInputs) -> HealthPenalties {
        let c = &self.config;
        let cpu_peak = if inputs.cpu.count > 0 && inputs.cpu.peak_value > c.cpu_peak_threshold {
            c.cpu_peak_penalty
        } else {
            0.0
        };
        let unstable = inputs.stability.iter().filter(|r| r.is_unstable()).count();
        let unstable_apps = (unstable as f64 * c.unstable_app_penalty).min(c.unstable_app_penalty_cap);
        let pressure = if c.storage_waste_budget_bytes == 0 {
            if inputs.storage.wasted_bytes > 0 { 1.0 } else { 0.0 }
        } else {
            (inputs.storage.wasted_bytes as f64 / c.storage_waste_budget_bytes as f64).min(1.0)
        };
        HealthPenalties {
            cpu_peak,
            unstable_apps,
            storage: c.storage_penalty * pressure,
        }
    }

    pub fn compose(&self, inputs: &StoryInputs) -> DailyStory {
        let penalties = self.penalties(inputs);
        let health_score = (100.0 - penalties.total()).max(0.0);
        let recommendation = recommendation(health_score).to_string();

        let mut unstable_apps: Vec<String> = inputs
            .stability
            .iter()
            .filter(|r| r.is_unstable())
            .map(|r| r.process.name.clone())
            .collect();
        unstable_apps.sort();
        unstable_apps.dedup();

        let top_apps: Vec<TopApp> = inputs
            .top_apps
            .iter()
            .take(self.config.top_k)
            .map(|(name, n)| TopApp {
                name: name.clone(),
                active_ticks: *n,
            })
            .collect();

        let mut story = DailyStory {
            date: inputs.date,
            cpu_avg: inputs.cpu.mean,
            cpu_peak: inputs.cpu.peak_value,
            ram_avg: inputs.ram.mean,
            ram_peak: inputs.ram.peak_value,
            network_total_bytes: inputs.network_total_bytes,
            network_peak_rate: inputs.network.peak_value,
            busiest_timestamp_ms: inputs.cpu.peak_timestamp_ms,
            top_apps,
            unstable_apps,
            storage_wasted_bytes: inputs.storage.wasted_bytes,
            penalties,
            health_score,
            recommendation,
            narrative_text: String::new(),
        };
        story.narrative_text = narrative(&story);
        story
    }
}

fn recommendation(score: f64) -> &'static str {
    if score > 80.0 {
        "Your system ran smoothly today."
    } else if score > 60.0 {
        "Overall performance was decent, but a cleanup may help."
    } else {
        "High load detected. Consider closing background apps and reclaiming duplicate files."
    }
}

fn narrative(story: &DailyStory) -> String {
    let busiest = story
        .busiest_timestamp_ms
        .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64))
        .map(format_iso8601)
        .unwrap_or_else(|| "-".to_string());

    let mut out = format!("Daily system story for {}\n\n", story.date);
    out.push_str(&format!(
        "CPU averaged {:.1}% and peaked at {:.1}% (busiest moment {busiest}).\n",
        story.cpu_avg, story.cpu_peak
    ));
    out.push_str(&format!(
        "Memory averaged {:.1}% and peaked at {:.1}%.\n",
        story.ram_avg, story.ram_peak
    ));
    out.push_str(&format!(
        "Network moved {:.2} MiB, busiest at {:.1} KiB/s.\n",
        story.network_total_bytes as f64 / (1024.0 * 1024.0),
        story.network_peak_rate / 1024.0
    ));

    if story.top_apps.is_empty() {
        out.push_str("No application activity was recorded.\n");
    } else {
        out.push_str("Top applications:\n");
        for app in &story.top_apps {
            out.push_str(&format!("  - {} ({} active checks)\n", app.name, app.active_ticks));
        }
    }
    if !story.unstable_apps.is_empty() {
        out.push_str(&format!("Unstable: {}.\n", story.unstable_apps.join(", ")));
    }
    if story.storage_wasted_bytes > 0 {
        out.push_str(&format!(
            "Duplicate files waste {:.2} MiB.\n",
            story.storage_wasted_bytes as f64 / (1024.0 * 1024.0)
        ));
    }
    out.push_str(&format!(
        "\nSystem health score: {:.0}/100. {}\n",
        story.health_score, story.recommendation
    ));
    out
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receiver of composed stories.
pub trait StorySink: Send + Sync {
    /// Store `story`. A second story for the same date is an error.
    fn emit(&self, story: &DailyStory) -> Result<()>;
}

/// Writes `story-YYYY-MM-DD.json` files into a directory.
#[derive(Debug, Clone)]
pub struct JsonStorySink {
    dir: PathBuf,
    retention_days: u32,
}

impl JsonStorySink {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    pub fn from_config(config: &StoryConfig) -> Self {
        Self::new(&config.reports_dir, config.retention_days)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("story-{}.json", date.format("%Y-%m-%d")))
    }

    pub fn load(&self, date: NaiveDate) -> Result<DailyStory> {
        let content = fs::read_to_string(self.path_for(date))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Delete stories dated more than `retention_days` before `today`.
    /// Returns the number of files removed.
    pub fn prune(&self, today: NaiveDate) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(self.retention_days))) else {
            return Ok(0);
        };
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(date) = story_date(&path) else {
                continue;
            };
            if date < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("cannot prune {}: {e}", path.display()),
                }
            }
        }
        if removed > 0 {
            log::info!("pruned {removed} stories older than {cutoff}");
        }
        Ok(removed)
    }
}

fn story_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix("story-")?.strip_suffix(".json")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

impl StorySink for JsonStorySink {
    fn emit(&self, story: &DailyStory) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(story.date);
        let exists = || EngineError::StoryExists {
            date: story.date.to_string(),
        };
        if path.exists() {
            return Err(exists());
        }

        let tmp = path.with_extension("json.tmp");
        let written = serde_json::to_vec_pretty(story)
            .map_err(EngineError::from)
            .and_then(|bytes| fs::write(&tmp, bytes).map_err(EngineError::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        // Linking fails if the target appeared meanwhile; a story is never replaced.
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        linked.map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => exists(),
            _ => EngineError::Io(e),
        })?;
        log::info!("daily story written to {}", path.display());

        if let Err(e) = self.prune(story.date) {
            log::warn!("story retention pruning in {} failed: {e}", self.dir.display());
        }
        Ok(())
    }
}
