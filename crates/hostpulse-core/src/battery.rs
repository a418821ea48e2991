//! Battery wear log and trend forecast.
//!
//! Wear is `100 * (1 - full_charge_capacity / design_capacity)`. The trend is
//! an ordinary least-squares line of wear against days since the first
//! reading. Wear cannot physically decrease, so a negative fitted slope is
//! floored at zero for the forecast and only reported in the diagnostic note.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::BatteryConfig;
use crate::error::{Result, Warning, WarningKind};
use crate::source::BatteryStatus;

/// One daily battery health reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub date: NaiveDate,
    pub design_capacity: u64,
    pub full_charge_capacity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_count: Option<u32>,
}

impl BatteryReading {
    pub fn new(date: NaiveDate, design_capacity: u64, full_charge_capacity: u64) -> Self {
        Self {
            date,
            design_capacity,
            full_charge_capacity,
            cycle_count: None,
        }
    }

    pub fn from_status(date: NaiveDate, status: &BatteryStatus) -> Self {
        Self {
            date,
            design_capacity: status.design_capacity,
            full_charge_capacity: status.full_charge_capacity,
            cycle_count: status.cycle_count,
        }
    }

    /// Wear percentage, `None` when the design capacity is zero.
    pub fn wear_pct(&self) -> Option<f64> {
        if self.design_capacity == 0 {
            return None;
        }
        Some(100.0 * (1.0 - self.full_charge_capacity as f64 / self.design_capacity as f64))
    }
}

/// Insert `reading`, replacing any reading with the same date, keeping the
/// series sorted by date.
pub fn upsert_reading(readings: &mut Vec<BatteryReading>, reading: BatteryReading) {
    match readings.iter_mut().find(|r| r.date == reading.date) {
        Some(existing) => *existing = reading,
        None => readings.push(reading),
    }
    readings.sort_by_key(|r| r.date);
}

// ---------------------------------------------------------------------------
// Log stores
// ---------------------------------------------------------------------------

/// Append/overwrite-by-date store of battery readings.
pub trait BatteryLog: Send + Sync {
    /// Full history, ascending by date.
    fn load(&self) -> Result<Vec<BatteryReading>>;

    /// Insert or replace the reading for its date.
    fn upsert(&self, reading: BatteryReading) -> Result<()>;
}

/// JSON array file, rewritten atomically on every upsert.
#[derive(Debug, Clone)]
pub struct JsonBatteryLog {
    path: PathBuf,
}

impl JsonBatteryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, readings: &[BatteryReading]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(readings)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl BatteryLog for JsonBatteryLog {
    fn load(&self) -> Result<Vec<BatteryReading>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut readings: Vec<BatteryReading> = serde_json::from_str(&content)?;
        readings.sort_by_key(|r| r.date);
        Ok(readings)
    }

    fn upsert(&self, reading: BatteryReading) -> Result<()> {
        let mut readings = self.load()?;
        log::info!(
            "battery log {}: upsert {} ({}/{})",
            self.path.display(),
            reading.date,
            reading.full_charge_capacity,
            reading.design_capacity
        );
        upsert_reading(&mut readings, reading);
        self.write_all(&readings)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryBatteryLog {
    readings: Mutex<Vec<BatteryReading>>,
}

impl MemoryBatteryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatteryLog for MemoryBatteryLog {
    fn load(&self) -> Result<Vec<BatteryReading>> {
        Ok(self
            .readings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn upsert(&self, reading: BatteryReading) -> Result<()> {
        let mut readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        upsert_reading(&mut readings, reading);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendForecast {
    pub current_wear_pct: f64,
    /// Predicted wear `horizon_days` after the latest reading.
    pub predicted_wear_pct: f64,
    pub horizon_days: u32,
    /// Fitted slope floored at zero.
    pub slope_per_day: f64,
    pub raw_slope_per_day: f64,
    pub intercept: f64,
    pub weekly_degradation_pct: f64,
    pub projected_health_pct: f64,
    /// `slope_per_day * horizon_days`: wear added over the horizon.
    pub projected_wear_increase_pct: f64,
    /// `None` when every reading has the same wear.
    pub r_squared: Option<f64>,
    pub readings_used: usize,
    pub latest_date: NaiveDate,
    pub latest_cycle_count: Option<u32>,
    pub confidence_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastOutcome {
    InsufficientHistory { required: usize, found: usize },
    Forecast(TrendForecast),
}

impl ForecastOutcome {
    pub fn forecast(&self) -> Option<&TrendForecast> {
        match self {
            Self::Forecast(f) => Some(f),
            Self::InsufficientHistory { .. } => None,
        }
    }
}

/// Outcome plus the readings that had to be skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryPrediction {
    pub outcome: ForecastOutcome,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct BatteryTrendPredictor {
    min_distinct_dates: usize,
    horizon_days: u32,
}

impl BatteryTrendPredictor {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            min_distinct_dates: config.min_distinct_dates.max(2),
            horizon_days: config.forecast_horizon_days,
        }
    }

    pub fn with_horizon(mut self, horizon_days: u32) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    pub fn forecast_log(&self, log: &dyn BatteryLog) -> Result<BatteryPrediction> {
        Ok(self.forecast(&log.load()?))
    }

    /// Fit and forecast. Deterministic for a given input.
    pub fn forecast(&self, readings: &[BatteryReading]) -> BatteryPrediction {
        let mut warnings = Vec::new();
        let mut series: Vec<BatteryReading> = Vec::with_capacity(readings.len());
        for r in readings {
            if r.wear_pct().is_none() {
                let w = Warning::new(
                    WarningKind::SkippedReading,
                    format!("battery reading for {} has zero design capacity", r.date),
                );
                log::warn!("{w}");
                warnings.push(w);
                continue;
            }
            upsert_reading(&mut series, r.clone());
        }

        if series.len() < self.min_distinct_dates {
            return BatteryPrediction {
                outcome: ForecastOutcome::InsufficientHistory {
                    required: self.min_distinct_dates,
                    found: series.len(),
                },
                warnings,
            };
        }

        let first = series[0].date;
        let points: Vec<(f64, f64)> = series
            .iter()
            .filter_map(|r| {
                r.wear_pct()
                    .map(|w| ((r.date - first).num_days() as f64, w))
            })
            .collect();
        let fit = least_squares(&points);

        let latest = &series[series.len() - 1];
        let current_day = points[points.len() - 1].0;
        let current_wear = points[points.len() - 1].1;
        let slope = fit.slope.max(0.0);
        let horizon = self.horizon_days as f64;

        let predicted = if fit.slope > 0.0 {
            fit.intercept + fit.slope * (current_day + horizon)
        } else {
            current_wear
        };
        let predicted = predicted.max(current_wear).clamp(0.0, 100.0);

        let span = current_day as i64;
        let mut note = format!(
            "{} readings over {span} days; fitted slope {:+.4} %/day",
            points.len(),
            fit.slope
        );
        if fit.slope < 0.0 {
            note.push_str(" (negative, treated as 0)");
        }
        if let Some(r2) = fit.r_squared {
            note.push_str(&format!("; R^2 {r2:.3}"));
        }

        BatteryPrediction {
            outcome: ForecastOutcome::Forecast(TrendForecast {
                current_wear_pct: current_wear,
                predicted_wear_pct: predicted,
                horizon_days: self.horizon_days,
                slope_per_day: slope,
                raw_slope_per_day: fit.slope,
                intercept: fit.intercept,
                weekly_degradation_pct: slope * 7.0,
                projected_health_pct: 100.0 - predicted,
                projected_wear_increase_pct: slope * horizon,
                r_squared: fit.r_squared,
                readings_used: points.len(),
                latest_date: latest.date,
                latest_cycle_count: latest.cycle_count,
                confidence_note: note,
            }),
            warnings,
        }
    }
}

struct LinearFit {
    slope: f64,
    intercept: f64,
    r_squared: Option<f64>,
}

/// Closed-form OLS. Needs at least two distinct x values.
fn least_squares(points: &[(f64, f64)]) -> LinearFit {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), &(x, y)| {
        (sxx + (x - mean_x).powi(2), sxy + (x - mean_x) * (y - mean_y))
    });
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    let ss_tot: f64 = points.iter().map(|&(_, y)| (y - mean_y).powi(2)).sum();
    let ss_res: f64 = points
        .iter()
        .map(|&(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r_squared = (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot);

    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}
