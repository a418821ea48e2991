//! Per-application stability scoring.
//!
//! Three sub-scores in [0, 100], higher is steadier:
//!
//! - **cpu_variance_score**: `100 * (1 - min(1, var(cpu) / cpu_variance_ceiling))`
//! - **memory_spike_score**: `100 - spikes * spike_penalty`, where a spike is a
//!   memory sample strictly above `mean + spike_k * stddev`
//! - **runtime_fluctuation_score**: variance of consecutive deltas of the
//!   runtime proxy against `runtime_variance_ceiling`; neutral (100) when the
//!   proxy has fewer than three points
//!
//! The composite is the weighted sum, clamped to [0, 100].

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::aggregator::ProcessHistory;
use crate::config::StabilityConfig;
use crate::error::{EngineError, Result};
use crate::sample::ProcessIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Stable,
    Unstable,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Unstable => write!(f, "unstable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityRecord {
    pub process: ProcessIdentity,
    pub cpu_variance_score: f64,
    pub memory_spike_score: f64,
    pub runtime_fluctuation_score: f64,
    pub composite_score: f64,
    pub classification: Classification,
    /// Observations the score was computed from.
    pub samples: usize,
}

impl StabilityRecord {
    pub fn is_unstable(&self) -> bool {
        self.classification == Classification::Unstable
    }
}

#[derive(Debug, Clone)]
pub struct StabilityScorer {
    config: StabilityConfig,
}

impl StabilityScorer {
    /// Build a scorer; weights are normalized if needed.
    pub fn new(config: &StabilityConfig) -> Self {
        let mut config = config.clone();
        if let Some(w) = config.normalize_weights() {
            log::warn!("{w}");
        }
        Self { config }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Score one process. Fewer than `min_samples` CPU observations is
    /// [`EngineError::InsufficientHistory`].
    pub fn score(
        &self,
        process: &ProcessIdentity,
        history: &ProcessHistory,
    ) -> Result<StabilityRecord> {
        let cpu: Vec<f64> = history.cpu.iter().copied().collect();
        if cpu.len() < self.config.min_samples {
            return Err(EngineError::InsufficientHistory {
                required: self.config.min_samples,
                found: cpu.len(),
            });
        }
        let memory: Vec<f64> = history.memory.iter().copied().collect();
        let runtime: Vec<f64> = history.runtime.iter().copied().collect();

        let cpu_score = ceiling_score(variance(&cpu), self.config.cpu_variance_ceiling);
        let memory_score = self.memory_spike_score(&memory);
        let runtime_score = self.runtime_fluctuation_score(&runtime);

        let (wc, wm, wr) = self.config.weights();
        let composite = (wc * cpu_score + wm * memory_score + wr * runtime_score).clamp(0.0, 100.0);
        let classification = if composite < self.config.stability_threshold {
            Classification::Unstable
        } else {
            Classification::Stable
        };

        Ok(StabilityRecord {
            process: process.clone(),
            cpu_variance_score: cpu_score,
            memory_spike_score: memory_score,
            runtime_fluctuation_score: runtime_score,
            composite_score: composite,
            classification,
            samples: cpu.len(),
        })
    }

    /// Score every process with enough history, in the given order.
    ///
    /// Processes with insufficient history produce no record. The pass
    /// checks `cancel` between processes and returns
    /// [`EngineError::Cancelled`] if it was set.
    pub fn score_all(
        &self,
        histories: &[(ProcessIdentity, ProcessHistory)],
        cancel: &AtomicBool,
    ) -> Result<Vec<StabilityRecord>> {
        let mut records = Vec::with_capacity(histories.len());
        for (id, history) in histories {
            if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled);
            }
            match self.score(id, history) {
                Ok(record) => records.push(record),
                Err(EngineError::InsufficientHistory { found, .. }) => {
                    log::debug!("{id}: {found} samples, not scored");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    fn memory_spike_score(&self, memory: &[f64]) -> f64 {
        if memory.len() < 2 {
            return 100.0;
        }
        let m = mean(memory);
        let limit = m + self.config.spike_k * variance(memory).sqrt();
        let spikes = memory.iter().filter(|&&v| v > limit).count();
        (100.0 - spikes as f64 * self.config.spike_penalty).clamp(0.0, 100.0)
    }

    fn runtime_fluctuation_score(&self, runtime: &[f64]) -> f64 {
        if runtime.len() < 3 {
            return 100.0;
        }
        let deltas: Vec<f64> = runtime.windows(2).map(|w| w[1] - w[0]).collect();
        ceiling_score(variance(&deltas), self.config.runtime_variance_ceiling)
    }
}

fn ceiling_score(var: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return 100.0;
    }
    100.0 * (1.0 - (var / ceiling).min(1.0))
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population variance.
fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64
}
