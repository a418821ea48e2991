//! Metric source boundary.
//!
//! Every raw metric provider implements [`MetricSource`]. Retrieval mechanics
//! (procfs, sysctl, WMI, ...) live outside the engine; the engine only sees
//! [`RawReading`] values. [`RecordedSource`] replays previously captured
//! readings and is what the CLI and the tests drive the engine with.

use std::collections::{BTreeMap, VecDeque};
use std::io::BufRead;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::sample::MetricKind;

/// Metadata about a metric source.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Unique identifier (e.g. `"cpu"`).
    pub name: String,
    pub description: String,
    /// Metric kind this source feeds.
    pub kind: MetricKind,
}

/// Trait that every metric source must implement.
pub trait MetricSource: Send + Sync {
    fn info(&self) -> &SourceInfo;

    /// Check if this source can operate on the current machine.
    fn is_available(&self) -> bool {
        true
    }

    /// Read the current value. Failures are per-source and never fatal.
    fn read(&self) -> Result<RawReading>;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn kind(&self) -> MetricKind {
        self.info().kind
    }
}

/// One raw value as reported by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawReading {
    /// Instantaneous value (CPU %, RAM %).
    Gauge(f64),
    /// Monotonic cumulative counter (network bytes); converted to a rate.
    Counter(u64),
    /// Per-process snapshot.
    Processes(Vec<ProcessReading>),
    Battery(BatteryStatus),
}

/// A single process as seen by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReading {
    pub pid: u32,
    /// Reported name; empty means "ask the resolver".
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    pub cpu_percent: f64,
    pub memory_mib: f64,
    /// Responsiveness proxy, when the platform exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_proxy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub percent: f64,
    /// Design capacity (mWh or mAh, same unit as full charge).
    pub design_capacity: u64,
    pub full_charge_capacity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_count: Option<u32>,
}

/// Capability that turns a pid into a display name (window title, bundle name, ...).
pub trait NameResolver: Send + Sync {
    fn resolve_display_name(&self, pid: u32) -> Option<String>;
}

/// Resolver backed by a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticNames {
    names: BTreeMap<u32, String>,
}

impl StaticNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pid: u32, name: impl Into<String>) -> Self {
        self.names.insert(pid, name.into());
        self
    }
}

impl NameResolver for StaticNames {
    fn resolve_display_name(&self, pid: u32) -> Option<String> {
        self.names.get(&pid).cloned()
    }
}

// ---------------------------------------------------------------------------
// Recorded readings
// ---------------------------------------------------------------------------

/// Replays a queue of readings, one per `read()`.
///
/// A `None` slot, or an exhausted queue, reads as unavailable.
pub struct RecordedSource {
    info: SourceInfo,
    queue: Mutex<VecDeque<Option<RawReading>>>,
}

impl RecordedSource {
    pub fn new(kind: MetricKind, readings: impl IntoIterator<Item = Option<RawReading>>) -> Self {
        Self {
            info: SourceInfo {
                name: kind.to_string(),
                description: format!("recorded {kind} readings"),
                kind,
            },
            queue: Mutex::new(readings.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl MetricSource for RecordedSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read(&self) -> Result<RawReading> {
        let next = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Some(reading)) => Ok(reading),
            Some(None) => Err(EngineError::MetricUnavailable {
                kind: self.info.kind,
                reason: "no reading recorded for this tick".to_string(),
            }),
            None => Err(EngineError::MetricUnavailable {
                kind: self.info.kind,
                reason: "recording exhausted".to_string(),
            }),
        }
    }
}

/// One tick of a recording: the readings each source produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTick {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub readings: BTreeMap<MetricKind, RawReading>,
}

/// A JSON-lines recording of ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub ticks: Vec<RecordedTick>,
}

impl Recording {
    /// Parse one [`RecordedTick`] per non-empty line.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut ticks = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            ticks.push(serde_json::from_str(line)?);
        }
        ticks.sort_by_key(|t: &RecordedTick| t.timestamp_ms);
        Ok(Self { ticks })
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.ticks.iter().map(|t| t.timestamp_ms).collect()
    }

    /// One [`RecordedSource`] per metric kind present anywhere in the
    /// recording. Ticks that lack a kind replay as unavailable for it.
    pub fn sources(&self) -> Vec<RecordedSource> {
        let mut kinds: Vec<MetricKind> = self
            .ticks
            .iter()
            .flat_map(|t| t.readings.keys().copied())
            .collect();
        kinds.sort();
        kinds.dedup();

        kinds
            .into_iter()
            .map(|kind| {
                RecordedSource::new(
                    kind,
                    self.ticks.iter().map(|t| t.readings.get(&kind).cloned()),
                )
            })
            .collect()
    }
}
