//! Typed samples produced by the sampler and consumed by the aggregator.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Kind of metric carried by a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// System-wide CPU utilisation in percent.
    Cpu,
    /// System-wide memory utilisation in percent.
    Ram,
    /// Network throughput in bytes/second (rx + tx).
    Network,
    /// Battery charge in percent.
    Battery,
    /// Per-process CPU utilisation in percent.
    ProcessCpu,
    /// Per-process resident memory in MiB.
    ProcessMemory,
    /// Per-process responsiveness/runtime proxy (source-defined unit).
    ProcessRuntime,
}

impl MetricKind {
    /// System-wide kinds, in display order.
    pub const SYSTEM: [MetricKind; 4] = [Self::Cpu, Self::Ram, Self::Network, Self::Battery];

    /// Whether samples of this kind carry a process identity.
    pub fn is_per_process(self) -> bool {
        matches!(
            self,
            Self::ProcessCpu | Self::ProcessMemory | Self::ProcessRuntime
        )
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Cpu | Self::Ram | Self::Battery | Self::ProcessCpu => "percent",
            Self::Network => "bytes_per_sec",
            Self::ProcessMemory => "mib",
            Self::ProcessRuntime => "proxy",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Ram => write!(f, "ram"),
            Self::Network => write!(f, "network"),
            Self::Battery => write!(f, "battery"),
            Self::ProcessCpu => write!(f, "process_cpu"),
            Self::ProcessMemory => write!(f, "process_memory"),
            Self::ProcessRuntime => write!(f, "process_runtime"),
        }
    }
}

/// Identity of an observed process within one session.
///
/// A pid seen again with a different name or start time is a different
/// identity, so pid reuse never merges unrelated histories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
}

impl ProcessIdentity {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            start_time: None,
        }
    }

    pub fn with_start_time(mut self, start_time: u64) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

impl Ord for ProcessIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.pid.cmp(&other.pid))
            .then(self.start_time.cmp(&other.start_time))
    }
}

impl PartialOrd for ProcessIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.pid)
    }
}

/// One immutable observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub kind: MetricKind,
    pub timestamp_ms: u64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessIdentity>,
}

impl Sample {
    pub fn system(kind: MetricKind, timestamp_ms: u64, value: f64) -> Self {
        Self {
            kind,
            timestamp_ms,
            value,
            process: None,
        }
    }

    pub fn process(
        kind: MetricKind,
        timestamp_ms: u64,
        value: f64,
        process: ProcessIdentity,
    ) -> Self {
        Self {
            kind,
            timestamp_ms,
            value,
            process: Some(process),
        }
    }
}

pub(crate) fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
