//! Observation session lifecycle.
//!
//! A session bounds the validity of process identities and of the
//! "since session start" aggregates. It is created explicitly, passed into
//! the sampler and aggregator, and stopped explicitly; nothing about the
//! current session lives in process-wide state.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sample::MetricKind;

/// Machine information captured at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub cores: usize,
}

pub fn detect_machine_info() -> MachineInfo {
    MachineInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cores: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// An explicit observation session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: String,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    machine: MachineInfo,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::Idle,
            started_at: None,
            ended_at: None,
            started_instant: None,
            machine: detect_machine_info(),
        }
    }

    /// Start the session. Restarting a running session is a no-op.
    pub fn start(&mut self) {
        if self.state == SessionState::Running {
            return;
        }
        self.state = SessionState::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.started_instant = Some(Instant::now());
        log::info!("session {} started", self.id);
    }

    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Stopped;
        self.ended_at = Some(Utc::now());
        log::info!("session {} stopped", self.id);
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Wall time since `start()`, zero if never started.
    pub fn elapsed_ms(&self) -> u64 {
        match (self.started_at, self.ended_at, self.started_instant) {
            (Some(start), Some(end), _) => (end - start).num_milliseconds().max(0) as u64,
            (_, None, Some(instant)) => instant.elapsed().as_millis() as u64,
            _ => 0,
        }
    }

    /// Summarize the session for persistence or display.
    pub fn meta(&self, ticks: u64, samples_per_kind: BTreeMap<MetricKind, u64>) -> SessionMeta {
        SessionMeta {
            id: self.id.clone(),
            state: self.state,
            started_at: self.started_at.map(format_iso8601),
            ended_at: self.ended_at.map(format_iso8601),
            duration_ms: self.elapsed_ms(),
            ticks,
            total_samples: samples_per_kind.values().sum(),
            samples_per_kind,
            machine: self.machine.clone(),
            hostpulse_version: crate::VERSION.to_string(),
        }
    }
}

/// Serializable summary of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub state: SessionState,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub duration_ms: u64,
    pub ticks: u64,
    pub total_samples: u64,
    pub samples_per_kind: BTreeMap<MetricKind, u64>,
    pub machine: MachineInfo,
    pub hostpulse_version: String,
}

/// `2026-02-15T01:30:00Z`
pub fn format_iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
