//! Rolling aggregation of samples.
//!
//! System-wide kinds (CPU, RAM, network, battery) feed a time-bounded
//! [`RollingWindow`] plus a "since session start" [`SessionTotals`]
//! accumulator. Per-process kinds feed a bounded [`ProcessHistory`] per
//! identity, which is what the stability scorer reads.
//!
//! Window statistics are maintained incrementally: running sums are kept
//! relative to a shift value to limit cancellation, the peak is tracked with
//! a monotonic deque, and the sums are reseeded from the retained entries
//! every [`RESEED_EVERY`] evictions.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::SamplingConfig;
use crate::sample::{MetricKind, ProcessIdentity, Sample};
use crate::session::SessionContext;

/// Evictions between full recomputations of the running sums.
pub const RESEED_EVERY: u64 = 1024;

/// Summary of one metric kind over the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub kind: MetricKind,
    pub count: usize,
    pub mean: f64,
    pub peak_value: f64,
    /// `None` only when the window is empty.
    pub peak_timestamp_ms: Option<u64>,
    /// Population variance.
    pub variance: f64,
}

impl WindowStats {
    pub fn empty(kind: MetricKind) -> Self {
        Self {
            kind,
            count: 0,
            mean: 0.0,
            peak_value: 0.0,
            peak_timestamp_ms: None,
            variance: 0.0,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Compute stats directly from `(timestamp_ms, value)` points.
    pub fn from_points(kind: MetricKind, points: &[(u64, f64)]) -> Self {
        if points.is_empty() {
            return Self::empty(kind);
        }
        let n = points.len() as f64;
        let mean = points.iter().map(|(_, v)| v).sum::<f64>() / n;
        let variance = points.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n;
        let (peak_ts, peak) = points.iter().fold((points[0].0, points[0].1), |acc, &(t, v)| {
            if v > acc.1 { (t, v) } else { acc }
        });
        Self {
            kind,
            count: points.len(),
            mean,
            peak_value: peak,
            peak_timestamp_ms: Some(peak_ts),
            variance,
        }
    }
}

// ---------------------------------------------------------------------------
// Rolling window
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    timestamp_ms: u64,
    value: f64,
}

/// Time-bounded FIFO window with O(1) amortized ingest.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    kind: MetricKind,
    duration_ms: u64,
    entries: VecDeque<Entry>,
    /// Candidates for the maximum, values strictly decreasing front to back.
    maxima: VecDeque<Entry>,
    shift: f64,
    sum: f64,
    sum_sq: f64,
    next_seq: u64,
    newest_ms: u64,
    evictions: u64,
}

impl RollingWindow {
    pub fn new(kind: MetricKind, duration_ms: u64) -> Self {
        Self {
            kind,
            duration_ms: duration_ms.max(1),
            entries: VecDeque::new(),
            maxima: VecDeque::new(),
            shift: 0.0,
            sum: 0.0,
            sum_sq: 0.0,
            next_seq: 0,
            newest_ms: 0,
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Retained `(timestamp_ms, value)` points, oldest first.
    pub fn points(&self) -> Vec<(u64, f64)> {
        self.entries.iter().map(|e| (e.timestamp_ms, e.value)).collect()
    }

    pub fn push(&mut self, timestamp_ms: u64, value: f64) {
        self.newest_ms = self.newest_ms.max(timestamp_ms);
        self.evict_expired();

        if self.entries.is_empty() {
            self.shift = value;
            self.sum = 0.0;
            self.sum_sq = 0.0;
        }
        let entry = Entry {
            seq: self.next_seq,
            timestamp_ms,
            value,
        };
        self.next_seq += 1;

        let d = value - self.shift;
        self.sum += d;
        self.sum_sq += d * d;
        self.entries.push_back(entry);

        // Equal values keep the older candidate, so ties report the first peak.
        while self.maxima.back().is_some_and(|m| m.value < value) {
            self.maxima.pop_back();
        }
        self.maxima.push_back(entry);
    }

    /// Drop everything at or before `newest - duration`.
    fn evict_expired(&mut self) {
        let horizon = self.newest_ms.saturating_sub(self.duration_ms);
        while self
            .entries
            .front()
            .is_some_and(|e| e.timestamp_ms <= horizon && self.newest_ms >= self.duration_ms)
        {
            let Some(old) = self.entries.pop_front() else {
                break;
            };
            let d = old.value - self.shift;
            self.sum -= d;
            self.sum_sq -= d * d;
            if self.maxima.front().is_some_and(|m| m.seq == old.seq) {
                self.maxima.pop_front();
            }
            self.evictions += 1;
            if self.evictions % RESEED_EVERY == 0 {
                self.reseed();
            }
        }
        if self.entries.is_empty() {
            self.sum = 0.0;
            self.sum_sq = 0.0;
        }
    }

    /// Recompute the running sums from the retained entries.
    fn reseed(&mut self) {
        self.shift = self.entries.front().map_or(0.0, |e| e.value);
        let (sum, sum_sq) = self.entries.iter().fold((0.0, 0.0), |(s, sq), e| {
            let d = e.value - self.shift;
            (s + d, sq + d * d)
        });
        self.sum = sum;
        self.sum_sq = sum_sq;
        log::debug!("{} window reseeded after {} evictions", self.kind, self.evictions);
    }

    /// Advance the window clock to `now_ms` and evict what fell out.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.newest_ms = self.newest_ms.max(now_ms);
        self.evict_expired();
    }

    /// Pure read of the current statistics.
    pub fn stats(&self) -> WindowStats {
        match self.maxima.front() {
            Some(peak) => self.summarize(self.entries.len(), self.sum, self.sum_sq, peak),
            None => WindowStats::empty(self.kind),
        }
    }

    /// Statistics as of `now_ms`, excluding entries that a push at `now_ms`
    /// would evict. Does not modify the window.
    pub fn stats_at(&self, now_ms: u64) -> WindowStats {
        let now = self.newest_ms.max(now_ms);
        if now < self.duration_ms {
            return self.stats();
        }
        let horizon = now - self.duration_ms;
        let expired = self
            .entries
            .iter()
            .take_while(|e| e.timestamp_ms <= horizon)
            .count();
        if expired == 0 {
            return self.stats();
        }
        let Some(first) = self.entries.get(expired) else {
            return WindowStats::empty(self.kind);
        };
        let (mut sum, mut sum_sq) = (self.sum, self.sum_sq);
        for e in self.entries.iter().take(expired) {
            let d = e.value - self.shift;
            sum -= d;
            sum_sq -= d * d;
        }
        match self.maxima.iter().find(|m| m.seq >= first.seq) {
            Some(peak) => self.summarize(self.entries.len() - expired, sum, sum_sq, peak),
            None => WindowStats::empty(self.kind),
        }
    }

    fn summarize(&self, count: usize, sum: f64, sum_sq: f64, peak: &Entry) -> WindowStats {
        let n = count as f64;
        let mean_d = sum / n;
        let variance = ((sum_sq - sum * mean_d) / n).max(0.0);
        WindowStats {
            kind: self.kind,
            count,
            mean: self.shift + mean_d,
            peak_value: peak.value,
            peak_timestamp_ms: Some(peak.timestamp_ms),
            variance,
        }
    }
}

// ---------------------------------------------------------------------------
// Session totals
// ---------------------------------------------------------------------------

/// Accumulator over the whole session for one metric kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub kind: MetricKind,
    pub count: u64,
    pub sum: f64,
    pub peak_value: f64,
    pub peak_timestamp_ms: Option<u64>,
    /// Time integral of the value in value-seconds (bytes for a bytes/sec rate).
    pub integral: f64,
    pub last_timestamp_ms: Option<u64>,
    running_mean: f64,
    m2: f64,
}

impl SessionTotals {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            count: 0,
            sum: 0.0,
            peak_value: 0.0,
            peak_timestamp_ms: None,
            integral: 0.0,
            last_timestamp_ms: None,
            running_mean: 0.0,
            m2: 0.0,
        }
    }

    fn add(&mut self, timestamp_ms: u64, value: f64, cadence_ms: u64) {
        let dt_ms = match self.last_timestamp_ms {
            Some(prev) => timestamp_ms.saturating_sub(prev),
            None => cadence_ms,
        };
        self.integral += value * dt_ms as f64 / 1000.0;
        self.count += 1;
        self.sum += value;
        let delta = value - self.running_mean;
        self.running_mean += delta / self.count as f64;
        self.m2 += delta * (value - self.running_mean);
        if self.peak_timestamp_ms.is_none() || value > self.peak_value {
            self.peak_value = value;
            self.peak_timestamp_ms = Some(timestamp_ms);
        }
        self.last_timestamp_ms = Some(timestamp_ms);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Whole-session statistics in window form.
    pub fn stats(&self) -> WindowStats {
        if self.count == 0 {
            return WindowStats::empty(self.kind);
        }
        WindowStats {
            kind: self.kind,
            count: self.count as usize,
            mean: self.running_mean,
            peak_value: self.peak_value,
            peak_timestamp_ms: self.peak_timestamp_ms,
            variance: (self.m2 / self.count as f64).max(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-process history
// ---------------------------------------------------------------------------

/// Bounded recent history of one process within a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessHistory {
    pub cpu: VecDeque<f64>,
    pub memory: VecDeque<f64>,
    pub runtime: VecDeque<f64>,
    pub last_seen_ms: u64,
}

impl ProcessHistory {
    fn push(&mut self, kind: MetricKind, value: f64, timestamp_ms: u64, cap: usize) {
        let series = match kind {
            MetricKind::ProcessCpu => &mut self.cpu,
            MetricKind::ProcessMemory => &mut self.memory,
            MetricKind::ProcessRuntime => &mut self.runtime,
            _ => return,
        };
        series.push_back(value);
        while series.len() > cap {
            series.pop_front();
        }
        self.last_seen_ms = self.last_seen_ms.max(timestamp_ms);
    }

    pub fn series(&self, kind: MetricKind) -> Option<&VecDeque<f64>> {
        match kind {
            MetricKind::ProcessCpu => Some(&self.cpu),
            MetricKind::ProcessMemory => Some(&self.memory),
            MetricKind::ProcessRuntime => Some(&self.runtime),
            _ => None,
        }
    }

    /// Number of observations, taken from the CPU series.
    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Owner of all window state for one session.
#[derive(Debug, Clone)]
pub struct Aggregator {
    session_id: String,
    window_ms: u64,
    cadence_ms: u64,
    history_len: usize,
    windows: BTreeMap<MetricKind, RollingWindow>,
    totals: BTreeMap<MetricKind, SessionTotals>,
    processes: HashMap<ProcessIdentity, ProcessHistory>,
    app_usage: HashMap<String, u64>,
    newest_ms: u64,
}

impl Aggregator {
    pub fn new(session: &SessionContext, config: &SamplingConfig) -> Self {
        Self {
            session_id: session.id().to_string(),
            window_ms: config.window_duration_seconds.saturating_mul(1000),
            cadence_ms: config.sampling_cadence_seconds.saturating_mul(1000),
            history_len: config.history_len.max(1),
            windows: BTreeMap::new(),
            totals: BTreeMap::new(),
            processes: HashMap::new(),
            app_usage: HashMap::new(),
            newest_ms: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Ingest one sample.
    pub fn ingest(&mut self, sample: &Sample) {
        if !sample.value.is_finite() {
            log::debug!("dropping non-finite {} sample", sample.kind);
            return;
        }
        self.newest_ms = self.newest_ms.max(sample.timestamp_ms);

        if sample.kind.is_per_process() {
            let Some(identity) = &sample.process else {
                log::debug!("{} sample without process identity dropped", sample.kind);
                return;
            };
            let cap = self.history_len;
            self.processes
                .entry(identity.clone())
                .or_default()
                .push(sample.kind, sample.value, sample.timestamp_ms, cap);
            return;
        }

        let window_ms = self.window_ms;
        self.windows
            .entry(sample.kind)
            .or_insert_with(|| RollingWindow::new(sample.kind, window_ms))
            .push(sample.timestamp_ms, sample.value);
        let cadence_ms = self.cadence_ms;
        self.totals
            .entry(sample.kind)
            .or_insert_with(|| SessionTotals::new(sample.kind))
            .add(sample.timestamp_ms, sample.value, cadence_ms);
    }

    /// Ingest one tick worth of samples, then credit the tick's top CPU
    /// consumer in the app-usage counts and evict processes that have not
    /// been seen for a whole window.
    pub fn ingest_tick(&mut self, samples: &[Sample]) {
        for s in samples {
            self.ingest(s);
        }

        let top = samples
            .iter()
            .filter(|s| s.kind == MetricKind::ProcessCpu && s.value.is_finite())
            .filter_map(|s| s.process.as_ref().map(|p| (p, s.value)))
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)));
        if let Some((identity, _)) = top {
            *self.app_usage.entry(identity.name.clone()).or_insert(0) += 1;
        }

        // Kinds that stopped reporting still age out of their windows.
        let now = self.newest_ms;
        for w in self.windows.values_mut() {
            w.advance_to(now);
        }
        self.evict_stale_processes();
    }

    fn evict_stale_processes(&mut self) {
        let horizon = self.newest_ms.saturating_sub(self.window_ms);
        if self.newest_ms < self.window_ms {
            return;
        }
        let before = self.processes.len();
        self.processes.retain(|_, h| h.last_seen_ms > horizon);
        let evicted = before - self.processes.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} process histories idle for a full window");
        }
    }

    /// Current window statistics for `kind`, bounded by the newest sample
    /// of any kind.
    pub fn snapshot(&self, kind: MetricKind) -> WindowStats {
        self.windows
            .get(&kind)
            .map(|w| w.stats_at(self.newest_ms))
            .unwrap_or_else(|| WindowStats::empty(kind))
    }

    /// Window statistics for every system kind seen so far.
    pub fn snapshot_all(&self) -> Vec<WindowStats> {
        self.windows
            .values()
            .map(|w| w.stats_at(self.newest_ms))
            .collect()
    }

    pub fn window(&self, kind: MetricKind) -> Option<&RollingWindow> {
        self.windows.get(&kind)
    }

    pub fn totals(&self, kind: MetricKind) -> SessionTotals {
        self.totals
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| SessionTotals::new(kind))
    }

    /// Latest value per process for a per-process kind, sorted descending,
    /// ties broken by identity.
    pub fn top(&self, k: usize, kind: MetricKind) -> Vec<(ProcessIdentity, f64)> {
        let mut ranked: Vec<(ProcessIdentity, f64)> = self
            .processes
            .iter()
            .filter_map(|(id, h)| {
                h.series(kind)
                    .and_then(|s| s.back().copied())
                    .map(|v| (id.clone(), v))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    /// Apps ranked by the number of ticks they were the top CPU consumer.
    pub fn app_usage(&self, k: usize) -> Vec<(String, u64)> {
        let mut ranked: Vec<(String, u64)> = self
            .app_usage
            .iter()
            .map(|(name, n)| (name.clone(), *n))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    /// Copy of every process history, ordered by identity.
    pub fn process_histories(&self) -> Vec<(ProcessIdentity, ProcessHistory)> {
        let mut out: Vec<_> = self
            .processes
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(window_secs: u64, history_len: usize) -> Aggregator {
        let mut session = SessionContext::new();
        session.start();
        Aggregator::new(
            &session,
            &SamplingConfig {
                sampling_cadence_seconds: 5,
                window_duration_seconds: window_secs,
                history_len,
            },
        )
    }

    /// Deterministic pseudo-random values in [0, 100).
    fn lcg_values(n: usize, seed: u64) -> Vec<f64> {
        let mut x = seed;
        (0..n)
            .map(|_| {
                x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (x >> 11) as f64 / (1u64 << 53) as f64 * 100.0
            })
            .collect()
    }

    fn proc_sample(kind: MetricKind, ts: u64, v: f64, pid: u32, name: &str) -> Sample {
        Sample::process(kind, ts, v, ProcessIdentity::new(pid, name))
    }

    fn assert_close(a: f64, b: f64) {
        let tol = 1e-6 * b.abs().max(1.0);
        assert!((a - b).abs() <= tol, "{a} vs {b}");
    }

    // -----------------------------------------------------------------------
    // Rolling window
    // -----------------------------------------------------------------------

    #[test]
    fn incremental_stats_match_scratch() {
        let mut w = RollingWindow::new(MetricKind::Cpu, 60_000);
        for (i, v) in lcg_values(5_000, 7).into_iter().enumerate() {
            w.push(i as u64 * 1_000, v);
            if i % 97 == 0 {
                let inc = w.stats();
                let scratch = WindowStats::from_points(MetricKind::Cpu, &w.points());
                assert_eq!(inc.count, scratch.count);
                assert_close(inc.mean, scratch.mean);
                assert_close(inc.variance, scratch.variance);
                assert_eq!(inc.peak_value, scratch.peak_value);
                assert_eq!(inc.peak_timestamp_ms, scratch.peak_timestamp_ms);
            }
        }
        assert!(w.evictions() > RESEED_EVERY);
    }

    #[test]
    fn large_offset_values_stay_stable() {
        let mut w = RollingWindow::new(MetricKind::Network, 30_000);
        for (i, v) in lcg_values(3_000, 3).into_iter().enumerate() {
            w.push(i as u64 * 1_000, 1.0e9 + v);
        }
        let inc = w.stats();
        let scratch = WindowStats::from_points(MetricKind::Network, &w.points());
        assert_close(inc.mean, scratch.mean);
        assert!((inc.variance - scratch.variance).abs() < 1e-3 * scratch.variance.max(1.0));
    }

    #[test]
    fn eviction_is_fifo_by_time() {
        let mut w = RollingWindow::new(MetricKind::Cpu, 10_000);
        w.push(0, 1.0);
        w.push(5_000, 2.0);
        w.push(10_000, 3.0);
        assert_eq!(w.points(), vec![(5_000, 2.0), (10_000, 3.0)]);
        w.push(30_000, 4.0);
        assert_eq!(w.len(), 1);
        assert_eq!(w.stats().mean, 4.0);
    }

    #[test]
    fn peak_never_points_to_evicted_sample() {
        let mut w = RollingWindow::new(MetricKind::Cpu, 10_000);
        w.push(0, 99.0);
        w.push(4_000, 10.0);
        w.push(8_000, 20.0);
        assert_eq!(w.stats().peak_timestamp_ms, Some(0));
        w.push(12_000, 15.0);
        let s = w.stats();
        assert_eq!(s.peak_value, 20.0);
        assert_eq!(s.peak_timestamp_ms, Some(8_000));
        assert!(w.points().iter().any(|(t, _)| Some(*t) == s.peak_timestamp_ms));
    }

    #[test]
    fn tied_peak_reports_first_occurrence() {
        let mut w = RollingWindow::new(MetricKind::Cpu, 60_000);
        w.push(1_000, 50.0);
        w.push(2_000, 50.0);
        assert_eq!(w.stats().peak_timestamp_ms, Some(1_000));
    }

    #[test]
    fn empty_window_stats() {
        let w = RollingWindow::new(MetricKind::Ram, 1_000);
        let s = w.stats();
        assert_eq!(s.count, 0);
        assert_eq!(s.peak_timestamp_ms, None);
    }

    #[test]
    fn snapshot_is_pure() {
        let mut agg = aggregator(600, 60);
        agg.ingest(&Sample::system(MetricKind::Cpu, 1_000, 30.0));
        agg.ingest(&Sample::system(MetricKind::Cpu, 2_000, 50.0));
        let a = agg.snapshot(MetricKind::Cpu);
        let b = agg.snapshot(MetricKind::Cpu);
        assert_eq!(a, b);
        assert_eq!(a.count, 2);
        assert_eq!(a.mean, 40.0);
        assert_eq!(a.variance, 100.0);
    }

    #[test]
    fn silent_kind_ages_out_of_snapshot() {
        let mut agg = aggregator(60, 60);
        agg.ingest(&Sample::system(MetricKind::Network, 0, 5_000.0));
        for i in 1..=720u64 {
            agg.ingest(&Sample::system(MetricKind::Cpu, i * 5_000, 10.0));
        }
        // Plain ingest never touched the network window; the read is bounded anyway.
        let net = agg.snapshot(MetricKind::Network);
        assert_eq!(net.count, 0);
        assert_eq!(net.peak_timestamp_ms, None);
        assert!(agg.snapshot_all().iter().all(|s| s.kind != MetricKind::Network || s.count == 0));
        assert_eq!(agg.snapshot(MetricKind::Cpu).count, 12);

        // A tick evicts every window, including the silent one.
        agg.ingest_tick(&[Sample::system(MetricKind::Cpu, 3_605_000, 10.0)]);
        assert!(agg.window(MetricKind::Network).is_some_and(RollingWindow::is_empty));
        assert_eq!(agg.totals(MetricKind::Network).count, 1);
    }

    #[test]
    fn stats_at_drops_expired_front_and_peak() {
        let mut w = RollingWindow::new(MetricKind::Ram, 10_000);
        w.push(0, 90.0);
        w.push(4_000, 10.0);
        w.push(8_000, 30.0);
        let s = w.stats_at(12_000);
        assert_eq!(s.count, 2);
        assert_close(s.mean, 20.0);
        assert_close(s.variance, 100.0);
        assert_eq!(s.peak_value, 30.0);
        assert_eq!(s.peak_timestamp_ms, Some(8_000));
        // Pure read: the window still holds all three points.
        assert_eq!(w.len(), 3);
        assert_eq!(w.stats_at(50_000).count, 0);
        assert_eq!(w.stats_at(5_000), w.stats());
    }

    // -----------------------------------------------------------------------
    // Session totals
    // -----------------------------------------------------------------------

    #[test]
    fn totals_outlive_the_window() {
        let mut agg = aggregator(10, 60);
        agg.ingest(&Sample::system(MetricKind::Cpu, 0, 95.0));
        agg.ingest(&Sample::system(MetricKind::Cpu, 60_000, 5.0));
        assert_eq!(agg.snapshot(MetricKind::Cpu).count, 1);
        let t = agg.totals(MetricKind::Cpu);
        assert_eq!(t.count, 2);
        assert_eq!(t.peak_value, 95.0);
        assert_eq!(t.peak_timestamp_ms, Some(0));
        assert_eq!(t.mean(), 50.0);
        let s = t.stats();
        assert_eq!(s.count, 2);
        assert_eq!(s.mean, 50.0);
        assert_eq!(s.variance, 2025.0);
    }

    #[test]
    fn network_integral_counts_bytes() {
        let mut agg = aggregator(600, 60);
        // first sample assumes one cadence (5 s)
        agg.ingest(&Sample::system(MetricKind::Network, 5_000, 100.0));
        agg.ingest(&Sample::system(MetricKind::Network, 15_000, 200.0));
        let t = agg.totals(MetricKind::Network);
        assert!((t.integral - (500.0 + 2_000.0)).abs() < 1e-9);
    }

    // -----------------------------------------------------------------------
    // Processes, top-K, app usage
    // -----------------------------------------------------------------------

    #[test]
    fn top_sorts_descending_with_identity_tiebreak() {
        let mut agg = aggregator(600, 60);
        agg.ingest_tick(&[
            proc_sample(MetricKind::ProcessCpu, 1, 10.0, 3, "c"),
            proc_sample(MetricKind::ProcessCpu, 1, 30.0, 2, "b"),
            proc_sample(MetricKind::ProcessCpu, 1, 30.0, 1, "a"),
            proc_sample(MetricKind::ProcessCpu, 1, 20.0, 4, "d"),
        ]);
        let top = agg.top(3, MetricKind::ProcessCpu);
        let names: Vec<&str> = top.iter().map(|(id, _)| id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "d"]);
        assert!(agg.top(3, MetricKind::Cpu).is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut agg = aggregator(600, 5);
        for t in 0..20u64 {
            agg.ingest_tick(&[proc_sample(MetricKind::ProcessCpu, t * 1_000, t as f64, 1, "a")]);
        }
        let hist = agg.process_histories();
        assert_eq!(hist[0].1.cpu.len(), 5);
        assert_eq!(hist[0].1.cpu.front().copied(), Some(15.0));
    }

    #[test]
    fn idle_processes_are_evicted() {
        let mut agg = aggregator(10, 60);
        agg.ingest_tick(&[proc_sample(MetricKind::ProcessCpu, 0, 1.0, 1, "gone")]);
        agg.ingest_tick(&[proc_sample(MetricKind::ProcessCpu, 20_000, 1.0, 2, "here")]);
        let names: Vec<String> = agg
            .process_histories()
            .into_iter()
            .map(|(id, _)| id.name)
            .collect();
        assert_eq!(names, vec!["here".to_string()]);
    }

    #[test]
    fn reused_pid_keeps_separate_history() {
        let mut agg = aggregator(600, 60);
        let old = ProcessIdentity::new(5, "worker").with_start_time(1);
        let new = ProcessIdentity::new(5, "worker").with_start_time(2);
        agg.ingest_tick(&[Sample::process(MetricKind::ProcessCpu, 1, 90.0, old)]);
        agg.ingest_tick(&[Sample::process(MetricKind::ProcessCpu, 2, 5.0, new)]);
        assert_eq!(agg.process_count(), 2);
    }

    #[test]
    fn app_usage_counts_top_consumer_per_tick() {
        let mut agg = aggregator(600, 60);
        for t in 0..3u64 {
            agg.ingest_tick(&[
                proc_sample(MetricKind::ProcessCpu, t, 50.0, 1, "browser"),
                proc_sample(MetricKind::ProcessCpu, t, 10.0, 2, "editor"),
            ]);
        }
        agg.ingest_tick(&[proc_sample(MetricKind::ProcessCpu, 4, 70.0, 2, "editor")]);
        assert_eq!(
            agg.app_usage(5),
            vec![("browser".to_string(), 3), ("editor".to_string(), 1)]
        );
    }
}
