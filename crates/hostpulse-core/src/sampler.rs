//! Metric sampler: one tick reads every source in parallel, bounded by the
//! sampling cadence, and turns raw readings into typed [`Sample`]s.
//!
//! A source that fails or misses the deadline only loses its own metric for
//! that tick. Cumulative counters are converted to per-second rates using
//! the previous counter value, which is the sampler's only carried state
//! besides the per-session display-name cache.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{EngineError, Result, Warning};
use crate::sample::{MetricKind, ProcessIdentity, Sample, unix_ms_now};
use crate::session::SessionContext;
use crate::source::{BatteryStatus, MetricSource, NameResolver, ProcessReading, RawReading};

/// Everything one tick produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub timestamp_ms: u64,
    pub samples: Vec<Sample>,
    pub warnings: Vec<Warning>,
    /// Latest battery status, for the daily battery log upsert.
    pub battery: Option<BatteryStatus>,
}

impl TickReport {
    pub fn samples_of(&self, kind: MetricKind) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(move |s| s.kind == kind)
    }
}

/// A registered source and whether a read of it is still running.
#[derive(Clone)]
struct SourceSlot {
    source: Arc<dyn MetricSource>,
    in_flight: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
struct CounterState {
    total: u64,
    timestamp_ms: u64,
}

pub struct Sampler {
    session_id: String,
    sources: Vec<SourceSlot>,
    resolver: Option<Arc<dyn NameResolver>>,
    cadence: Duration,
    counters: HashMap<MetricKind, CounterState>,
    names: HashMap<(u32, Option<u64>), String>,
    ticks: u64,
    samples_per_kind: BTreeMap<MetricKind, u64>,
}

impl Sampler {
    pub fn new(session: &SessionContext, cadence: Duration) -> Self {
        Self {
            session_id: session.id().to_string(),
            sources: Vec::new(),
            resolver: None,
            cadence,
            counters: HashMap::new(),
            names: HashMap::new(),
            ticks: 0,
            samples_per_kind: BTreeMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register a source. Sources reporting themselves unavailable are skipped.
    pub fn add_source(&mut self, source: Arc<dyn MetricSource>) {
        if !source.is_available() {
            log::warn!("metric source {} unavailable on this machine, skipping", source.name());
            return;
        }
        self.sources.push(SourceSlot {
            source,
            in_flight: Arc::new(AtomicBool::new(false)),
        });
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn samples_per_kind(&self) -> &BTreeMap<MetricKind, u64> {
        &self.samples_per_kind
    }

    /// Sample every source now.
    pub fn tick(&mut self) -> TickReport {
        self.tick_at(unix_ms_now())
    }

    /// Sample every source, stamping samples with `timestamp_ms`.
    ///
    /// Returns within one cadence period; sources still running at the
    /// deadline are reported unavailable and their late results dropped.
    /// A source whose previous read has not returned is not read again.
    pub fn tick_at(&mut self, timestamp_ms: u64) -> TickReport {
        let results = self.collect_parallel();
        let mut report = TickReport {
            timestamp_ms,
            ..Default::default()
        };

        for (slot, result) in self.sources.clone().iter().zip(results) {
            let source = &slot.source;
            let kind = source.kind();
            let outcome = match result {
                Some(Ok(reading)) => self.convert(kind, reading, timestamp_ms, &mut report),
                Some(Err(e)) => Err(e),
                None => Err(EngineError::MetricUnavailable {
                    kind,
                    reason: format!("{} missed the {:?} deadline", source.name(), self.cadence),
                }),
            };
            if let Err(e) = outcome {
                let err = match e {
                    EngineError::MetricUnavailable { .. } => e,
                    other => EngineError::MetricUnavailable {
                        kind,
                        reason: other.to_string(),
                    },
                };
                log::warn!("tick {}: {err}", self.ticks);
                report.warnings.push(Warning::from(&err));
            }
        }

        self.ticks += 1;
        for s in &report.samples {
            *self.samples_per_kind.entry(s.kind).or_insert(0) += 1;
        }
        log::debug!(
            "tick {} produced {} samples, {} warnings",
            self.ticks,
            report.samples.len(),
            report.warnings.len()
        );
        report
    }

    /// Read all sources on their own threads, waiting at most one cadence.
    fn collect_parallel(&self) -> Vec<Option<Result<RawReading>>> {
        let n = self.sources.len();
        let mut results: Vec<Option<Result<RawReading>>> = (0..n).map(|_| None).collect();
        // No representable deadline means waiting for every source.
        let deadline = Instant::now().checked_add(self.cadence);
        let (tx, rx) = mpsc::channel();

        let mut pending = 0usize;
        for (i, slot) in self.sources.iter().enumerate() {
            if slot.in_flight.swap(true, Ordering::AcqRel) {
                results[i] = Some(Err(EngineError::MetricUnavailable {
                    kind: slot.source.kind(),
                    reason: format!("{}: previous read still in flight", slot.source.name()),
                }));
                continue;
            }
            let tx = tx.clone();
            let source = Arc::clone(&slot.source);
            let in_flight = Arc::clone(&slot.in_flight);
            let spawned = std::thread::Builder::new()
                .name(format!("hostpulse-{}", source.name()))
                .spawn(move || {
                    let result = source.read();
                    in_flight.store(false, Ordering::Release);
                    let _ = tx.send((i, result));
                });
            match spawned {
                Ok(_) => pending += 1,
                Err(e) => {
                    slot.in_flight.store(false, Ordering::Release);
                    results[i] = Some(Err(EngineError::Io(e)));
                }
            }
        }
        drop(tx);

        while pending > 0 {
            let remaining = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok((i, result)) => {
                    results[i] = Some(result);
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        results
    }

    fn convert(
        &mut self,
        kind: MetricKind,
        reading: RawReading,
        timestamp_ms: u64,
        report: &mut TickReport,
    ) -> Result<()> {
        match reading {
            RawReading::Gauge(value) => {
                if !value.is_finite() {
                    return Err(unavailable(kind, format!("non-finite value {value}")));
                }
                report.samples.push(Sample::system(kind, timestamp_ms, value));
            }
            RawReading::Counter(total) => {
                if let Some(rate) = self.counter_rate(kind, total, timestamp_ms) {
                    report.samples.push(Sample::system(kind, timestamp_ms, rate));
                }
            }
            RawReading::Processes(processes) => {
                self.convert_processes(processes, timestamp_ms, report);
            }
            RawReading::Battery(status) => {
                if !status.percent.is_finite() {
                    return Err(unavailable(kind, "non-finite battery percent".to_string()));
                }
                report
                    .samples
                    .push(Sample::system(MetricKind::Battery, timestamp_ms, status.percent));
                report.battery = Some(status);
            }
        }
        Ok(())
    }

    /// Bytes/second since the previous reading. The first reading, a
    /// counter reset, or a non-advancing clock yields no rate.
    fn counter_rate(&mut self, kind: MetricKind, total: u64, timestamp_ms: u64) -> Option<f64> {
        let current = CounterState {
            total,
            timestamp_ms,
        };
        let previous = self.counters.insert(kind, current)?;
        if total < previous.total {
            log::debug!("{kind} counter reset ({} -> {total})", previous.total);
            return None;
        }
        if timestamp_ms <= previous.timestamp_ms {
            return None;
        }
        let secs = (timestamp_ms - previous.timestamp_ms) as f64 / 1000.0;
        Some((total - previous.total) as f64 / secs)
    }

    fn convert_processes(
        &mut self,
        processes: Vec<ProcessReading>,
        timestamp_ms: u64,
        report: &mut TickReport,
    ) {
        let mut seen = HashSet::with_capacity(processes.len());
        for p in processes {
            seen.insert((p.pid, p.start_time));
            let identity = self.identify(&p);
            if p.cpu_percent.is_finite() {
                report.samples.push(Sample::process(
                    MetricKind::ProcessCpu,
                    timestamp_ms,
                    p.cpu_percent,
                    identity.clone(),
                ));
            }
            if p.memory_mib.is_finite() {
                report.samples.push(Sample::process(
                    MetricKind::ProcessMemory,
                    timestamp_ms,
                    p.memory_mib,
                    identity.clone(),
                ));
            }
            if let Some(proxy) = p.runtime_proxy.filter(|v| v.is_finite()) {
                report.samples.push(Sample::process(
                    MetricKind::ProcessRuntime,
                    timestamp_ms,
                    proxy,
                    identity,
                ));
            }
        }
        // Exited processes lose their cached name; a reused pid resolves afresh.
        self.names.retain(|key, _| seen.contains(key));
    }

    fn identify(&mut self, p: &ProcessReading) -> ProcessIdentity {
        let name = if !p.name.trim().is_empty() {
            p.name.clone()
        } else {
            let resolver = self.resolver.clone();
            self.names
                .entry((p.pid, p.start_time))
                .or_insert_with(|| {
                    resolver
                        .and_then(|r| r.resolve_display_name(p.pid))
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| format!("pid-{}", p.pid))
                })
                .clone()
        };
        let identity = ProcessIdentity::new(p.pid, name);
        match p.start_time {
            Some(t) => identity.with_start_time(t),
            None => identity,
        }
    }
}

fn unavailable(kind: MetricKind, reason: String) -> EngineError {
    EngineError::MetricUnavailable { kind, reason }
}

impl std::fmt::Debug for SourceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSlot")
            .field("source", &self.source.name())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("session_id", &self.session_id)
            .field("sources", &self.sources.len())
            .field("cadence", &self.cadence)
            .field("ticks", &self.ticks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningKind;
    use crate::source::{RecordedSource, SourceInfo, StaticNames};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sampler() -> Sampler {
        let mut session = SessionContext::new();
        session.start();
        Sampler::new(&session, Duration::from_millis(500))
    }

    fn process(pid: u32, name: &str, cpu: f64) -> ProcessReading {
        ProcessReading {
            pid,
            name: name.to_string(),
            start_time: None,
            cpu_percent: cpu,
            memory_mib: 100.0,
            runtime_proxy: None,
        }
    }

    // -----------------------------------------------------------------------
    // Mock sources
    // -----------------------------------------------------------------------

    struct SlowSource {
        info: SourceInfo,
        delay: Duration,
    }

    impl MetricSource for SlowSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }
        fn read(&self) -> Result<RawReading> {
            std::thread::sleep(self.delay);
            Ok(RawReading::Gauge(1.0))
        }
    }

    struct FailingSource {
        info: SourceInfo,
    }

    impl MetricSource for FailingSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }
        fn read(&self) -> Result<RawReading> {
            Err(EngineError::Io(std::io::Error::other("sensor offline")))
        }
    }

    struct UnavailableSource {
        info: SourceInfo,
    }

    impl MetricSource for UnavailableSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }
        fn is_available(&self) -> bool {
            false
        }
        fn read(&self) -> Result<RawReading> {
            Ok(RawReading::Gauge(0.0))
        }
    }

    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl NameResolver for CountingResolver {
        fn resolve_display_name(&self, pid: u32) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(format!("app-{pid}"))
        }
    }

    fn info(name: &str, kind: MetricKind) -> SourceInfo {
        SourceInfo {
            name: name.to_string(),
            description: "test".to_string(),
            kind,
        }
    }

    // -----------------------------------------------------------------------
    // Gauges and counters
    // -----------------------------------------------------------------------

    #[test]
    fn gauge_becomes_system_sample() {
        let mut s = sampler();
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Cpu,
            vec![Some(RawReading::Gauge(42.0))],
        )));
        let report = s.tick_at(1000);
        assert_eq!(report.samples, vec![Sample::system(MetricKind::Cpu, 1000, 42.0)]);
        assert!(report.warnings.is_empty());
        assert_eq!(s.ticks(), 1);
        assert_eq!(s.samples_per_kind()[&MetricKind::Cpu], 1);
    }

    #[test]
    fn counter_converts_to_rate_and_skips_resets() {
        let mut s = sampler();
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Network,
            vec![
                Some(RawReading::Counter(1_000)),
                Some(RawReading::Counter(11_000)),
                Some(RawReading::Counter(500)),
                Some(RawReading::Counter(2_500)),
            ],
        )));
        assert!(s.tick_at(0).samples.is_empty());

        let second = s.tick_at(5_000);
        assert_eq!(second.samples.len(), 1);
        assert!((second.samples[0].value - 2_000.0).abs() < 1e-9);

        assert!(s.tick_at(10_000).samples.is_empty(), "reset emits nothing");

        let fourth = s.tick_at(12_000);
        assert!((fourth.samples[0].value - 1_000.0).abs() < 1e-9);
    }

    // -----------------------------------------------------------------------
    // Failure isolation
    // -----------------------------------------------------------------------

    #[test]
    fn failing_source_does_not_block_others() {
        let mut s = sampler();
        s.add_source(Arc::new(FailingSource {
            info: info("ram", MetricKind::Ram),
        }));
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Cpu,
            vec![Some(RawReading::Gauge(10.0))],
        )));
        let report = s.tick_at(1);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].kind, MetricKind::Cpu);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::MetricUnavailable);
        assert!(report.warnings[0].message.contains("sensor offline"));
    }

    #[test]
    fn slow_source_is_cut_off_at_cadence() {
        let mut session = SessionContext::new();
        session.start();
        let mut s = Sampler::new(&session, Duration::from_millis(100));
        s.add_source(Arc::new(SlowSource {
            info: info("slow", MetricKind::Ram),
            delay: Duration::from_secs(2),
        }));
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Cpu,
            vec![Some(RawReading::Gauge(10.0))],
        )));

        let started = Instant::now();
        let report = s.tick_at(1);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("deadline"));
    }

    struct HangingSource {
        info: SourceInfo,
        active: AtomicUsize,
        max_active: AtomicUsize,
        reads: AtomicUsize,
        delay: Duration,
    }

    impl MetricSource for HangingSource {
        fn info(&self) -> &SourceInfo {
            &self.info
        }
        fn read(&self) -> Result<RawReading> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RawReading::Gauge(1.0))
        }
    }

    #[test]
    fn hung_source_is_not_read_again_while_in_flight() {
        let mut session = SessionContext::new();
        session.start();
        let mut s = Sampler::new(&session, Duration::from_millis(20));
        let hanging = Arc::new(HangingSource {
            info: info("hang", MetricKind::Ram),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            delay: Duration::from_millis(600),
        });
        s.add_source(hanging.clone());

        let mut in_flight_warnings = 0;
        for t in 0..10 {
            let report = s.tick_at(t);
            assert!(report.samples.is_empty());
            assert_eq!(report.warnings.len(), 1);
            if report.warnings[0].message.contains("still in flight") {
                in_flight_warnings += 1;
            }
        }
        assert_eq!(hanging.reads.load(Ordering::SeqCst), 1);
        assert_eq!(hanging.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight_warnings, 9);

        // Once the read returns, the source is polled again.
        std::thread::sleep(Duration::from_millis(800));
        s.tick_at(10);
        assert_eq!(hanging.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unrepresentable_cadence_waits_for_sources() {
        let mut session = SessionContext::new();
        session.start();
        let mut s = Sampler::new(&session, Duration::from_secs(u64::MAX));
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Cpu,
            vec![Some(RawReading::Gauge(42.0))],
        )));
        let report = s.tick_at(1);
        assert_eq!(report.samples.len(), 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn unavailable_source_is_not_registered() {
        let mut s = sampler();
        s.add_source(Arc::new(UnavailableSource {
            info: info("gpu", MetricKind::Cpu),
        }));
        assert_eq!(s.source_count(), 0);
    }

    #[test]
    fn non_finite_gauge_is_a_warning() {
        let mut s = sampler();
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Cpu,
            vec![Some(RawReading::Gauge(f64::NAN))],
        )));
        let report = s.tick_at(1);
        assert!(report.samples.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Processes and names
    // -----------------------------------------------------------------------

    #[test]
    fn processes_expand_into_per_process_samples() {
        let mut s = sampler();
        let mut p = process(7, "editor", 12.0);
        p.runtime_proxy = Some(3.0);
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::ProcessCpu,
            vec![Some(RawReading::Processes(vec![p]))],
        )));
        let report = s.tick_at(1);
        assert_eq!(report.samples.len(), 3);
        assert_eq!(report.samples_of(MetricKind::ProcessCpu).count(), 1);
        assert_eq!(report.samples_of(MetricKind::ProcessRuntime).count(), 1);
        let id = report.samples[0].process.as_ref().unwrap();
        assert_eq!(id.name, "editor");
    }

    #[test]
    fn resolver_called_once_per_observed_process() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let mut s = sampler().with_resolver(resolver.clone());
        let tick = || Some(RawReading::Processes(vec![process(9, "", 1.0)]));
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::ProcessCpu,
            vec![tick(), tick(), tick()],
        )));
        for t in 0..3 {
            let report = s.tick_at(t);
            let id = report.samples[0].process.as_ref().unwrap();
            assert_eq!(id.name, "app-9");
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unresolvable_name_falls_back_to_pid() {
        let mut s = sampler().with_resolver(Arc::new(StaticNames::new()));
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::ProcessCpu,
            vec![Some(RawReading::Processes(vec![process(4, " ", 1.0)]))],
        )));
        let report = s.tick_at(1);
        assert_eq!(report.samples[0].process.as_ref().unwrap().name, "pid-4");
    }

    #[test]
    fn battery_status_rides_along() {
        let mut s = sampler();
        let status = BatteryStatus {
            percent: 77.0,
            design_capacity: 5000,
            full_charge_capacity: 4600,
            cycle_count: Some(120),
        };
        s.add_source(Arc::new(RecordedSource::new(
            MetricKind::Battery,
            vec![Some(RawReading::Battery(status.clone()))],
        )));
        let report = s.tick_at(1);
        assert_eq!(report.battery, Some(status));
        assert_eq!(report.samples[0].value, 77.0);
    }
}
