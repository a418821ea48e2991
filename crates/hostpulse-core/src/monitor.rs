//! The running engine: one session, one sampler, one shared aggregator.
//!
//! The sampling loop is the only writer of aggregator state. Queries
//! (snapshots, top-K, scoring, story composition) take a read lock, copy
//! what they need, and compute outside the lock, so they may run from other
//! threads while sampling continues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};

use crate::aggregator::{Aggregator, WindowStats};
use crate::battery::{BatteryLog, BatteryPrediction, BatteryReading, BatteryTrendPredictor};
use crate::config::EngineConfig;
use crate::error::{Result, Warning};
use crate::sample::{MetricKind, ProcessIdentity};
use crate::sampler::{Sampler, TickReport};
use crate::session::{SessionContext, SessionMeta};
use crate::source::{MetricSource, NameResolver};
use crate::stability::{StabilityRecord, StabilityScorer};
use crate::story::{DailyStory, DailyStoryComposer, StoragePressure, StoryInputs};

/// Cloneable read/write handle to the aggregator.
#[derive(Debug, Clone)]
pub struct SharedAggregator {
    inner: Arc<RwLock<Aggregator>>,
}

impl SharedAggregator {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            inner: Arc::new(RwLock::new(aggregator)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Aggregator> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Aggregator> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self, kind: MetricKind) -> WindowStats {
        self.read().snapshot(kind)
    }

    pub fn top(&self, k: usize, kind: MetricKind) -> Vec<(ProcessIdentity, f64)> {
        self.read().top(k, kind)
    }
}

pub struct Monitor {
    config: EngineConfig,
    session: SessionContext,
    sampler: Sampler,
    aggregator: SharedAggregator,
    scorer: StabilityScorer,
    composer: DailyStoryComposer,
    predictor: BatteryTrendPredictor,
    battery_log: Option<Arc<dyn BatteryLog>>,
    last_logged: Option<BatteryReading>,
}

impl Monitor {
    /// Start a new session with `config`.
    pub fn new(config: EngineConfig) -> Self {
        let mut session = SessionContext::new();
        session.start();
        let sampler = Sampler::new(&session, config.sampling.cadence());
        let aggregator = SharedAggregator::new(Aggregator::new(&session, &config.sampling));
        Self {
            scorer: StabilityScorer::new(&config.stability),
            composer: DailyStoryComposer::new(&config.story),
            predictor: BatteryTrendPredictor::new(&config.battery),
            config,
            session,
            sampler,
            aggregator,
            battery_log: None,
            last_logged: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.sampler = self.sampler.with_resolver(resolver);
        self
    }

    /// Battery statuses seen while sampling are upserted into `log`.
    pub fn with_battery_log(mut self, log: Arc<dyn BatteryLog>) -> Self {
        self.battery_log = Some(log);
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn MetricSource>) {
        self.sampler.add_source(source);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn aggregator(&self) -> SharedAggregator {
        self.aggregator.clone()
    }

    pub fn tick(&mut self) -> TickReport {
        let report = self.sampler.tick();
        self.absorb(report)
    }

    pub fn tick_at(&mut self, timestamp_ms: u64) -> TickReport {
        let report = self.sampler.tick_at(timestamp_ms);
        self.absorb(report)
    }

    fn absorb(&mut self, mut report: TickReport) -> TickReport {
        self.aggregator.write().ingest_tick(&report.samples);

        if let (Some(status), Some(store)) = (&report.battery, &self.battery_log) {
            let date = date_of(report.timestamp_ms);
            let reading = BatteryReading::from_status(date, status);
            if self.last_logged.as_ref() != Some(&reading) {
                match store.upsert(reading.clone()) {
                    Ok(()) => self.last_logged = Some(reading),
                    Err(e) => {
                        log::warn!("battery log upsert failed: {e}");
                        report.warnings.push(Warning::from(&e));
                    }
                }
            }
        }
        report
    }

    /// Tick on the configured cadence until `stop` is set or `max_ticks`
    /// ticks have run. Returns the number of ticks.
    pub fn run(&mut self, stop: &AtomicBool, max_ticks: Option<u64>) -> u64 {
        let cadence = self.config.sampling.cadence();
        let mut ticks = 0;
        while !stop.load(Ordering::Relaxed) && max_ticks.is_none_or(|m| ticks < m) {
            let started = Instant::now();
            self.tick();
            ticks += 1;
            while started.elapsed() < cadence && !stop.load(Ordering::Relaxed) {
                let left = cadence.saturating_sub(started.elapsed());
                std::thread::sleep(left.min(Duration::from_millis(100)));
            }
        }
        ticks
    }

    pub fn snapshot(&self, kind: MetricKind) -> WindowStats {
        self.aggregator.snapshot(kind)
    }

    pub fn top(&self, k: usize, kind: MetricKind) -> Vec<(ProcessIdentity, f64)> {
        self.aggregator.top(k, kind)
    }

    /// Score every process with enough history.
    pub fn stability(&self, cancel: &AtomicBool) -> Result<Vec<StabilityRecord>> {
        let histories = self.aggregator.read().process_histories();
        self.scorer.score_all(&histories, cancel)
    }

    /// Compose the story for `date` from everything seen this session.
    pub fn compose_story(
        &self,
        date: NaiveDate,
        storage: StoragePressure,
        cancel: &AtomicBool,
    ) -> Result<DailyStory> {
        let stability = self.stability(cancel)?;
        let inputs = {
            let agg = self.aggregator.read();
            let network = agg.totals(MetricKind::Network);
            StoryInputs {
                date,
                cpu: agg.totals(MetricKind::Cpu).stats(),
                ram: agg.totals(MetricKind::Ram).stats(),
                network_total_bytes: network.integral.max(0.0).round() as u64,
                network: network.stats(),
                top_apps: agg.app_usage(self.config.story.top_k),
                stability,
                storage,
            }
        };
        Ok(self.composer.compose(&inputs))
    }

    /// Forecast from the attached battery log, if any.
    pub fn forecast_battery(&self) -> Result<Option<BatteryPrediction>> {
        match &self.battery_log {
            Some(log) => Ok(Some(self.predictor.forecast_log(log.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Stop the session and summarize it.
    pub fn finish(mut self) -> SessionMeta {
        self.session.stop();
        self.session
            .meta(self.sampler.ticks(), self.sampler.samples_per_kind().clone())
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("session", &self.session.id())
            .field("sampler", &self.sampler)
            .finish()
    }
}

/// UTC calendar date of a unix-millisecond timestamp.
pub fn date_of(timestamp_ms: u64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms as i64)
        .unwrap_or_default()
        .date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::MemoryBatteryLog;
    use crate::source::{BatteryStatus, ProcessReading, RawReading, RecordedSource};

    fn config() -> EngineConfig {
        let mut c = EngineConfig::default();
        c.sampling.sampling_cadence_seconds = 1;
        c
    }

    fn procs(cpu_b: f64, mem_b: f64) -> Option<RawReading> {
        let p = |pid, name: &str, cpu, mem| ProcessReading {
            pid,
            name: name.to_string(),
            start_time: None,
            cpu_percent: cpu,
            memory_mib: mem,
            runtime_proxy: None,
        };
        Some(RawReading::Processes(vec![
            p(1, "steady", 10.0, 200.0),
            p(2, "jumpy", cpu_b, mem_b),
        ]))
    }

    fn monitor_with(n: usize) -> Monitor {
        let mut m = Monitor::new(config());
        m.add_source(Arc::new(RecordedSource::new(
            MetricKind::Cpu,
            (0..n).map(|i| Some(RawReading::Gauge(if i == 3 { 95.0 } else { 20.0 }))),
        )));
        m.add_source(Arc::new(RecordedSource::new(
            MetricKind::ProcessCpu,
            (0..n).map(|i| {
                let cpu = if i % 2 == 0 { 0.0 } else { 100.0 };
                let mem = if i == 5 { 5_000.0 } else { 200.0 };
                procs(cpu, mem)
            }),
        )));
        m
    }

    #[test]
    fn ticks_feed_aggregator() {
        let mut m = monitor_with(6);
        for i in 0..6 {
            m.tick_at(1_000 * (i + 1));
        }
        let s = m.snapshot(MetricKind::Cpu);
        assert_eq!(s.count, 6);
        assert_eq!(s.peak_value, 95.0);
        assert_eq!(s.peak_timestamp_ms, Some(4_000));
        assert_eq!(m.top(1, MetricKind::ProcessCpu)[0].0.name, "jumpy");
    }

    #[test]
    fn stability_and_story() {
        let mut m = monitor_with(6);
        for i in 0..6 {
            m.tick_at(1_000 * (i + 1));
        }
        let records = m.stability(&AtomicBool::new(false)).unwrap();
        assert_eq!(records.len(), 2);
        let jumpy = records.iter().find(|r| r.process.name == "jumpy").unwrap();
        assert!(jumpy.is_unstable());

        let date = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let story = m
            .compose_story(date, StoragePressure::default(), &AtomicBool::new(false))
            .unwrap();
        // peak 95 > 90 costs 20, one unstable app costs 5
        assert_eq!(story.health_score, 75.0);
        assert_eq!(story.busiest_timestamp_ms, Some(4_000));
        // each app led three ticks; ties rank by name
        assert_eq!(story.top_apps.len(), 2);
        assert_eq!(story.top_apps[0].name, "jumpy");
        assert_eq!(story.top_apps[0].active_ticks, 3);
        assert_eq!(story.unstable_apps, vec!["jumpy".to_string()]);
    }

    #[test]
    fn shared_handle_reads_concurrently() {
        let mut m = monitor_with(20);
        let handle = m.aggregator();
        let reader = std::thread::spawn(move || {
            let mut seen = 0;
            for _ in 0..50 {
                seen = seen.max(handle.snapshot(MetricKind::Cpu).count);
            }
            seen
        });
        for i in 0..20 {
            m.tick_at(1_000 * (i + 1));
        }
        assert!(reader.join().unwrap() <= 20);
        assert_eq!(m.snapshot(MetricKind::Cpu).count, 20);
    }

    #[test]
    fn battery_status_is_logged_once_per_change() {
        let log = Arc::new(MemoryBatteryLog::new());
        let mut m = Monitor::new(config()).with_battery_log(log.clone());
        let status = BatteryStatus {
            percent: 80.0,
            design_capacity: 5000,
            full_charge_capacity: 4800,
            cycle_count: None,
        };
        m.add_source(Arc::new(RecordedSource::new(
            MetricKind::Battery,
            vec![Some(RawReading::Battery(status.clone())); 3],
        )));
        for i in 0..3 {
            m.tick_at(1_000 * (i + 1));
        }
        let readings = log.load().unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].date, date_of(1_000));
        match m.forecast_battery().unwrap().unwrap().outcome {
            crate::battery::ForecastOutcome::InsufficientHistory { found, .. } => {
                assert_eq!(found, 1)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn run_stops_after_max_ticks() {
        let mut c = config();
        c.sampling.sampling_cadence_seconds = 1;
        let mut m = Monitor::new(c);
        let stop = AtomicBool::new(false);
        assert_eq!(m.run(&stop, Some(1)), 1);
        stop.store(true, Ordering::Relaxed);
        assert_eq!(m.run(&stop, None), 0);
        let meta = m.finish();
        assert_eq!(meta.ticks, 1);
    }
}
