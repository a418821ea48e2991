//! `hostpulse replay`: run a recorded session through the engine.
//!
//! Each line of the recording is one tick:
//!
//! ```text
//! {"timestamp_ms": 1767225600000, "readings": {"cpu": {"gauge": 23.5}, "network": {"counter": 81920}}}
//! ```

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;

use hostpulse_core::monitor::date_of;
use hostpulse_core::{
    BatteryLog, BatteryPrediction, DailyStory, EngineConfig, JsonBatteryLog, JsonStorySink,
    MemoryBatteryLog, MetricKind, Monitor, Recording, SessionMeta, StabilityRecord,
    StoragePressure, StorySink, WindowStats,
};

use super::{format_bytes, parse_date, print_json, print_warnings};

pub struct ReplayOptions<'a> {
    pub recording: &'a str,
    pub top: usize,
    pub scan: Option<&'a str>,
    pub date: Option<&'a str>,
    pub write: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct TopProcess {
    name: String,
    pid: u32,
    cpu_percent: f64,
}

#[derive(Serialize)]
struct ReplaySummary {
    session: SessionMeta,
    windows: Vec<WindowStats>,
    top_processes: Vec<TopProcess>,
    stability: Vec<StabilityRecord>,
    story: DailyStory,
    battery: Option<BatteryPrediction>,
    tick_warnings: usize,
}

pub fn run(config: EngineConfig, opts: ReplayOptions<'_>) {
    let recording = match File::open(opts.recording)
        .map_err(hostpulse_core::EngineError::from)
        .and_then(|f| Recording::from_reader(BufReader::new(f)))
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error reading {}: {e}", opts.recording);
            std::process::exit(1);
        }
    };
    if recording.is_empty() {
        eprintln!("Error: {} contains no ticks", opts.recording);
        std::process::exit(1);
    }

    let story_date = match opts.date.map(parse_date) {
        Some(Ok(d)) => d,
        Some(Err(e)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        None => date_of(recording.timestamps().last().copied().unwrap_or_default()),
    };

    let storage = match opts.scan {
        Some(dir) => match super::duplicates::scan(&config, Some(dir), false, None) {
            Ok(report) => {
                print_warnings(&report.warnings);
                StoragePressure::from(&report)
            }
            Err(e) => {
                eprintln!("Error scanning {dir}: {e}");
                std::process::exit(1);
            }
        },
        None => StoragePressure::default(),
    };

    let battery_log: Arc<dyn BatteryLog> = if opts.write {
        Arc::new(JsonBatteryLog::new(&config.battery.log_path))
    } else {
        Arc::new(MemoryBatteryLog::new())
    };
    let sink = JsonStorySink::from_config(&config.story);

    let mut monitor = Monitor::new(config).with_battery_log(battery_log);
    for source in recording.sources() {
        monitor.add_source(Arc::new(source));
    }

    let mut tick_warnings = 0;
    for ts in recording.timestamps() {
        let report = monitor.tick_at(ts);
        tick_warnings += report.warnings.len();
    }

    let never = AtomicBool::new(false);
    let stability = match monitor.stability(&never) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error scoring stability: {e}");
            std::process::exit(1);
        }
    };
    let story = match monitor.compose_story(story_date, storage, &never) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error composing story: {e}");
            std::process::exit(1);
        }
    };
    let battery = monitor.forecast_battery().unwrap_or_else(|e| {
        eprintln!("Warning: battery forecast failed: {e}");
        None
    });
    let windows: Vec<WindowStats> = MetricKind::SYSTEM
        .iter()
        .map(|k| monitor.snapshot(*k))
        .filter(|s| s.count > 0)
        .collect();
    let top_processes: Vec<TopProcess> = monitor
        .top(opts.top, MetricKind::ProcessCpu)
        .into_iter()
        .map(|(id, v)| TopProcess {
            name: id.name,
            pid: id.pid,
            cpu_percent: v,
        })
        .collect();
    let session = monitor.finish();

    if opts.write {
        match sink.emit(&story) {
            Ok(()) => eprintln!("Story written to {}", sink.path_for(story.date).display()),
            Err(e) => {
                eprintln!("Error writing story: {e}");
                std::process::exit(1);
            }
        }
    }

    let summary = ReplaySummary {
        session,
        windows,
        top_processes,
        stability,
        story,
        battery,
        tick_warnings,
    };
    if opts.json {
        print_json(&summary);
    } else {
        print_summary(&summary);
    }
}

fn print_summary(s: &ReplaySummary) {
    println!(
        "Replayed {} ticks ({} samples, {} warnings), session {}",
        s.session.ticks, s.session.total_samples, s.tick_warnings, s.session.id
    );
    println!();

    println!("{:<10} {:>6} {:>12} {:>12} {:>12}", "Metric", "Count", "Mean", "Peak", "StdDev");
    println!("{}", "-".repeat(56));
    for w in &s.windows {
        println!(
            "{:<10} {:>6} {:>12.2} {:>12.2} {:>12.2}",
            w.kind.to_string(),
            w.count,
            w.mean,
            w.peak_value,
            w.std_dev()
        );
    }
    println!();

    if !s.top_processes.is_empty() {
        println!("Top processes by CPU");
        for (i, p) in s.top_processes.iter().enumerate() {
            println!("  {:>2}. {:<24} pid {:<8} {:>6.1}%", i + 1, p.name, p.pid, p.cpu_percent);
        }
        println!();
    }

    if !s.stability.is_empty() {
        println!(
            "{:<24} {:>6} {:>6} {:>6} {:>9}  Class",
            "Application", "CPU", "Mem", "Run", "Composite"
        );
        println!("{}", "-".repeat(66));
        for r in &s.stability {
            println!(
                "{:<24} {:>6.1} {:>6.1} {:>6.1} {:>9.1}  {}",
                r.process.name,
                r.cpu_variance_score,
                r.memory_spike_score,
                r.runtime_fluctuation_score,
                r.composite_score,
                r.classification
            );
        }
        println!();
    }

    if let Some(b) = &s.battery {
        match b.outcome.forecast() {
            Some(f) => println!(
                "Battery: {:.2}% wear now, {:.2}% in {} days",
                f.current_wear_pct, f.predicted_wear_pct, f.horizon_days
            ),
            None => println!("Battery: not enough history for a forecast"),
        }
        println!();
    }

    if s.story.storage_wasted_bytes > 0 {
        println!("Duplicate waste: {}", format_bytes(s.story.storage_wasted_bytes));
        println!();
    }
    print!("{}", s.story.narrative_text);
}
