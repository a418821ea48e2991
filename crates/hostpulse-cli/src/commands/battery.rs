//! `hostpulse battery`: daily wear log and trend forecast.

use std::path::PathBuf;

use hostpulse_core::{
    BatteryLog, BatteryReading, BatteryTrendPredictor, EngineConfig, ForecastOutcome,
    JsonBatteryLog,
};

use super::{date_or_today, print_json, print_warnings};

fn log_path(config: &EngineConfig, explicit: Option<&str>) -> PathBuf {
    explicit.map_or_else(|| config.battery.log_path.clone(), PathBuf::from)
}

/// Upsert one reading.
pub fn run_log(
    config: &EngineConfig,
    log: Option<&str>,
    date: Option<&str>,
    design: u64,
    full: u64,
    cycles: Option<u32>,
) {
    let date = date_or_today(date);
    let mut reading = BatteryReading::new(date, design, full);
    reading.cycle_count = cycles;

    let Some(wear) = reading.wear_pct() else {
        eprintln!("Error: design capacity must be greater than zero");
        std::process::exit(1);
    };

    let store = JsonBatteryLog::new(log_path(config, log));
    if let Err(e) = store.upsert(reading) {
        eprintln!("Error writing {}: {e}", store.path().display());
        std::process::exit(1);
    }
    println!(
        "Logged {date}: {full}/{design} ({wear:.2}% wear) -> {}",
        store.path().display()
    );
}

/// Print the forecast for the stored history.
pub fn run_forecast(
    config: &EngineConfig,
    log: Option<&str>,
    horizon_days: Option<u32>,
    min_dates: Option<usize>,
    json: bool,
) {
    let mut battery = config.battery.clone();
    if let Some(h) = horizon_days {
        battery.forecast_horizon_days = h;
    }
    if let Some(m) = min_dates {
        battery.min_distinct_dates = m;
    }

    let store = JsonBatteryLog::new(log_path(config, log));
    let prediction = match BatteryTrendPredictor::new(&battery).forecast_log(&store) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error reading {}: {e}", store.path().display());
            std::process::exit(1);
        }
    };
    print_warnings(&prediction.warnings);

    if json {
        print_json(&prediction);
        return;
    }

    match &prediction.outcome {
        ForecastOutcome::InsufficientHistory { required, found } => {
            println!("Not enough battery history: {found} distinct dates, need {required}.");
        }
        ForecastOutcome::Forecast(f) => {
            println!("Battery wear forecast ({})", store.path().display());
            println!("  Readings:          {} (latest {})", f.readings_used, f.latest_date);
            println!("  Current wear:      {:.2}%", f.current_wear_pct);
            println!("  Degradation:       {:.4}%/day, {:.3}%/week", f.slope_per_day, f.weekly_degradation_pct);
            println!(
                "  In {} days:        {:.2}% wear (+{:.2}%), {:.2}% health",
                f.horizon_days, f.predicted_wear_pct, f.projected_wear_increase_pct, f.projected_health_pct
            );
            if let Some(c) = f.latest_cycle_count {
                println!("  Cycle count:       {c}");
            }
            println!("  Note:              {}", f.confidence_note);
        }
    }
}
