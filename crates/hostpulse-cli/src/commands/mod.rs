pub mod battery;
pub mod config;
pub mod duplicates;
pub mod replay;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use hostpulse_core::{EngineConfig, Warning};

/// Resolve the config path: explicit flag first, then the default location.
pub fn config_path(explicit: Option<&str>) -> PathBuf {
    explicit.map_or_else(EngineConfig::default_path, PathBuf::from)
}

/// Load the effective config, exiting on a parse error.
pub fn load_config(explicit: Option<&str>) -> EngineConfig {
    let path = config_path(explicit);
    if explicit.is_some() && !path.exists() {
        eprintln!("Error: config file {} not found", path.display());
        std::process::exit(1);
    }
    match EngineConfig::load_or_default(&path) {
        Ok(loaded) => {
            print_warnings(&loaded.warnings);
            loaded.config
        }
        Err(e) => {
            eprintln!("Error loading {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

pub fn print_warnings(warnings: &[Warning]) {
    for w in warnings {
        eprintln!("Warning: {w}");
    }
}

/// Parse `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{s}' (expected YYYY-MM-DD): {e}"))
}

/// Parse an optional date flag, defaulting to today (UTC), exiting on error.
pub fn date_or_today(s: Option<&str>) -> NaiveDate {
    match s.map(parse_date) {
        Some(Ok(d)) => d,
        Some(Err(e)) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        None => chrono::Utc::now().date_naive(),
    }
}

/// Human-readable byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// A flag set when the user presses Ctrl+C.
pub fn cancel_on_ctrlc() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("cannot install Ctrl+C handler: {e}");
    }
    cancel
}

pub fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            std::process::exit(1);
        }
    }
}
