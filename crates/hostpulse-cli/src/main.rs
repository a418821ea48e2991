//! CLI for hostpulse: host health analytics from recorded metrics.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hostpulse")]
#[command(about = "hostpulse: rolling metrics, stability scores, battery wear and duplicate waste")]
#[command(version = hostpulse_core::VERSION)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/hostpulse/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Battery wear log and trend forecast
    Battery {
        #[command(subcommand)]
        action: BatteryAction,
    },

    /// Find duplicate files by content hash
    Duplicates {
        /// Directory to scan (default: duplicates.duplicate_scan_root)
        root: Option<String>,

        /// Only scan the top level of the directory
        #[arg(long)]
        single_level: bool,

        /// Hashing threads (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Print the scan report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Feed a JSON-lines recording through the engine and print the results
    Replay {
        /// Recording file, one tick per line
        recording: String,

        /// Number of top processes to list
        #[arg(long, default_value = "5")]
        top: usize,

        /// Also scan this directory for duplicate waste
        #[arg(long)]
        scan: Option<String>,

        /// Story date (YYYY-MM-DD); default: date of the last tick
        #[arg(long)]
        date: Option<String>,

        /// Write the daily story into story.reports_dir
        #[arg(long)]
        write: bool,

        /// Print the daily story as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or inspect the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum BatteryAction {
    /// Record (or overwrite) the reading for one day
    Log {
        /// Battery log file (default: battery.log_path)
        #[arg(long)]
        log: Option<String>,

        /// Reading date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,

        /// Design capacity
        #[arg(long)]
        design: u64,

        /// Full charge capacity
        #[arg(long)]
        full: u64,

        /// Charge cycle count
        #[arg(long)]
        cycles: Option<u32>,
    },

    /// Fit the wear trend and forecast
    Forecast {
        /// Battery log file (default: battery.log_path)
        #[arg(long)]
        log: Option<String>,

        /// Forecast horizon in days
        #[arg(long)]
        horizon_days: Option<u32>,

        /// Minimum distinct dates required
        #[arg(long)]
        min_dates: Option<usize>,

        /// Print the forecast as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default values
    Init {
        /// Where to write (default: the --config path or the default location)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Battery { action } => {
            let config = commands::load_config(config_path);
            match action {
                BatteryAction::Log {
                    log,
                    date,
                    design,
                    full,
                    cycles,
                } => commands::battery::run_log(
                    &config,
                    log.as_deref(),
                    date.as_deref(),
                    design,
                    full,
                    cycles,
                ),
                BatteryAction::Forecast {
                    log,
                    horizon_days,
                    min_dates,
                    json,
                } => commands::battery::run_forecast(
                    &config,
                    log.as_deref(),
                    horizon_days,
                    min_dates,
                    json,
                ),
            }
        }
        Commands::Duplicates {
            root,
            single_level,
            workers,
            json,
        } => commands::duplicates::run(
            &commands::load_config(config_path),
            root.as_deref(),
            single_level,
            workers,
            json,
        ),
        Commands::Replay {
            recording,
            top,
            scan,
            date,
            write,
            json,
        } => commands::replay::run(
            commands::load_config(config_path),
            commands::replay::ReplayOptions {
                recording: &recording,
                top,
                scan: scan.as_deref(),
                date: date.as_deref(),
                write,
                json,
            },
        ),
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                commands::config::run_init(path.as_deref().or(config_path), force)
            }
            ConfigAction::Show => commands::config::run_show(config_path),
        },
    }
}
