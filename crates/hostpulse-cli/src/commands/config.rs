//! `hostpulse config`: write defaults or show the effective config.

use hostpulse_core::EngineConfig;

use super::{config_path, load_config};

/// Write the default configuration, refusing to clobber without `force`.
pub fn run_init(path: Option<&str>, force: bool) {
    let path = config_path(path);
    if path.exists() && !force {
        eprintln!(
            "Error: {} already exists (use --force to overwrite)",
            path.display()
        );
        std::process::exit(1);
    }
    if let Err(e) = EngineConfig::default().save(&path) {
        eprintln!("Error writing {}: {e}", path.display());
        std::process::exit(1);
    }
    println!("Wrote default config to {}", path.display());
}

pub fn run_show(path: Option<&str>) {
    let config = load_config(path);
    match config.to_toml_string() {
        Ok(s) => {
            println!("# {}", config_path(path).display());
            print!("{s}");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
