//! `hostpulse duplicates`: content-hash duplicate scan.

use std::path::PathBuf;

use hostpulse_core::{DirectoryListing, DuplicateDetector, EngineConfig, EngineError, ScanReport};

use super::{cancel_on_ctrlc, format_bytes, print_json, print_warnings};

/// Scan `root` (or the configured root) and print the groups.
pub fn run(
    config: &EngineConfig,
    root: Option<&str>,
    single_level: bool,
    workers: Option<usize>,
    json: bool,
) {
    let report = match scan(config, root, single_level, workers) {
        Ok(r) => r,
        Err(EngineError::Cancelled) => {
            eprintln!("Scan cancelled.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    print_warnings(&report.warnings);

    if json {
        print_json(&report);
    } else {
        print_report(&report);
    }
}

/// Run a scan with Ctrl+C cancellation.
pub fn scan(
    config: &EngineConfig,
    root: Option<&str>,
    single_level: bool,
    workers: Option<usize>,
) -> Result<ScanReport, EngineError> {
    let root = root.map_or_else(|| config.duplicates.duplicate_scan_root.clone(), PathBuf::from);
    if !root.is_dir() {
        return Err(EngineError::ConfigInvalid(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    let recursive = config.duplicates.recursive && !single_level;
    let mut detector = DuplicateDetector::new(&config.duplicates);
    if let Some(w) = workers {
        detector = detector.with_workers(w);
    }
    let cancel = cancel_on_ctrlc();
    detector.scan(&DirectoryListing::new(root, recursive), &cancel)
}

pub fn print_report(report: &ScanReport) {
    println!(
        "Scanned {} ({} files, {} hashed)",
        report.root.display(),
        report.files_considered,
        report.files_hashed
    );
    if report.groups.is_empty() {
        println!("No duplicates found.");
        return;
    }
    println!();
    for (i, group) in report.groups.iter().enumerate() {
        println!(
            "Group {}: {} copies of {} ({} wasted) sha256:{}",
            i + 1,
            group.len(),
            format_bytes(group.size),
            format_bytes(group.wasted_bytes),
            &group.content_hash[..12.min(group.content_hash.len())]
        );
        println!("  keep    {}", group.keep().display());
        for path in group.deletion_candidates() {
            println!("  remove  {}", path.display());
        }
    }
    println!();
    println!(
        "{} duplicate files in {} groups, {} reclaimable",
        report.duplicate_files(),
        report.groups.len(),
        format_bytes(report.total_wasted_bytes)
    );
}
