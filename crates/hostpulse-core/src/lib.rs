//! # hostpulse-core
//!
//! Analytics and health scoring for a single host.
//!
//! `hostpulse-core` turns periodic metric readings into health signals:
//! rolling CPU/RAM/network statistics, per-application stability scores, a
//! battery wear forecast, duplicate-file waste, and a daily story that folds
//! all of them into one score and a short narrative.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use hostpulse_core::{EngineConfig, MetricKind, Monitor, RawReading, RecordedSource, StoragePressure};
//!
//! let mut monitor = Monitor::new(EngineConfig::default());
//! monitor.add_source(Arc::new(RecordedSource::new(
//!     MetricKind::Cpu,
//!     vec![Some(RawReading::Gauge(12.0)), Some(RawReading::Gauge(48.0))],
//! )));
//! monitor.tick();
//! monitor.tick();
//!
//! let cpu = monitor.snapshot(MetricKind::Cpu);
//! println!("cpu mean {:.1}% peak {:.1}%", cpu.mean, cpu.peak_value);
//!
//! let today = chrono::Utc::now().date_naive();
//! let story = monitor
//!     .compose_story(today, StoragePressure::default(), &AtomicBool::new(false))
//!     .unwrap();
//! println!("{}", story.narrative_text);
//! ```
//!
//! ## Architecture
//!
//! Sources → Sampler → Aggregator → {Stability Scorer, Daily Story Composer}
//!
//! Independent feeds: battery log → Battery Trend Predictor, and directory
//! listing → Duplicate Detector → storage pressure for the story.
//!
//! Retrieval of raw OS counters is outside this crate: anything that
//! implements [`MetricSource`] can feed the sampler.

pub mod aggregator;
pub mod battery;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod monitor;
pub mod sample;
pub mod sampler;
pub mod session;
pub mod source;
pub mod stability;
pub mod story;

pub use aggregator::{Aggregator, ProcessHistory, RollingWindow, SessionTotals, WindowStats};
pub use battery::{
    BatteryLog, BatteryPrediction, BatteryReading, BatteryTrendPredictor, ForecastOutcome,
    JsonBatteryLog, MemoryBatteryLog, TrendForecast,
};
pub use config::{ConfigLoad, EngineConfig};
pub use duplicates::{
    DirectoryListing, DuplicateDetector, DuplicateGroup, FileEntry, FileListing, FileRecord,
    ScanReport,
};
pub use error::{EngineError, Result, Warning, WarningKind};
pub use monitor::{Monitor, SharedAggregator};
pub use sample::{MetricKind, ProcessIdentity, Sample};
pub use sampler::{Sampler, TickReport};
pub use session::{SessionContext, SessionMeta, SessionState};
pub use source::{
    BatteryStatus, MetricSource, NameResolver, ProcessReading, RawReading, RecordedSource,
    RecordedTick, Recording, SourceInfo, StaticNames,
};
pub use stability::{Classification, StabilityRecord, StabilityScorer};
pub use story::{
    DailyStory, DailyStoryComposer, JsonStorySink, StoragePressure, StoryInputs, StorySink,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
