//! Content-addressed duplicate detection.
//!
//! Files are first grouped by size; only sizes shared by two or more files
//! are hashed (SHA-256, streamed in fixed-size chunks). Hashing fans out over
//! worker threads with no shared mutable state beyond a work index; grouping
//! happens once every hash is in. The detector never modifies the filesystem.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::DuplicateConfig;
use crate::error::{EngineError, Result, Warning, WarningKind};

/// A listed file, before hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// A hashed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256.
    pub content_hash: String,
}

/// Files sharing one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub content_hash: String,
    pub size: u64,
    /// Sorted lexicographically; the first is the one to keep.
    pub paths: Vec<PathBuf>,
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    fn new(content_hash: String, size: u64, mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        let wasted_bytes = size.saturating_mul(paths.len().saturating_sub(1) as u64);
        Self {
            content_hash,
            size,
            paths,
            wasted_bytes,
        }
    }

    pub fn keep(&self) -> &Path {
        &self.paths[0]
    }

    pub fn deletion_candidates(&self) -> &[PathBuf] {
        &self.paths[1..]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub root: PathBuf,
    /// Non-empty regular files listed.
    pub files_considered: usize,
    /// Files whose content was actually hashed.
    pub files_hashed: usize,
    pub groups: Vec<DuplicateGroup>,
    pub warnings: Vec<Warning>,
    pub total_wasted_bytes: u64,
}

impl ScanReport {
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.len() - 1).sum()
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// Source of files to scan.
pub trait FileListing: Send + Sync {
    fn root(&self) -> &Path;

    /// Every candidate file, plus warnings for entries that could not be listed.
    fn list(&self) -> (Vec<FileEntry>, Vec<Warning>);

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }
}

/// Regular files under a directory. Symlinks are not followed.
#[derive(Debug, Clone)]
pub struct DirectoryListing {
    root: PathBuf,
    recursive: bool,
}

impl DirectoryListing {
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
        }
    }
}

impl FileListing for DirectoryListing {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self) -> (Vec<FileEntry>, Vec<Warning>) {
        let mut entries = Vec::new();
        let mut warnings = Vec::new();
        let max_depth = if self.recursive { usize::MAX } else { 1 };

        for item in WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .max_depth(max_depth)
        {
            let entry = match item {
                Ok(e) => e,
                Err(e) => {
                    let w = Warning::new(WarningKind::HashIo, format!("listing failed: {e}"));
                    log::warn!("{w}");
                    warnings.push(w);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => entries.push(FileEntry {
                    path: entry.into_path(),
                    size: meta.len(),
                }),
                Err(e) => {
                    let w = Warning::new(
                        WarningKind::HashIo,
                        format!("cannot stat {}: {e}", entry.path().display()),
                    );
                    log::warn!("{w}");
                    warnings.push(w);
                }
            }
        }
        (entries, warnings)
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Stream `reader` through SHA-256, returning the hex digest and byte count.
pub fn content_digest(reader: &mut dyn Read, chunk_size: usize) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    chunk_size: usize,
    workers: usize,
}

impl DuplicateDetector {
    pub fn new(config: &DuplicateConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            workers: config.workers,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    fn worker_count(&self, jobs: usize) -> usize {
        let wanted = if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        };
        wanted.clamp(1, jobs.max(1))
    }

    fn hash_one(&self, listing: &dyn FileListing, entry: &FileEntry) -> Result<FileRecord> {
        let hash_io = |source| EngineError::HashIo {
            path: entry.path.clone(),
            source,
        };
        let mut reader = listing.open(&entry.path).map_err(hash_io)?;
        let (content_hash, size) =
            content_digest(reader.as_mut(), self.chunk_size).map_err(hash_io)?;
        Ok(FileRecord {
            path: entry.path.clone(),
            size,
            content_hash,
        })
    }

    /// [`Self::hash_one`], with a panic in the listing's reader turned into a
    /// `HashIo` error for that file.
    fn hash_guarded(&self, listing: &dyn FileListing, entry: &FileEntry) -> Result<FileRecord> {
        panic::catch_unwind(AssertUnwindSafe(|| self.hash_one(listing, entry))).unwrap_or_else(
            |_| {
                Err(EngineError::HashIo {
                    path: entry.path.clone(),
                    source: io::Error::other("reader panicked while hashing"),
                })
            },
        )
    }

    /// Scan `listing` for duplicate content.
    ///
    /// Unreadable files are excluded and reported as warnings. Setting
    /// `cancel` aborts between files with [`EngineError::Cancelled`].
    pub fn scan(&self, listing: &dyn FileListing, cancel: &AtomicBool) -> Result<ScanReport> {
        let (entries, mut warnings) = listing.list();

        let mut by_size: BTreeMap<u64, Vec<FileEntry>> = BTreeMap::new();
        let mut files_considered = 0usize;
        for entry in entries.into_iter().filter(|e| e.size > 0) {
            files_considered += 1;
            by_size.entry(entry.size).or_default().push(entry);
        }
        let candidates: Vec<FileEntry> = by_size
            .into_values()
            .filter(|group| group.len() > 1)
            .flatten()
            .collect();

        let n_workers = self.worker_count(candidates.len());
        log::debug!(
            "{}: {files_considered} files, {} share a size, hashing on {n_workers} threads",
            listing.root().display(),
            candidates.len()
        );

        let next = AtomicUsize::new(0);
        let results: Vec<Result<FileRecord>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..n_workers)
                .map(|_| {
                    s.spawn(|| {
                        let mut local = Vec::new();
                        loop {
                            if cancel.load(Ordering::Relaxed) {
                                break;
                            }
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(entry) = candidates.get(i) else {
                                break;
                            };
                            local.push(self.hash_guarded(listing, entry));
                        }
                        local
                    })
                })
                .collect();
            let mut all = Vec::with_capacity(candidates.len());
            for (worker, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(local) => all.extend(local),
                    Err(_) => {
                        let w = Warning::new(
                            WarningKind::HashIo,
                            format!(
                                "hashing worker {worker} panicked; its files are missing from the report"
                            ),
                        );
                        log::warn!("{w}");
                        warnings.push(w);
                    }
                }
            }
            all
        });

        if cancel.load(Ordering::Relaxed) {
            log::info!("scan of {} cancelled", listing.root().display());
            return Err(EngineError::Cancelled);
        }

        let mut by_hash: BTreeMap<String, (u64, Vec<PathBuf>)> = BTreeMap::new();
        let mut files_hashed = 0usize;
        for result in results {
            match result {
                Ok(record) => {
                    files_hashed += 1;
                    by_hash
                        .entry(record.content_hash)
                        .or_insert_with(|| (record.size, Vec::new()))
                        .1
                        .push(record.path);
                }
                Err(e) => {
                    log::warn!("{e}");
                    warnings.push(Warning::from(&e));
                }
            }
        }

        let mut groups: Vec<DuplicateGroup> = by_hash
            .into_iter()
            .filter(|(_, (size, paths))| paths.len() > 1 && *size > 0)
            .map(|(hash, (size, paths))| DuplicateGroup::new(hash, size, paths))
            .collect();
        groups.sort_by(|a, b| {
            b.wasted_bytes
                .cmp(&a.wasted_bytes)
                .then_with(|| a.content_hash.cmp(&b.content_hash))
        });
        let total_wasted_bytes = groups.iter().map(|g| g.wasted_bytes).sum();

        log::info!(
            "{}: {} duplicate groups, {} bytes reclaimable",
            listing.root().display(),
            groups.len(),
            total_wasted_bytes
        );

        Ok(ScanReport {
            root: listing.root().to_path_buf(),
            files_considered,
            files_hashed,
            groups,
            warnings,
            total_wasted_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(&DuplicateConfig {
            chunk_size: 7,
            workers: 2,
            ..Default::default()
        })
    }

    fn scan_dir(dir: &Path, recursive: bool) -> ScanReport {
        detector()
            .scan(&DirectoryListing::new(dir, recursive), &AtomicBool::new(false))
            .unwrap()
    }

    /// Listing over a fixed set of entries, some of which may not exist.
    struct FixedListing {
        root: PathBuf,
        entries: Vec<FileEntry>,
    }

    impl FileListing for FixedListing {
        fn root(&self) -> &Path {
            &self.root
        }
        fn list(&self) -> (Vec<FileEntry>, Vec<Warning>) {
            (self.entries.clone(), Vec::new())
        }
    }

    // -----------------------------------------------------------------------
    // Grouping
    // -----------------------------------------------------------------------

    #[test]
    fn two_pairs_two_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let d = tmp.path();
        fs::write(d.join("a1.txt"), b"alpha content").unwrap();
        fs::write(d.join("a2.txt"), b"alpha content").unwrap();
        fs::write(d.join("b1.txt"), b"bravo content").unwrap();
        fs::write(d.join("b2.txt"), b"bravo content").unwrap();
        fs::write(d.join("u1.txt"), b"unique one!!!").unwrap();
        fs::write(d.join("u2.txt"), b"unique two").unwrap();

        let report = scan_dir(d, true);
        assert_eq!(report.groups.len(), 2);
        assert!(report.groups.iter().all(|g| g.len() == 2));
        let all: Vec<&PathBuf> = report.groups.iter().flat_map(|g| &g.paths).collect();
        assert!(!all.iter().any(|p| p.ends_with("u1.txt") || p.ends_with("u2.txt")));
        assert_eq!(report.total_wasted_bytes, 13 * 2);
        assert_eq!(report.duplicate_files(), 2);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn unique_sizes_are_not_hashed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("x"), b"1").unwrap();
        fs::write(tmp.path().join("y"), b"22").unwrap();
        fs::write(tmp.path().join("z"), b"333").unwrap();
        let report = scan_dir(tmp.path(), true);
        assert_eq!(report.files_considered, 3);
        assert_eq!(report.files_hashed, 0);
        assert!(report.groups.is_empty());
    }

    #[test]
    fn wasted_bytes_for_n_copies() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["c", "a", "b"] {
            fs::write(tmp.path().join(name), vec![9u8; 1000]).unwrap();
        }
        let report = scan_dir(tmp.path(), true);
        let g = &report.groups[0];
        assert_eq!(g.wasted_bytes, 2000);
        assert!(g.keep().ends_with("a"));
        assert_eq!(g.deletion_candidates().len(), 2);
        assert!(g.deletion_candidates()[0].ends_with("b"));
    }

    #[test]
    fn groups_sorted_by_waste() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("s1"), b"small").unwrap();
        fs::write(tmp.path().join("s2"), b"small").unwrap();
        fs::write(tmp.path().join("l1"), vec![1u8; 500]).unwrap();
        fs::write(tmp.path().join("l2"), vec![1u8; 500]).unwrap();
        let report = scan_dir(tmp.path(), true);
        assert_eq!(report.groups[0].size, 500);
        assert_eq!(report.groups[1].size, 5);
    }

    #[test]
    fn empty_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("e1"), b"").unwrap();
        fs::write(tmp.path().join("e2"), b"").unwrap();
        let report = scan_dir(tmp.path(), true);
        assert_eq!(report.files_considered, 0);
        assert!(report.groups.is_empty());
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[test]
    fn single_level_skips_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("nested");
        fs::create_dir(&sub).unwrap();
        fs::write(tmp.path().join("top"), b"same bytes").unwrap();
        fs::write(sub.join("deep"), b"same bytes").unwrap();

        assert!(scan_dir(tmp.path(), false).groups.is_empty());
        assert_eq!(scan_dir(tmp.path(), true).groups.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("real"), b"linked content").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();
        let report = scan_dir(tmp.path(), true);
        assert_eq!(report.files_considered, 1);
        assert!(report.groups.is_empty());
    }

    // -----------------------------------------------------------------------
    // Failures and cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn unreadable_file_is_a_warning_not_an_abort() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, b"twin").unwrap();
        fs::write(&b, b"twin").unwrap();
        let listing = FixedListing {
            root: tmp.path().to_path_buf(),
            entries: vec![
                FileEntry { path: a, size: 4 },
                FileEntry { path: b, size: 4 },
                FileEntry {
                    path: tmp.path().join("vanished"),
                    size: 4,
                },
            ],
        };
        let report = detector().scan(&listing, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::HashIo);
        assert!(report.warnings[0].message.contains("vanished"));
    }

    /// Listing whose reader blows up on one path.
    struct PanickyListing {
        inner: FixedListing,
        poisoned: PathBuf,
    }

    impl FileListing for PanickyListing {
        fn root(&self) -> &Path {
            self.inner.root()
        }
        fn list(&self) -> (Vec<FileEntry>, Vec<Warning>) {
            self.inner.list()
        }
        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            if path == self.poisoned {
                panic!("reader exploded");
            }
            Ok(Box::new(File::open(path)?))
        }
    }

    #[test]
    fn panicking_reader_is_reported_not_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let names = ["a", "b", "cursed"];
        for name in names {
            fs::write(tmp.path().join(name), b"same").unwrap();
        }
        let listing = PanickyListing {
            inner: FixedListing {
                root: tmp.path().to_path_buf(),
                entries: names
                    .iter()
                    .map(|n| FileEntry {
                        path: tmp.path().join(n),
                        size: 4,
                    })
                    .collect(),
            },
            poisoned: tmp.path().join("cursed"),
        };
        let report = detector().scan(&listing, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.files_hashed, 2);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].kind, WarningKind::HashIo);
        assert!(report.warnings[0].message.contains("cursed"));
    }

    #[test]
    fn cancelled_scan_returns_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a"), b"dup").unwrap();
        fs::write(tmp.path().join("b"), b"dup").unwrap();
        let result = detector().scan(
            &DirectoryListing::new(tmp.path(), true),
            &AtomicBool::new(true),
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn rescan_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a"), b"again").unwrap();
        fs::write(tmp.path().join("b"), b"again").unwrap();
        let first = scan_dir(tmp.path(), true);
        let second = scan_dir(tmp.path(), true);
        assert_eq!(first.groups, second.groups);
    }

    #[test]
    fn digest_is_chunk_size_independent() {
        let data = vec![42u8; 10_000];
        let (a, n) = content_digest(&mut data.as_slice(), 7).unwrap();
        let (b, _) = content_digest(&mut data.as_slice(), 65_536).unwrap();
        assert_eq!(a, b);
        assert_eq!(n, 10_000);
        assert_eq!(a.len(), 64);
    }
}
