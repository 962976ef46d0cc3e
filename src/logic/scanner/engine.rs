//! Scan Engine
//!
//! Breadth-first file discovery followed by parallel per-file
//! classification across a fixed worker pool, all under one wall-clock
//! budget. A scan that runs out of budget returns a partial result with
//! `completed = false` instead of failing; the caller's fail-closed rule
//! turns that into a deny.
//!
//! The walk does not follow symlinks and never descends into OS metadata
//! folders. Archive contents are not rescanned.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use uuid::Uuid;

use super::analyzer::analyze_file;
use super::rules::is_skip_folder;
use super::types::{ScanResult, ThreatRecord};
use crate::logic::config::EngineConfig;

// ============================================================================
// SCANNER
// ============================================================================

/// Configured scanner. Pure analysis: no enforcement, no caching of
/// results between invocations.
pub struct Scanner {
    budget: std::time::Duration,
    file_ceiling: usize,
    workers: usize,
    large_file_cap: u64,
}

impl Scanner {
    pub fn new(
        budget: std::time::Duration,
        file_ceiling: usize,
        workers: usize,
        large_file_cap: u64,
    ) -> Self {
        Self {
            budget,
            file_ceiling: file_ceiling.max(1),
            workers: workers.max(1),
            large_file_cap,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.scan_budget(),
            config.scan_file_ceiling,
            config.scan_workers,
            config.large_file_cap,
        )
    }

    /// Scan one mounted volume root. Blocking; the engine runs it under
    /// `spawn_blocking`.
    pub fn scan(&self, root: &Path) -> ScanResult {
        let started = Instant::now();
        let deadline = started + self.budget;
        let scan_id = Uuid::new_v4().to_string();

        log::info!("Scan {} starting at {:?}", scan_id, root);

        if !root.is_dir() {
            return ScanResult {
                scan_id,
                files_scanned: 0,
                bytes_scanned: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                threats: Vec::new(),
                completed: false,
                error: Some(format!("scan root {:?} is not a directory", root)),
            };
        }

        // Phase 1: breadth-first discovery
        let (files, discovery_timed_out) = self.discover(root, deadline);
        let hit_ceiling = files.len() >= self.file_ceiling;
        if hit_ceiling {
            log::warn!(
                "Scan {} hit the {}-file ceiling, remaining files are not visited",
                scan_id,
                self.file_ceiling
            );
        }

        // Phase 2: parallel classification
        let queue = Mutex::new(files.into_iter().collect::<VecDeque<_>>());
        let files_scanned = AtomicUsize::new(0);
        let bytes_scanned = AtomicU64::new(0);
        let classify_timed_out = AtomicUsize::new(0);
        let mut threats: Vec<ThreatRecord> = Vec::new();

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            for _ in 0..self.workers {
                handles.push(scope.spawn(|| {
                    let mut found = Vec::new();
                    loop {
                        if Instant::now() >= deadline {
                            classify_timed_out.store(1, Ordering::Relaxed);
                            break;
                        }
                        let next = queue.lock().pop_front();
                        let Some((path, size)) = next else { break };

                        if let Some(record) = analyze_file(&path, size, self.large_file_cap) {
                            log::warn!(
                                "Scan {}: {} [{}] {:?}",
                                scan_id,
                                record.tier,
                                record.reason,
                                record.path
                            );
                            found.push(record);
                        }
                        files_scanned.fetch_add(1, Ordering::Relaxed);
                        bytes_scanned.fetch_add(size, Ordering::Relaxed);
                    }
                    found
                }));
            }
            for handle in handles {
                if let Ok(mut found) = handle.join() {
                    threats.append(&mut found);
                }
            }
        });

        // Deterministic ordering: most severe first, then path
        threats.sort_by(|a, b| b.tier.cmp(&a.tier).then_with(|| a.path.cmp(&b.path)));

        let timed_out = discovery_timed_out || classify_timed_out.load(Ordering::Relaxed) != 0;
        let result = ScanResult {
            scan_id,
            files_scanned: files_scanned.load(Ordering::Relaxed),
            bytes_scanned: bytes_scanned.load(Ordering::Relaxed),
            duration_ms: started.elapsed().as_millis() as u64,
            threats,
            completed: !timed_out,
            error: timed_out.then(|| "wall-clock budget exhausted".to_string()),
        };

        log::info!(
            "Scan {} finished: {} files, {} bytes, {} threats, completed={}",
            result.scan_id,
            result.files_scanned,
            result.bytes_scanned,
            result.threats.len(),
            result.completed
        );
        result
    }

    /// Breadth-first walk collecting (path, size) up to the file ceiling.
    /// Skips metadata folders and symlinks.
    fn discover(&self, root: &Path, deadline: Instant) -> (Vec<(PathBuf, u64)>, bool) {
        let mut files = Vec::new();
        let mut dirs = VecDeque::new();
        dirs.push_back(root.to_path_buf());

        while let Some(dir) = dirs.pop_front() {
            if Instant::now() >= deadline {
                return (files, true);
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::debug!("Cannot read {:?}: {}", dir, e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                if files.len() >= self.file_ceiling {
                    return (files, false);
                }
                let path = entry.path();
                let meta = match std::fs::symlink_metadata(&path) {
                    Ok(meta) => meta,
                    Err(_) => continue,
                };
                if meta.file_type().is_symlink() {
                    continue;
                }
                if meta.is_dir() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if is_skip_folder(&name) {
                        log::debug!("Skipping metadata folder {:?}", path);
                        continue;
                    }
                    dirs.push_back(path);
                } else if meta.is_file() {
                    files.push((path, meta.len()));
                }
            }
        }
        (files, false)
    }
}

// ============================================================================
// TESTS
// ============================================================================
