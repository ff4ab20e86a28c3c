//! Directory cleanup for the disk actions.
//!
//! Deletion is best effort: files that are locked or vanish mid-walk are
//! counted as failures and the walk continues. Only regular files and
//! symlinks are removed; sockets, FIFOs and device nodes are left alone.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use super::ops::{CleanupDir, FileFilter};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted_files: usize,
    pub deleted_bytes: u64,
    pub failed_files: usize,
    /// Sockets, FIFOs and device nodes that matched but were not removed.
    pub skipped_entries: usize,
}

impl CleanupStats {
    fn merge(&mut self, other: CleanupStats) {
        self.deleted_files += other.deleted_files;
        self.deleted_bytes += other.deleted_bytes;
        self.failed_files += other.failed_files;
        self.skipped_entries += other.skipped_entries;
    }
}

/// Delete the matching contents of every directory in `dirs`. The
/// directories themselves are kept.
pub fn clean_dirs(dirs: &[CleanupDir]) -> CleanupStats {
    let now = SystemTime::now();
    let mut stats = CleanupStats::default();
    for dir in dirs {
        let _span = tracing::debug_span!("cleanup.dir", path = %dir.path.display()).entered();
        let dir_stats = clean_dir(dir, now);
        tracing::debug!(
            deleted = dir_stats.deleted_files,
            bytes = dir_stats.deleted_bytes,
            failed = dir_stats.failed_files,
            skipped = dir_stats.skipped_entries,
            "directory cleaned"
        );
        stats.merge(dir_stats);
    }
    stats
}

pub fn clean_dir(dir: &CleanupDir, now: SystemTime) -> CleanupStats {
    let mut stats = CleanupStats::default();
    delete_recursive(&dir.path, dir, now, &mut stats);
    stats
}

/// Bytes that [`clean_dirs`] would free right now, without deleting.
pub fn measure_dirs(dirs: &[CleanupDir]) -> u64 {
    let now = SystemTime::now();
    dirs.iter()
        .map(|dir| measure_recursive(&dir.path, dir, now))
        .sum()
}

fn measure_recursive(path: &Path, dir: &CleanupDir, now: SystemTime) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.path().symlink_metadata() else {
            continue;
        };
        if metadata.is_dir() {
            if dir.filter == FileFilter::Any {
                total += measure_recursive(&entry.path(), dir, now);
            }
            continue;
        }
        if metadata.is_file()
            && dir.filter.matches(&entry.file_name().to_string_lossy())
            && old_enough(metadata.modified().ok(), dir, now)
        {
            total += metadata.len();
        }
    }
    total
}

fn old_enough(modified: Option<SystemTime>, dir: &CleanupDir, now: SystemTime) -> bool {
    let Some(min_age) = dir.min_age else {
        return true;
    };
    match modified {
        Some(modified) => now
            .duration_since(modified)
            .map(|age| age >= min_age)
            .unwrap_or(false),
        None => false,
    }
}

fn delete_recursive(path: &Path, dir: &CleanupDir, now: SystemTime, stats: &mut CleanupStats) {
    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        // symlink_metadata so links are removed, never followed.
        let Ok(metadata) = entry.path().symlink_metadata() else {
            continue;
        };
        let entry_path = entry.path();

        if metadata.is_dir() {
            // Filtered targets only match top-level files.
            if dir.filter != FileFilter::Any {
                continue;
            }
            delete_recursive(&entry_path, dir, now, stats);
            let _ = fs::remove_dir(&entry_path);
            continue;
        }

        let name = entry.file_name();
        if !dir.filter.matches(&name.to_string_lossy()) {
            continue;
        }
        if !metadata.is_file() && !metadata.file_type().is_symlink() {
            tracing::trace!(path = %entry_path.display(), "not a regular file, leaving it");
            stats.skipped_entries += 1;
            continue;
        }
        if !old_enough(metadata.modified().ok(), dir, now) {
            continue;
        }

        let size = if metadata.is_file() { metadata.len() } else { 0 };
        match fs::remove_file(&entry_path) {
            Ok(()) => {
                stats.deleted_files += 1;
                stats.deleted_bytes += size;
            }
            Err(err) => {
                tracing::trace!(path = %entry_path.display(), %err, "skipping file");
                stats.failed_files += 1;
            }
        }
    }
}
