//! Stale file removal used by the temp and log cleanup actions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::debug;
use walkdir::WalkDir;

/// Which files count as stale.
#[derive(Debug, Clone)]
pub struct CleanupRule {
    pub max_age: Duration,
    /// Only files with this extension, when set
    pub extension: Option<String>,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub dirs_scanned: usize,
    pub files_removed: u64,
    pub bytes_freed: u64,
    /// Entries that could not be read or removed
    pub skipped: u64,
}

/// Delete regular files older than `rule.max_age` under each directory.
///
/// Missing directories are ignored. Per-entry failures (permissions, races
/// with other processes) are counted in `skipped` and never abort the scan.
/// Symlinks are not followed.
pub fn remove_stale_files(dirs: &[PathBuf], rule: &CleanupRule, now: SystemTime) -> CleanupReport {
    let mut report = CleanupReport::default();

    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        report.dirs_scanned += 1;

        for entry in WalkDir::new(dir).max_depth(rule.max_depth).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    report.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(ext) = rule.extension.as_deref() {
                if entry.path().extension().and_then(|e| e.to_str()) != Some(ext) {
                    continue;
                }
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Skipping file without metadata");
                    report.skipped += 1;
                    continue;
                }
            };
            let Ok(modified) = metadata.modified() else {
                report.skipped += 1;
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= rule.max_age {
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_freed += metadata.len();
                }
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Could not remove stale file");
                    report.skipped += 1;
                }
            }
        }
    }

    report
}
