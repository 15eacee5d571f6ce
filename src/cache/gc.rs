//! Age-based cleanup of generated files.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::infra::fs::remove_file_defensive;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed: usize,
    pub kept: usize,
    pub failed: usize,
}

impl GcReport {
    pub fn merge(self, other: GcReport) -> GcReport {
        GcReport {
            removed: self.removed + other.removed,
            kept: self.kept + other.kept,
            failed: self.failed + other.failed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileGc {
    max_age: Duration,
}

impl FileGc {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Delete regular files under `dir` older than the maximum age, or every
    /// file when `force` is set. A missing directory yields an empty report.
    pub fn collect(&self, dir: &Path, force: bool) -> GcReport {
        let mut report = GcReport::default();
        if !dir.exists() {
            return report;
        }

        let now = SystemTime::now();
        for entry in WalkDir::new(dir).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(op = "file_gc", dir = %dir.display(), error = %err, "Failed to walk directory");
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            if !force && !self.is_expired(&entry, now) {
                report.kept += 1;
                continue;
            }

            match remove_file_defensive(entry.path()) {
                Ok(_) => report.removed += 1,
                Err(err) => {
                    warn!(
                        op = "file_gc",
                        path = %entry.path().display(),
                        error = %err,
                        "Failed to remove generated file"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            op = "file_gc",
            dir = %dir.display(),
            force,
            removed = report.removed,
            kept = report.kept,
            failed = report.failed
        );
        report
    }

    fn is_expired(&self, entry: &walkdir::DirEntry, now: SystemTime) -> bool {
        entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > self.max_age)
    }
}
