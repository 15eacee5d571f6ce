//! Embedded-store driver selection.
//!
//! The engine probes once per process: SQLite with WAL journaling first, then
//! SQLite with a rollback journal. When neither can create and write a
//! database under the scopes directory the store tier is switched off and the
//! decision is persisted in `store.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info, warn};

use crate::infra::flags::StoreFlags;
use crate::infra::fs::remove_file_defensive;

use super::config::CacheConfig;

const PROBE_FILE: &str = ".probe.sqlite";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// SQLite with write-ahead logging.
    Wal,
    /// SQLite with the classic rollback journal.
    Rollback,
}

impl Driver {
    pub const PREFERENCE: [Driver; 2] = [Driver::Wal, Driver::Rollback];

    pub fn name(self) -> &'static str {
        match self {
            Driver::Wal => "sqlite-wal",
            Driver::Rollback => "sqlite-rollback",
        }
    }

    fn journal_mode(self) -> SqliteJournalMode {
        match self {
            Driver::Wal => SqliteJournalMode::Wal,
            Driver::Rollback => SqliteJournalMode::Delete,
        }
    }

    pub fn connect_options(self, path: &Path) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(self.journal_mode())
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
    }

    /// Single-connection pool; one logical writer per session.
    pub async fn connect(self, path: &Path) -> Result<SqlitePool, sqlx::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(self.connect_options(path))
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverProbe {
    Ready(Driver),
    Disabled { reason: String },
}

impl DriverProbe {
    pub fn driver(&self) -> Option<Driver> {
        match self {
            DriverProbe::Ready(driver) => Some(*driver),
            DriverProbe::Disabled { .. } => None,
        }
    }
}

pub async fn probe(config: &CacheConfig) -> DriverProbe {
    let root = config.root();
    match StoreFlags::load(root) {
        Ok(flags) if flags.disabled => {
            let reason = flags
                .reason
                .unwrap_or_else(|| "disabled by operator".to_string());
            info!(
                op = "driver_probe",
                result = "flagged_disabled",
                reason = %reason,
                "Store tier disabled by persisted flag; skipping driver probe"
            );
            return DriverProbe::Disabled { reason };
        }
        Ok(_) => {}
        Err(err) => warn!(
            op = "driver_probe",
            error = %err,
            "Unreadable store flag file; probing drivers anyway"
        ),
    }

    let scopes_dir = config.scopes_dir();
    let mut failures = Vec::new();
    for driver in Driver::PREFERENCE {
        match try_driver(driver, &scopes_dir).await {
            Ok(()) => {
                debug!(op = "driver_probe", driver = driver.name(), result = "ready");
                return DriverProbe::Ready(driver);
            }
            Err(err) => {
                debug!(
                    op = "driver_probe",
                    driver = driver.name(),
                    error = %err,
                    result = "unavailable"
                );
                failures.push(format!("{}: {err}", driver.name()));
            }
        }
    }

    let reason = failures.join("; ");
    warn!(
        op = "driver_probe",
        result = "disabled",
        reason = %reason,
        "No embedded store driver is usable; disabling the store tier"
    );
    if let Err(err) = StoreFlags::disable(root, reason.clone()) {
        warn!(
            op = "driver_probe",
            error = %err,
            "Failed to persist the disabled store flag"
        );
    }
    DriverProbe::Disabled { reason }
}

async fn try_driver(driver: Driver, scopes_dir: &Path) -> Result<(), sqlx::Error> {
    let path = scopes_dir.join(PROBE_FILE);
    let pool = driver.connect(&path).await?;
    let result = sqlx::query("CREATE TABLE IF NOT EXISTS probe (id INTEGER)")
        .execute(&pool)
        .await
        .map(|_| ());
    pool.close().await;
    remove_database_files(&path);
    result
}

/// The database file and every journal sidecar SQLite may leave next to it.
pub(crate) fn database_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in SIDECAR_SUFFIXES {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

/// Best-effort removal of a database and its sidecars; returns files removed.
pub(crate) fn remove_database_files(path: &Path) -> usize {
    let mut removed = 0;
    for file in database_files(path) {
        match remove_file_defensive(&file) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => warn!(
                op = "remove_database_files",
                path = %file.display(),
                error = %err,
                "Failed to remove store file"
            ),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn prefers_wal_driver() {
        let dir = TempDir::new().expect("temp dir");
        let config = CacheConfig::new(dir.path());
        assert_eq!(probe(&config).await, DriverProbe::Ready(Driver::Wal));
        assert!(!config.scopes_dir().join(PROBE_FILE).exists());
    }

    #[tokio::test]
    async fn unusable_root_persists_disabled_flag() {
        let dir = TempDir::new().expect("temp dir");
        let config = CacheConfig::new(dir.path());
        // A regular file where the scopes directory should be.
        std::fs::write(config.scopes_dir(), b"not a directory").expect("write");

        let outcome = probe(&config).await;
        assert!(matches!(outcome, DriverProbe::Disabled { .. }));

        let flags = StoreFlags::load(dir.path()).expect("load flags");
        assert!(flags.disabled);
        assert!(flags.reason.expect("reason").contains("sqlite-rollback"));
    }

    #[tokio::test]
    async fn persisted_flag_skips_probe() {
        let dir = TempDir::new().expect("temp dir");
        StoreFlags::disable(dir.path(), "operator said so").expect("disable");
        let config = CacheConfig::new(dir.path());

        let outcome = probe(&config).await;
        assert_eq!(
            outcome,
            DriverProbe::Disabled {
                reason: "operator said so".to_string()
            }
        );
        assert!(!config.scopes_dir().exists());
    }

    #[test]
    fn sidecars_follow_the_database_name() {
        let files = database_files(Path::new("/x/global.sqlite"));
        assert_eq!(files.len(), 4);
        assert_eq!(files[1], PathBuf::from("/x/global.sqlite-wal"));
        assert_eq!(files[3], PathBuf::from("/x/global.sqlite-journal"));
    }
}
