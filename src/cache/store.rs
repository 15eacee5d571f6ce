//! Scope stores.
//!
//! One SQLite file per scope holds the `vars` and `objects` tables. Every
//! statement runs inside its own transaction. Any driver error disables the
//! store for the rest of the session and deletes the file so the next session
//! starts from a fresh schema; callers only ever see a miss or a no-op.

use std::io;
use std::path::{Path, PathBuf};

use metrics::counter;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::types::Scope;

use super::driver::{Driver, remove_database_files};
use super::statement::Statement;

const DB_EXTENSION: &str = "sqlite";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS vars (
        name TEXT NOT NULL,
        validtime INTEGER NOT NULL DEFAULT 0,
        section INTEGER NOT NULL,
        sid INTEGER NOT NULL,
        lang TEXT NOT NULL,
        params TEXT NOT NULL DEFAULT '',
        checksum TEXT NOT NULL,
        md5 TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (name, section, sid, lang)
    )",
    "CREATE INDEX IF NOT EXISTS vars_name ON vars (name)",
    "CREATE INDEX IF NOT EXISTS vars_section ON vars (section)",
    "CREATE INDEX IF NOT EXISTS vars_sid ON vars (sid)",
    "CREATE TABLE IF NOT EXISTS objects (
        type TEXT NOT NULL,
        validtime INTEGER NOT NULL DEFAULT 0,
        id INTEGER NOT NULL,
        sid INTEGER NOT NULL,
        lang TEXT NOT NULL,
        params TEXT NOT NULL DEFAULT '',
        checksum TEXT NOT NULL,
        md5 TEXT NOT NULL,
        data TEXT NOT NULL,
        classes TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY (type, id, sid, lang)
    )",
    "CREATE INDEX IF NOT EXISTS objects_type ON objects (type)",
    "CREATE INDEX IF NOT EXISTS objects_id ON objects (id)",
    "CREATE INDEX IF NOT EXISTS objects_sid ON objects (sid)",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store file is corrupt: {message}")]
    Corrupt { message: String },
    #[error("store is busy: {message}")]
    Busy { message: String },
    #[error("constraint violated: {message}")]
    Constraint { message: String },
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("store driver failed: {0}")]
    Driver(#[source] sqlx::Error),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Corrupt { .. } => "corrupt",
            StoreError::Busy { .. } => "busy",
            StoreError::Constraint { .. } => "constraint",
            StoreError::Io(_) => "io",
            StoreError::Driver(_) => "driver",
        }
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(err) => StoreError::Io(err),
        sqlx::Error::Database(db)
            if db.message().contains("malformed") || db.message().contains("not a database") =>
        {
            StoreError::Corrupt {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("locked") || db.message().contains("busy") =>
        {
            StoreError::Busy {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("constraint") => {
            StoreError::Constraint {
                message: db.message().to_string(),
            }
        }
        other => StoreError::Driver(other),
    }
}

/// Database file of `scope` under `scopes_dir`.
pub fn scope_path(scopes_dir: &Path, scope: Scope) -> PathBuf {
    scopes_dir.join(format!("{}.{DB_EXTENSION}", scope.file_stem()))
}

/// Every scope that currently has a database file on disk.
pub fn scopes_on_disk(scopes_dir: &Path) -> io::Result<Vec<Scope>> {
    let entries = match std::fs::read_dir(scopes_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut scopes = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(DB_EXTENSION) {
            continue;
        }
        if let Some(scope) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(Scope::from_file_stem)
        {
            scopes.push(scope);
        }
    }
    scopes.sort_by_key(|scope| scope.section_id());
    Ok(scopes)
}

/// Delete a scope's database and journal files; returns files removed.
pub fn remove_scope_files(scopes_dir: &Path, scope: Scope) -> usize {
    let path = scope_path(scopes_dir, scope);
    let removed = remove_database_files(&path);
    counter!("sectio_store_rebuild_total").increment(1);
    debug!(
        op = "store_rebuild",
        scope = %scope,
        files_removed = removed,
        path = %path.display()
    );
    removed
}

/// Handle on one scope's database.
#[derive(Debug)]
pub struct CacheStore {
    scope: Scope,
    scopes_dir: PathBuf,
    driver: Option<Driver>,
    pool: Option<SqlitePool>,
    enabled: bool,
}

impl CacheStore {
    /// Open `scope`, creating its schema when the file is new. A `None`
    /// driver yields a disabled store.
    pub async fn open(scope: Scope, scopes_dir: impl Into<PathBuf>, driver: Option<Driver>) -> Self {
        let mut store = Self {
            scope,
            scopes_dir: scopes_dir.into(),
            driver,
            pool: None,
            enabled: driver.is_some(),
        };
        store.connect().await;
        store
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> PathBuf {
        scope_path(&self.scopes_dir, self.scope)
    }

    /// Switch to another scope. The enabled state carries over.
    pub async fn reopen(&mut self, scope: Scope) {
        if scope == self.scope && (self.pool.is_some() || !self.enabled) {
            return;
        }
        self.close().await;
        self.scope = scope;
        self.connect().await;
    }

    /// Turn the store off for the remainder of this handle's life.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub async fn exec(&mut self, statement: &Statement) -> bool {
        self.exec_all(std::slice::from_ref(statement)).await
    }

    /// Run several statements in one transaction.
    pub async fn exec_all(&mut self, statements: &[Statement]) -> bool {
        let Some(pool) = self.pool().await else {
            return false;
        };
        match run_all(&pool, statements).await {
            Ok(()) => true,
            Err(err) => {
                self.fail("exec", err).await;
                false
            }
        }
    }

    pub async fn query_row<O>(&mut self, statement: &Statement) -> Option<O>
    where
        O: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let pool = self.pool().await?;
        let result = async {
            let mut tx = pool.begin().await?;
            let row = statement.query_as::<O>().fetch_optional(&mut *tx).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(row)
        }
        .await;

        match result {
            Ok(row) => row,
            Err(err) => {
                self.fail("query_row", err).await;
                None
            }
        }
    }

    /// Scalar `COUNT(*)`-style query; `0` when the store is unusable.
    pub async fn count(&mut self, statement: &Statement) -> i64 {
        let Some(pool) = self.pool().await else {
            return 0;
        };
        let result = async {
            let mut tx = pool.begin().await?;
            let count = statement
                .query_scalar::<i64>()
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(count)
        }
        .await;

        match result {
            Ok(count) => count,
            Err(err) => {
                self.fail("count", err).await;
                0
            }
        }
    }

    /// Delete the scope's files. The schema comes back on the next use if
    /// the store is still enabled.
    pub async fn rebuild(&mut self) {
        self.close().await;
        remove_scope_files(&self.scopes_dir, self.scope);
    }

    pub async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    async fn pool(&mut self) -> Option<SqlitePool> {
        if !self.enabled {
            return None;
        }
        if self.pool.is_none() {
            self.connect().await;
        }
        self.pool.clone()
    }

    async fn connect(&mut self) {
        let Some(driver) = self.driver.filter(|_| self.enabled) else {
            return;
        };
        let path = self.path();
        match open_pool(driver, &path).await {
            Ok(pool) => self.pool = Some(pool),
            Err(err) => self.fail("open", err).await,
        }
    }

    async fn fail(&mut self, op: &'static str, err: sqlx::Error) {
        let err = map_sqlx_error(err);
        warn!(
            op,
            scope = %self.scope,
            error_kind = err.kind(),
            error = %err,
            result = "store_disabled",
            "Scope store failed; disabling it for this session and rebuilding"
        );
        self.enabled = false;
        self.rebuild().await;
    }
}

async fn open_pool(driver: Driver, path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = driver.connect(path).await?;
    if let Err(err) = ensure_schema(&pool).await {
        pool.close().await;
        return Err(err);
    }
    Ok(pool)
}

async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let known: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('vars', 'objects')",
    )
    .fetch_one(pool)
    .await?;
    if known == 2 {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for ddl in SCHEMA {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }
    tx.commit().await
}

async fn run_all(pool: &SqlitePool, statements: &[Statement]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in statements {
        statement.query().execute(&mut *tx).await?;
    }
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::statement::{Conditions, Table};

    fn insert_var(name: &str) -> Statement {
        Statement::new(
            "INSERT OR REPLACE INTO vars (name, section, sid, lang, checksum, md5, data)
             VALUES (?, 1, 1, 'en', 'c', 'm', 'd')",
        )
        .bind(name)
    }

    #[tokio::test]
    async fn open_creates_schema_and_file() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = CacheStore::open(Scope::Section(3), dir.path(), Some(Driver::Wal)).await;

        assert!(store.is_enabled());
        assert!(dir.path().join("section-3.sqlite").exists());
        assert!(store.exec(&insert_var("menu")).await);
        assert_eq!(store.count(&Conditions::new().count_in(Table::Vars)).await, 1);
        store.close().await;
    }

    #[tokio::test]
    async fn disabled_store_is_inert() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = CacheStore::open(Scope::Global, dir.path(), None).await;

        assert!(!store.is_enabled());
        assert!(!store.exec(&insert_var("menu")).await);
        assert_eq!(store.count(&Conditions::new().count_in(Table::Vars)).await, 0);
        assert!(!dir.path().join("global.sqlite").exists());
    }

    #[tokio::test]
    async fn driver_error_disables_and_removes_file() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = CacheStore::open(Scope::Global, dir.path(), Some(Driver::Rollback)).await;
        assert!(store.exec(&insert_var("menu")).await);

        assert!(!store.exec(&Statement::new("INSERT INTO missing VALUES (1)")).await);
        assert!(!store.is_enabled());
        assert!(!store.path().exists());
        assert!(!store.exec(&insert_var("menu")).await);
    }

    #[tokio::test]
    async fn garbage_file_is_rebuilt() {
        let dir = TempDir::new().expect("temp dir");
        let path = scope_path(dir.path(), Scope::Section(8));
        std::fs::write(&path, vec![0x42; 4096]).expect("write garbage");

        let store = CacheStore::open(Scope::Section(8), dir.path(), Some(Driver::Wal)).await;
        assert!(!store.is_enabled());
        assert!(!path.exists());

        let mut fresh = CacheStore::open(Scope::Section(8), dir.path(), Some(Driver::Wal)).await;
        assert!(fresh.is_enabled());
        assert!(fresh.exec(&insert_var("menu")).await);
    }

    #[tokio::test]
    async fn reopen_switches_files() {
        let dir = TempDir::new().expect("temp dir");
        let mut store = CacheStore::open(Scope::Section(1), dir.path(), Some(Driver::Wal)).await;
        assert!(store.exec(&insert_var("menu")).await);

        store.reopen(Scope::Global).await;
        assert_eq!(store.scope(), Scope::Global);
        assert_eq!(store.count(&Conditions::new().count_in(Table::Vars)).await, 0);

        store.reopen(Scope::Section(1)).await;
        assert_eq!(store.count(&Conditions::new().count_in(Table::Vars)).await, 1);

        let scopes = scopes_on_disk(dir.path()).expect("list scopes");
        assert_eq!(scopes, vec![Scope::Global, Scope::Section(1)]);
    }
}
