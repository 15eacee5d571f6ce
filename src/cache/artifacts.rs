//! Rendered artifact cache.
//!
//! Artifacts are whole rendered fragments keyed by request fingerprint. The
//! metadata (one row per artifact plus relation rows) lives in
//! `views/meta.sqlite`; the content lives in `views/files/<hash>.json`.
//! Artifacts are immutable: invalidation always removes the file, its
//! relations and its metadata together.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use lol_html::{RewriteStrSettings, element, rewrite_str};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::DEFAULT_VISITOR_SELECTOR;
use crate::domain::types::{EntityId, SectionId};
use crate::infra::error::InfraError;
use crate::infra::fs::{remove_dir_defensive, remove_file_defensive, write_atomic};

use super::config::CacheConfig;
use super::driver::Driver;
use super::fingerprint::Fingerprint;
use super::registry::{ArtifactRegistry, RELATIONS_SCHEMA};

const SOURCE: &str = "cache::artifacts";

const ARTIFACTS_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS artifacts (
        artifact_id TEXT PRIMARY KEY,
        section INTEGER NOT NULL,
        subject_id INTEGER,
        task TEXT NOT NULL,
        request_fingerprint TEXT NOT NULL,
        template_ref TEXT,
        config_refs TEXT NOT NULL DEFAULT '[]',
        file_name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS artifacts_fingerprint ON artifacts (request_fingerprint)",
    "CREATE INDEX IF NOT EXISTS artifacts_section_task ON artifacts (section, task)",
];

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("artifact metadata query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to strip visitor nodes: {0}")]
    Rewrite(String),
}

/// A composed page fragment, as staged by the renderer and as returned on a hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDocument {
    pub body: String,
    /// Serialized head fragment (scripts, styles, meta).
    pub header: Option<String>,
    /// Serialized extra-data fragment.
    pub extra: Option<String>,
    pub template: Option<String>,
    /// Configuration files the rendering read; a later change to any of them
    /// makes the artifact stale.
    pub config_files: Vec<PathBuf>,
}

impl ArtifactDocument {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_files.push(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRef {
    pub path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactFile {
    body: String,
    header: Option<String>,
    extra: Option<String>,
    template: Option<String>,
    fingerprint: Fingerprint,
}

#[derive(Debug, FromRow)]
struct ArtifactRow {
    file_name: String,
    config_refs: String,
}

pub struct ArtifactCache {
    pool: Option<SqlitePool>,
    registry: Option<ArtifactRegistry>,
    files_dir: PathBuf,
    visitor_selector: String,
}

impl ArtifactCache {
    /// Open the metadata database. With no usable driver the tier is off.
    pub async fn open(config: &CacheConfig, driver: Option<Driver>) -> Result<Self, InfraError> {
        let files_dir = config.artifact_files_dir();
        let visitor_selector = validated_selector(&config.view.visitor_selector);
        let Some(driver) = driver.filter(|_| config.view.enabled) else {
            return Ok(Self::disabled(files_dir, visitor_selector));
        };

        std::fs::create_dir_all(&files_dir)?;
        let pool = driver.connect(&config.metadata_db_path()).await?;
        let mut tx = pool.begin().await?;
        for ddl in ARTIFACTS_SCHEMA.iter().chain(RELATIONS_SCHEMA) {
            sqlx::query(ddl).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(Self {
            registry: Some(ArtifactRegistry::new(pool.clone())),
            pool: Some(pool),
            files_dir,
            visitor_selector,
        })
    }

    fn disabled(files_dir: PathBuf, visitor_selector: String) -> Self {
        Self {
            pool: None,
            registry: None,
            files_dir,
            visitor_selector,
        }
    }

    pub fn is_available(&self) -> bool {
        self.pool.is_some()
    }

    pub fn file_path(&self, artifact_id: &str) -> PathBuf {
        self.files_dir.join(file_name(artifact_id))
    }

    pub fn registry(&self) -> Option<&ArtifactRegistry> {
        self.registry.as_ref()
    }

    /// Newest artifact stored under `fingerprint` whose config files are unchanged.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<ArtifactDocument> {
        let pool = self.pool.as_ref()?;
        let row = sqlx::query_as::<_, ArtifactRow>(
            "SELECT file_name, config_refs FROM artifacts
             WHERE request_fingerprint = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(fingerprint.key())
        .fetch_optional(pool)
        .await;

        let row = match row {
            Ok(row) => row?,
            Err(err) => {
                warn!(op = "artifact_lookup", error = %err, "Artifact metadata query failed");
                return None;
            }
        };

        let refs: Vec<ConfigRef> = match serde_json::from_str(&row.config_refs) {
            Ok(refs) => refs,
            Err(err) => {
                debug!(op = "artifact_lookup", error = %err, "Unreadable config refs");
                return None;
            }
        };
        for config_ref in &refs {
            match file_checksum(&config_ref.path) {
                Ok(checksum) if checksum == config_ref.checksum => {}
                Ok(_) => {
                    debug!(
                        op = "artifact_lookup",
                        path = %config_ref.path.display(),
                        result = "stale_config",
                    );
                    return None;
                }
                Err(err) => {
                    debug!(
                        op = "artifact_lookup",
                        path = %config_ref.path.display(),
                        error = %err,
                        result = "missing_config",
                    );
                    return None;
                }
            }
        }

        let path = self.files_dir.join(&row.file_name);
        let file: ArtifactFile = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(file) => file,
                Err(err) => {
                    warn!(op = "artifact_lookup", path = %path.display(), error = %err, "Unparseable artifact file");
                    return None;
                }
            },
            Err(err) => {
                debug!(op = "artifact_lookup", path = %path.display(), error = %err, result = "missing_file");
                return None;
            }
        };

        Some(ArtifactDocument {
            body: file.body,
            header: file.header,
            extra: file.extra,
            template: file.template,
            config_files: refs.into_iter().map(|config_ref| config_ref.path).collect(),
        })
    }

    /// Sanitize and persist `document`. Returns the artifact id, or `None`
    /// when the tier is off or a referenced config file is unreadable.
    pub async fn insert(
        &self,
        fingerprint: &Fingerprint,
        document: ArtifactDocument,
        relations: &BTreeSet<EntityId>,
    ) -> Result<Option<String>, ArtifactError> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(None);
        };

        let body = sanitize_xml(&strip_visitor_nodes(&document.body, &self.visitor_selector)?);
        let header = document.header.as_deref().map(sanitize_xml);
        let extra = document.extra.as_deref().map(sanitize_xml);

        let mut config_refs = Vec::with_capacity(document.config_files.len());
        for path in document.config_files {
            match file_checksum(&path) {
                Ok(checksum) => config_refs.push(ConfigRef { path, checksum }),
                Err(err) => {
                    debug!(
                        op = "artifact_store",
                        path = %path.display(),
                        error = %err,
                        result = "skipped",
                        "Config file unreadable; not storing artifact"
                    );
                    return Ok(None);
                }
            }
        }

        let fingerprint_key = fingerprint.key();
        let artifact_id = content_hash(
            &fingerprint_key,
            &body,
            header.as_deref(),
            extra.as_deref(),
            &config_refs,
        );
        let refs_json = serde_json::to_string(&config_refs)?;

        let mut tx = pool.begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO artifacts
             (artifact_id, section, subject_id, task, request_fingerprint, template_ref, config_refs, file_name, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&artifact_id)
        .bind(fingerprint.section)
        .bind(fingerprint.subject_id)
        .bind(&fingerprint.task)
        .bind(&fingerprint_key)
        .bind(document.template.as_deref())
        .bind(&refs_json)
        .bind(file_name(&artifact_id))
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(&mut *tx)
        .await?;
        ArtifactRegistry::register(&mut tx, &artifact_id, relations).await?;
        tx.commit().await?;

        let file = ArtifactFile {
            body,
            header,
            extra,
            template: document.template,
            fingerprint: fingerprint.clone(),
        };
        let written = serde_json::to_vec(&file)
            .map_err(ArtifactError::from)
            .and_then(|bytes| write_atomic(&self.file_path(&artifact_id), &bytes).map_err(ArtifactError::from));
        if let Err(err) = written {
            self.delete_artifacts(vec![artifact_id]).await;
            return Err(err);
        }

        debug!(
            op = "artifact_store",
            artifact_id = %artifact_id,
            relations = relations.len(),
            result = "stored"
        );
        Ok(Some(artifact_id))
    }

    pub async fn invalidate_by_entity(&self, ids: &[EntityId]) -> usize {
        let Some(registry) = self.registry.as_ref() else {
            return 0;
        };
        match registry.artifacts_for_entities(ids).await {
            Ok(artifacts) => self.delete_artifacts(artifacts).await,
            Err(err) => {
                warn!(op = "invalidate_by_entity", error = %err, "Relation lookup failed");
                0
            }
        }
    }

    pub async fn invalidate_by_section(&self, section: SectionId) -> usize {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        let selected = sqlx::query_scalar::<_, String>("SELECT artifact_id FROM artifacts WHERE section = ?")
            .bind(section)
            .fetch_all(pool)
            .await;
        self.delete_selected("invalidate_by_section", selected).await
    }

    /// `pattern` is an SQL `LIKE` pattern over the task column.
    pub async fn invalidate_by_task_pattern(&self, section: SectionId, pattern: &str) -> usize {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        let selected = sqlx::query_scalar::<_, String>(
            "SELECT artifact_id FROM artifacts WHERE section = ? AND task LIKE ?",
        )
        .bind(section)
        .bind(pattern)
        .fetch_all(pool)
        .await;
        self.delete_selected("invalidate_by_task_pattern", selected).await
    }

    /// Remove every artifact. Returns the number of metadata rows deleted.
    pub async fn wipe(&self) -> usize {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        let result = async {
            let mut tx = pool.begin().await?;
            ArtifactRegistry::clear(&mut tx).await?;
            let removed = sqlx::query("DELETE FROM artifacts")
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;
            Ok::<_, sqlx::Error>(removed)
        }
        .await;

        if let Err(err) = remove_dir_defensive(&self.files_dir)
            .and_then(|()| std::fs::create_dir_all(&self.files_dir))
        {
            warn!(op = "artifact_wipe", path = %self.files_dir.display(), error = %err, "Failed to reset artifact files");
        }

        match result {
            Ok(removed) => {
                counter!("sectio_artifact_invalidated_total").increment(removed);
                usize::try_from(removed).unwrap_or(usize::MAX)
            }
            Err(err) => {
                warn!(op = "artifact_wipe", error = %err, "Failed to clear artifact metadata");
                0
            }
        }
    }

    pub async fn count(&self) -> i64 {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
            .fetch_one(pool)
            .await
            .unwrap_or(0)
    }

    async fn delete_selected(
        &self,
        op: &'static str,
        selected: Result<Vec<String>, sqlx::Error>,
    ) -> usize {
        match selected {
            Ok(artifacts) => self.delete_artifacts(artifacts).await,
            Err(err) => {
                warn!(op, error = %err, "Artifact selection failed");
                0
            }
        }
    }

    /// Files first, then relations and metadata in one transaction.
    async fn delete_artifacts(&self, artifact_ids: Vec<String>) -> usize {
        let Some(pool) = self.pool.as_ref() else {
            return 0;
        };
        if artifact_ids.is_empty() {
            return 0;
        }

        for id in &artifact_ids {
            if let Err(err) = remove_file_defensive(&self.file_path(id)) {
                warn!(op = "artifact_delete", artifact_id = %id, error = %err, "Failed to remove artifact file");
            }
        }

        let result = async {
            let mut tx = pool.begin().await?;
            ArtifactRegistry::unregister(&mut tx, &artifact_ids).await?;
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM artifacts WHERE artifact_id IN (");
            let mut separated = builder.separated(", ");
            for id in &artifact_ids {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");
            builder.build().execute(&mut *tx).await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => {
                counter!("sectio_artifact_invalidated_total").increment(artifact_ids.len() as u64);
                debug!(op = "artifact_delete", source = SOURCE, count = artifact_ids.len());
                artifact_ids.len()
            }
            Err(err) => {
                warn!(op = "artifact_delete", error = %err, "Failed to delete artifact metadata");
                0
            }
        }
    }
}

fn validated_selector(selector: &str) -> String {
    match selector.parse::<lol_html::Selector>() {
        Ok(_) => selector.to_string(),
        Err(err) => {
            warn!(
                op = "artifact_open",
                selector,
                error = %err,
                "Invalid visitor selector; using the default"
            );
            DEFAULT_VISITOR_SELECTOR.to_string()
        }
    }
}

fn file_name(artifact_id: &str) -> String {
    format!("{artifact_id}.json")
}

/// Id of an artifact. Config checksums take part so a changed config file
/// yields a new artifact rather than colliding with the stale one.
fn content_hash(
    fingerprint_key: &str,
    body: &str,
    header: Option<&str>,
    extra: Option<&str>,
    config_refs: &[ConfigRef],
) -> String {
    let mut hasher = Sha256::new();
    let parts = [Some(fingerprint_key), Some(body), header, extra]
        .into_iter()
        .chain(config_refs.iter().map(|config_ref| Some(config_ref.checksum.as_str())));
    for part in parts {
        let part = part.unwrap_or_default();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's bytes, lowercase hex.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Remove elements matching `selector` (and their content).
pub fn strip_visitor_nodes(html: &str, selector: &str) -> Result<String, ArtifactError> {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(selector, |el| {
                el.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| ArtifactError::Rewrite(err.to_string()))
}

/// Drop characters outside the XML 1.0 `Char` production.
pub fn sanitize_xml(text: &str) -> String {
    text.chars().filter(|c| is_xml_char(*c)).collect()
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}
