//! Artifact ↔ entity relations.
//!
//! Persists which entity ids each rendered artifact depends on so that a
//! change to any of them can find the artifacts to drop.

use std::collections::BTreeSet;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::domain::types::EntityId;

pub(crate) const RELATIONS_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS artifact_relations (
        artifact_id TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        PRIMARY KEY (artifact_id, entity_id)
    )",
    "CREATE INDEX IF NOT EXISTS artifact_relations_entity ON artifact_relations (entity_id)",
];

/// Relation queries over the artifact metadata database.
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    pool: SqlitePool,
}

impl ArtifactRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record the entities `artifact_id` depends on, inside the caller's transaction.
    pub async fn register(
        conn: &mut SqliteConnection,
        artifact_id: &str,
        entities: &BTreeSet<EntityId>,
    ) -> Result<(), sqlx::Error> {
        if entities.is_empty() {
            return Ok(());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("INSERT OR IGNORE INTO artifact_relations (artifact_id, entity_id) ");
        builder.push_values(entities, |mut row, entity| {
            row.push_bind(artifact_id).push_bind(*entity);
        });
        builder.build().execute(conn).await?;
        Ok(())
    }

    pub async fn artifacts_for_entities(
        &self,
        entities: &[EntityId],
    ) -> Result<Vec<String>, sqlx::Error> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT artifact_id FROM artifact_relations WHERE entity_id IN (",
        );
        let mut separated = builder.separated(", ");
        for entity in entities {
            separated.push_bind(*entity);
        }
        separated.push_unseparated(") ORDER BY artifact_id");
        builder
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await
    }

    #[cfg(test)]
    pub async fn entities_for_artifact(
        &self,
        artifact_id: &str,
    ) -> Result<BTreeSet<EntityId>, sqlx::Error> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT entity_id FROM artifact_relations WHERE artifact_id = ? ORDER BY entity_id",
        )
        .bind(artifact_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Drop every relation of the given artifacts, inside the caller's transaction.
    pub async fn unregister(
        conn: &mut SqliteConnection,
        artifact_ids: &[String],
    ) -> Result<u64, sqlx::Error> {
        if artifact_ids.is_empty() {
            return Ok(0);
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("DELETE FROM artifact_relations WHERE artifact_id IN (");
        let mut separated = builder.separated(", ");
        for id in artifact_ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");
        Ok(builder.build().execute(conn).await?.rows_affected())
    }

    pub async fn clear(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
        Ok(sqlx::query("DELETE FROM artifact_relations")
            .execute(conn)
            .await?
            .rows_affected())
    }

    pub async fn relation_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM artifact_relations")
            .fetch_one(&self.pool)
            .await
    }
}
