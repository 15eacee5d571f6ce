//! Hydrated domain objects.
//!
//! Objects are keyed by `(type, id, sid, lang)`. Each row records the object
//! kinds needed to decode it; a kind this build does not know turns the row
//! into a miss. Writes are gated so slow requests, state-changing tasks and
//! entries not explicitly revalidated never reach the store.

use metrics::counter;
use sqlx::FromRow;
use tracing::{debug, warn};

use crate::domain::entities::CachedObject;
use crate::domain::types::{EntityId, GLOBAL_SENTINEL, ObjectKind, Scope, SectionId};

use super::codec::Codec;
use super::keys::{NAMESPACE, kinds_with_prefix, memory_object_key};
use super::memory::MemoryValue;
use super::session::CacheSession;
use super::statement::{Conditions, Statement, Table};

#[derive(Debug, FromRow)]
struct ObjectRow {
    checksum: String,
    data: String,
    classes: String,
}

/// Why [`CacheSession::add_obj`] declined to cache an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddObjOutcome {
    Stored,
    StoreDisabled,
    TaskDenied,
    NotRevalidated,
    OverBudget,
    Failed,
}

/// Resolve recorded kind tags; any unknown tag fails the whole set.
pub fn resolve_kinds(classes: &str) -> Option<Vec<ObjectKind>> {
    let tags: Vec<String> = serde_json::from_str(classes).ok()?;
    tags.iter().map(|tag| tag.parse::<ObjectKind>().ok()).collect()
}

fn object_memory_prefix() -> String {
    format!("{NAMESPACE}obj:")
}

impl CacheSession {
    /// Mark `(kind, id)` as safe to cache for the rest of this session.
    pub fn revalidate(&mut self, id: EntityId, kind: ObjectKind) {
        self.dirty.insert((kind, id));
    }

    pub fn is_revalidated(&self, id: EntityId, kind: ObjectKind) -> bool {
        self.dirty.contains(&(kind, id))
    }

    pub async fn add_obj(
        &mut self,
        object: &CachedObject,
        id: EntityId,
        sid: i64,
        force: bool,
    ) -> AddObjOutcome {
        let kind = object.kind();
        let outcome = self.add_obj_gate(kind, id, force);
        if outcome != AddObjOutcome::Stored {
            debug!(op = "add_obj", kind = %kind, id, outcome = ?outcome, result = "skipped");
            return outcome;
        }

        let lang = self.language().to_string();
        let kinds = object.required_kinds();

        let memory = self.engine.memory();
        let memory_enabled = memory.enabled();
        if memory_enabled {
            memory.set(
                memory_object_key(kind, id, sid, &lang),
                MemoryValue::Object {
                    object: object.clone(),
                    kinds: kinds.clone(),
                },
            );
        }

        let encoded = match self.engine.codec().encode(object) {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(op = "add_obj", kind = %kind, id, error = %err, result = "skipped");
                return AddObjOutcome::Failed;
            }
        };
        let tags: Vec<&str> = kinds.iter().map(|kind| kind.as_str()).collect();
        let classes = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());

        let statement = Statement::new(
            "INSERT OR REPLACE INTO objects
             (type, validtime, id, sid, lang, params, checksum, md5, data, classes)
             VALUES (?, 0, ?, ?, ?, '', ?, ?, ?, ?)",
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(sid)
        .bind(lang)
        .bind(encoded.checksum())
        .bind(encoded.digest)
        .bind(encoded.data)
        .bind(classes);

        let target = self.global_object_target(sid);
        if self.exec_in(target, &[statement]).await || memory_enabled {
            AddObjOutcome::Stored
        } else {
            AddObjOutcome::Failed
        }
    }

    fn add_obj_gate(&self, kind: ObjectKind, id: EntityId, force: bool) -> AddObjOutcome {
        let config = self.engine.config();
        if !self.store.is_enabled() && !force {
            return AddObjOutcome::StoreDisabled;
        }
        if config.task_denied_for_objects(&self.request.task) {
            return AddObjOutcome::TaskDenied;
        }
        if kind == ObjectKind::Entry && !self.is_revalidated(id, kind) {
            return AddObjOutcome::NotRevalidated;
        }
        if !force && !self.request.admin && self.request.elapsed() >= config.object_budget {
            return AddObjOutcome::OverBudget;
        }
        AddObjOutcome::Stored
    }

    /// Read-through lookup. During denylisted tasks only `force` reads.
    pub async fn get_obj(
        &mut self,
        kind: ObjectKind,
        id: EntityId,
        sid: i64,
        force: bool,
    ) -> Option<CachedObject> {
        if !force && self.engine.config().task_denied_for_objects(&self.request.task) {
            counter!("sectio_cache_object_miss_total").increment(1);
            return None;
        }
        let lang = self.language().to_string();

        let memory_key = memory_object_key(kind, id, sid, &lang);
        if let Some(MemoryValue::Object { object, kinds }) = self.engine.memory().get(&memory_key) {
            if object.kind() == kind && kinds.first() == Some(&kind) {
                counter!("sectio_cache_object_hit_total", "tier" => "memory").increment(1);
                self.note_object_hit(kind, id);
                return Some(object);
            }
        }

        let statement = Conditions::new()
            .eq("type", kind.as_str())
            .eq("id", id)
            .eq("sid", sid)
            .eq("lang", lang)
            .select_from(Table::Objects, &["checksum", "data", "classes"]);
        let target = self.global_object_target(sid);
        let row: Option<ObjectRow> = self.query_row_in(target, &statement).await;

        match row.and_then(|row| self.decode_object_row(kind, id, row)) {
            Some(object) => {
                counter!("sectio_cache_object_hit_total", "tier" => "store").increment(1);
                self.note_object_hit(kind, id);
                Some(object)
            }
            None => {
                counter!("sectio_cache_object_miss_total").increment(1);
                None
            }
        }
    }

    fn note_object_hit(&mut self, kind: ObjectKind, id: EntityId) {
        self.dirty.remove(&(kind, id));
        self.deps.record(id);
    }

    fn decode_object_row(&self, kind: ObjectKind, id: EntityId, row: ObjectRow) -> Option<CachedObject> {
        if row.data.is_empty() {
            return None;
        }
        if !Codec::verify(&row.data, &row.checksum) {
            counter!("sectio_cache_checksum_mismatch_total", "table" => "objects").increment(1);
            warn!(
                op = "get_obj",
                kind = %kind,
                id,
                scope = %self.store.scope(),
                result = "checksum_mismatch",
                "Stored object failed its checksum; treating as a miss"
            );
            return None;
        }
        let Some(kinds) = resolve_kinds(&row.classes) else {
            debug!(op = "get_obj", kind = %kind, id, classes = %row.classes, result = "unknown_kind");
            return None;
        };
        if kinds.first() != Some(&kind) {
            return None;
        }
        match self.engine.codec().decode::<CachedObject>(&row.data) {
            Ok(object) if object.kind() == kind => Some(object),
            Ok(object) => {
                debug!(op = "get_obj", expected = %kind, found = %object.kind(), id, result = "kind_mismatch");
                None
            }
            Err(err) => {
                debug!(op = "get_obj", kind = %kind, id, error = %err, result = "undecodable");
                None
            }
        }
    }

    /// Delete `kind` (and kinds it prefixes) for `id`. Entries also drop
    /// their field data and entry rows. Related artifacts are invalidated and
    /// the host page cache is flushed.
    pub async fn delete_obj(&mut self, kind: ObjectKind, id: EntityId, sid: i64, lang: Option<&str>) {
        let lang = lang.map_or_else(|| self.language().to_string(), str::to_string);

        let mut statements = vec![
            Conditions::new()
                .prefix("type", kind.as_str())
                .eq("id", id)
                .eq("sid", sid)
                .eq("lang", &lang)
                .delete_from(Table::Objects),
        ];
        if kind == ObjectKind::Entry {
            statements.push(
                Conditions::new()
                    .eq("type", ObjectKind::FieldData.as_str())
                    .eq("id", id)
                    .eq("lang", &lang)
                    .delete_from(Table::Objects),
            );
            statements.push(
                Conditions::new()
                    .eq("type", ObjectKind::EntryRow.as_str())
                    .eq("id", id)
                    .delete_from(Table::Objects),
            );
        }

        let memory = self.engine.memory();
        for prefixed in kinds_with_prefix(kind) {
            memory.remove(&memory_object_key(prefixed, id, sid, &lang));
        }
        if kind == ObjectKind::Entry {
            for dependent in [ObjectKind::FieldData, ObjectKind::EntryRow] {
                memory.remove_prefix(&format!("{NAMESPACE}obj:{dependent}:{id}:"));
            }
        }

        let target = if sid == GLOBAL_SENTINEL {
            self.global_object_target(sid)
        } else if self.store.scope().is_global() {
            self.owning_section(id).await.map(Scope::Section)
        } else {
            None
        };
        self.exec_in(target, &statements).await;

        let invalidated = self.engine.artifacts().invalidate_by_entity(&[id]).await;
        debug!(op = "delete_obj", kind = %kind, id, sid, artifacts = invalidated);
        self.flush_host().await;
    }

    /// Drop every global object row for `lang`.
    pub async fn delete_global_objs(&mut self, lang: Option<&str>) {
        let lang = lang.map_or_else(|| self.language().to_string(), str::to_string);
        let statement = Conditions::new()
            .eq("sid", GLOBAL_SENTINEL)
            .eq("lang", lang)
            .delete_from(Table::Objects);
        self.engine.memory().remove_prefix(&object_memory_prefix());
        self.exec_in(Some(Scope::Global), &[statement]).await;
    }

    /// Objects keyed to the global sentinel live in the global scope.
    fn global_object_target(&self, sid: i64) -> Option<Scope> {
        (sid == GLOBAL_SENTINEL && !self.store.scope().is_global()).then_some(Scope::Global)
    }

    /// Section owning `id`, if the hierarchy knows it.
    async fn owning_section(&self, id: EntityId) -> Option<SectionId> {
        let resolver = &self.engine.collaborators().resolver;
        let resolved = match resolver.section_of(id).await {
            Ok(section) => Ok(section),
            Err(err) => {
                debug!(op = "owning_section", id, error = %err, "Falling back to hierarchy walk");
                resolver.walk_section_of(id).await
            }
        };
        match resolved {
            Ok(section) => section.filter(|section| *section > 0),
            Err(err) => {
                warn!(
                    op = "owning_section",
                    id,
                    error = %err,
                    "Could not resolve owning section; using the active scope"
                );
                None
            }
        }
    }
}
