use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sectio::cache::{
    AddObjOutcome, ArtifactDocument, CATEGORY_TREE_ADMIN_VAR, CATEGORY_TREE_FRONT_VAR, CacheConfig,
    CacheEngine, Codec, CodecConfig, Collaborators, HierarchyResolver, HostPageCache,
    RequestContext, ResolveError, VarKey, VarLookup, scope_path,
};
use sectio::domain::entities::{
    CachedObject, CategoryNode, EntryRecord, EntryRowRecord, FieldDataRecord, SectionRecord,
};
use sectio::domain::types::{EntityId, GLOBAL_SENTINEL, ObjectKind, Scope, SectionId};
use serde_json::json;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use time::OffsetDateTime;

fn entry(id: EntityId, section: SectionId, title: &str) -> CachedObject {
    CachedObject::Entry(EntryRecord {
        id,
        section,
        category_id: None,
        title: title.to_string(),
        alias: title.to_lowercase().replace(' ', "-"),
        published: true,
        fields: BTreeMap::new(),
        created_at: OffsetDateTime::now_utc(),
        updated_at: OffsetDateTime::now_utc(),
    })
}

fn field_data(id: EntityId) -> CachedObject {
    CachedObject::FieldData(FieldDataRecord {
        entry_id: id,
        lang: "en".to_string(),
        values: BTreeMap::from([("summary".to_string(), "hello".to_string())]),
    })
}

fn entry_row(id: EntityId, section: SectionId) -> CachedObject {
    CachedObject::EntryRow(EntryRowRecord {
        entry_id: id,
        section,
        columns: BTreeMap::new(),
    })
}

fn section(id: SectionId, title: &str) -> CachedObject {
    CachedObject::Section(SectionRecord {
        id,
        title: title.to_string(),
        params: BTreeMap::new(),
    })
}

async fn raw_pool(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().filename(path))
        .await
        .expect("raw sqlite pool")
}

#[derive(Default)]
struct CountingPageCache {
    flushes: AtomicUsize,
}

#[async_trait]
impl HostPageCache for CountingPageCache {
    async fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fast lookup is down; only the hierarchy walk answers.
struct WalkingResolver(SectionId);

#[async_trait]
impl HierarchyResolver for WalkingResolver {
    async fn section_of(&self, _id: EntityId) -> Result<Option<SectionId>, ResolveError> {
        Err(ResolveError::Backend("index offline".to_string()))
    }

    async fn walk_section_of(&self, _id: EntityId) -> Result<Option<SectionId>, ResolveError> {
        Ok(Some(self.0))
    }
}

struct FixedResolver(SectionId);

#[async_trait]
impl HierarchyResolver for FixedResolver {
    async fn section_of(&self, _id: EntityId) -> Result<Option<SectionId>, ResolveError> {
        Ok(Some(self.0))
    }
}

#[tokio::test]
async fn vars_round_trip_and_remember_falsy_values() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(1)).await;
    session.add_var(&json!({"items": [1, 2, 3]}), &VarKey::new("menu", 0)).await;
    session.add_var(&Vec::<u32>::new(), &VarKey::new("empty", 0)).await;
    session.finish().await;

    let mut session = engine.session(RequestContext::new(1)).await;
    assert_eq!(
        session.get_var::<serde_json::Value>(&VarKey::new("menu", 0)).await,
        VarLookup::Hit(json!({"items": [1, 2, 3]}))
    );
    assert_eq!(
        session.get_var::<Vec<u32>>(&VarKey::new("empty", 0)).await,
        VarLookup::NoValue
    );
    assert!(session.get_var::<String>(&VarKey::new("absent", 0)).await.is_miss());
    session.finish().await;
}

#[tokio::test]
async fn tampered_rows_read_as_misses() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig::new(dir.path());
    let scopes_dir = config.scopes_dir();
    let engine = CacheEngine::open(config).await.expect("engine");

    let mut session = engine.session(RequestContext::new(3)).await;
    session.add_var(&"trusted", &VarKey::new("banner", 0)).await;
    session.finish().await;

    let forged = Codec::new(CodecConfig::default())
        .encode(&json!({"state": "value", "value": "forged"}))
        .expect("encode");
    let pool = raw_pool(&scope_path(&scopes_dir, Scope::Section(3))).await;
    sqlx::query("UPDATE vars SET data = ? WHERE name = 'banner'")
        .bind(&forged.data)
        .execute(&pool)
        .await
        .expect("tamper");
    pool.close().await;

    let mut session = engine.session(RequestContext::new(3)).await;
    assert!(session.get_var::<String>(&VarKey::new("banner", 0)).await.is_miss());
    session.finish().await;
}

#[tokio::test]
async fn rewriting_a_key_keeps_one_row() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig::new(dir.path());
    let scopes_dir = config.scopes_dir();
    let engine = CacheEngine::open(config).await.expect("engine");

    let mut session = engine.session(RequestContext::new(2)).await;
    session.add_var(&"first", &VarKey::new("title", 0)).await;
    session.add_var(&"second", &VarKey::new("title", 0)).await;
    assert_eq!(
        session.get_var::<String>(&VarKey::new("title", 0)).await,
        VarLookup::Hit("second".to_string())
    );
    session.finish().await;

    let pool = raw_pool(&scope_path(&scopes_dir, Scope::Section(2))).await;
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vars WHERE name = 'title'")
        .fetch_one(&pool)
        .await
        .expect("count");
    pool.close().await;
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn sections_do_not_see_each_other() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(1)).await;
    session.add_var(&"one", &VarKey::new("motd", 1)).await;
    session.add_var(&"shared", &VarKey::global("motd")).await;
    session.finish().await;

    let mut session = engine.session(RequestContext::new(2)).await;
    assert!(session.get_var::<String>(&VarKey::new("motd", 1)).await.is_miss());
    assert_eq!(
        session.get_var::<String>(&VarKey::global("motd")).await,
        VarLookup::Hit("shared".to_string())
    );
    session.finish().await;
}

#[tokio::test]
async fn entries_need_revalidation_before_caching() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");
    let object = entry(7, 1, "Opening hours");

    let mut session = engine.session(RequestContext::new(1)).await;
    assert_eq!(
        session.add_obj(&object, 7, 1, false).await,
        AddObjOutcome::NotRevalidated
    );
    session.revalidate(7, ObjectKind::Entry);
    assert_eq!(session.add_obj(&object, 7, 1, false).await, AddObjOutcome::Stored);
    session.finish().await;

    let mut session = engine.session(RequestContext::new(1)).await;
    session.revalidate(7, ObjectKind::Entry);
    assert_eq!(
        session.get_obj(ObjectKind::Entry, 7, 1, false).await,
        Some(object)
    );
    assert!(!session.is_revalidated(7, ObjectKind::Entry));
    session.finish().await;
}

#[tokio::test]
async fn denylisted_tasks_skip_the_object_tier() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");
    let object = entry(9, 1, "Form");

    let mut session = engine.session(RequestContext::new(1)).await;
    session.revalidate(9, ObjectKind::Entry);
    session.add_obj(&object, 9, 1, false).await;
    session.finish().await;

    let mut session = engine.session(RequestContext::new(1).with_task("entry.save")).await;
    session.revalidate(9, ObjectKind::Entry);
    assert_eq!(
        session.add_obj(&object, 9, 1, false).await,
        AddObjOutcome::TaskDenied
    );
    assert!(session.get_obj(ObjectKind::Entry, 9, 1, false).await.is_none());
    assert!(session.get_obj(ObjectKind::Entry, 9, 1, true).await.is_some());
    session.finish().await;
}

#[tokio::test]
async fn deleting_an_entry_cascades_to_its_field_data_and_rows() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(4)).await;
    session.revalidate(11, ObjectKind::Entry);
    session.add_obj(&entry(11, 4, "Menu"), 11, 4, false).await;
    session.add_obj(&field_data(11), 11, 4, false).await;
    session.add_obj(&entry_row(11, 4), 11, 4, false).await;
    session.add_obj(&field_data(12), 12, 4, false).await;

    session.delete_obj(ObjectKind::Entry, 11, 4, None).await;

    for kind in [ObjectKind::Entry, ObjectKind::FieldData, ObjectKind::EntryRow] {
        assert!(session.get_obj(kind, 11, 4, false).await.is_none(), "{kind} survived");
    }
    assert!(session.get_obj(ObjectKind::FieldData, 12, 4, false).await.is_some());
    session.finish().await;
}

#[tokio::test]
async fn global_deletes_reach_the_owning_section() {
    let dir = TempDir::new().expect("temp dir");
    let collaborators = Collaborators::default().with_resolver(Arc::new(FixedResolver(5)));
    let engine = CacheEngine::open_with(CacheConfig::new(dir.path()), collaborators)
        .await
        .expect("engine");

    let mut session = engine.session(RequestContext::new(5)).await;
    session.revalidate(21, ObjectKind::Entry);
    session.add_obj(&entry(21, 5, "Moved"), 21, 5, false).await;
    session.finish().await;

    let mut session = engine.session(RequestContext::admin(0)).await;
    session.delete_obj(ObjectKind::Entry, 21, 5, Some("en")).await;
    session.finish().await;

    let mut session = engine.session(RequestContext::new(5)).await;
    assert!(session.get_obj(ObjectKind::Entry, 21, 5, false).await.is_none());
    session.finish().await;
}

#[tokio::test]
async fn invalidation_only_touches_related_artifacts() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(1).with_task("view")).await;
    session.record_dependency(10);
    session.add_artifact(ArtifactDocument::new("<p>ten</p>"));
    assert!(session.store_artifact().await.is_some());
    session.finish().await;

    let mut session = engine.session(RequestContext::new(1).with_task("teaser")).await;
    session.record_dependency(11);
    session.add_artifact(ArtifactDocument::new("<p>eleven</p>"));
    assert!(session.store_artifact().await.is_some());
    session.finish().await;

    let mut admin = engine.session(RequestContext::admin(1)).await;
    admin.delete_obj(ObjectKind::Entry, 10, 1, None).await;
    admin.finish().await;

    let mut session = engine.session(RequestContext::new(1).with_task("view")).await;
    assert!(session.view().await.is_none());
    session.finish().await;

    let mut session = engine.session(RequestContext::new(1).with_task("teaser")).await;
    assert_eq!(
        session.view().await.map(|document| document.body),
        Some("<p>eleven</p>".to_string())
    );
    session.finish().await;
}

#[tokio::test]
async fn clean_all_empties_every_tier() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig::new(dir.path());
    let scopes_dir = config.scopes_dir();
    let engine = CacheEngine::open(config).await.expect("engine");

    let mut session = engine.session(RequestContext::new(6).with_task("view")).await;
    session.add_var(&"kept?", &VarKey::new("motd", 0)).await;
    session.add_artifact(ArtifactDocument::new("<p>page</p>"));
    assert!(session.store_artifact().await.is_some());
    session.finish().await;
    assert_eq!(engine.artifacts().count().await, 1);

    let mut admin = engine.session(RequestContext::admin(0)).await;
    admin.clean_all().await;
    admin.finish().await;

    assert!(!scope_path(&scopes_dir, Scope::Section(6)).exists());
    assert_eq!(engine.artifacts().count().await, 0);

    let mut session = engine.session(RequestContext::new(6)).await;
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    session.finish().await;
}

#[tokio::test]
async fn clean_section_leaves_other_sections_alone() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    for section in [1, 2] {
        let mut session = engine.session(RequestContext::new(section)).await;
        session.add_var(&"value", &VarKey::new("motd", 0)).await;
        session.finish().await;
    }

    let mut admin = engine.session(RequestContext::admin(1)).await;
    let report = admin.clean_section(1, false).await;
    admin.finish().await;
    assert!(report.store_cleared);

    let mut session = engine.session(RequestContext::new(1)).await;
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    session.finish().await;

    let mut session = engine.session(RequestContext::new(2)).await;
    assert_eq!(
        session.get_var::<String>(&VarKey::new("motd", 0)).await,
        VarLookup::Hit("value".to_string())
    );
    session.finish().await;
}

#[tokio::test]
async fn corrupt_store_fails_soft_and_recovers() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig::new(dir.path());
    let path = scope_path(&config.scopes_dir(), Scope::Section(8));
    let engine = CacheEngine::open(config).await.expect("engine");

    std::fs::create_dir_all(path.parent().expect("scopes dir")).expect("scopes dir");
    std::fs::write(&path, vec![0x42; 4096]).expect("write garbage");

    let mut session = engine.session(RequestContext::new(8)).await;
    assert!(!session.store_enabled());
    session.add_var(&"lost", &VarKey::new("motd", 0)).await;
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    session.revalidate(1, ObjectKind::Entry);
    assert_eq!(
        session.add_obj(&entry(1, 8, "Lost"), 1, 8, false).await,
        AddObjOutcome::StoreDisabled
    );
    session.finish().await;

    let mut session = engine.session(RequestContext::new(8)).await;
    assert!(session.store_enabled());
    session.add_var(&"kept", &VarKey::new("motd", 0)).await;
    assert_eq!(
        session.get_var::<String>(&VarKey::new("motd", 0)).await,
        VarLookup::Hit("kept".to_string())
    );
    session.finish().await;
}

#[tokio::test]
async fn host_page_cache_is_flushed_once_per_session() {
    let dir = TempDir::new().expect("temp dir");
    let page_cache = Arc::new(CountingPageCache::default());
    let collaborators = Collaborators::default().with_page_cache(page_cache.clone());
    let engine = CacheEngine::open_with(CacheConfig::new(dir.path()), collaborators)
        .await
        .expect("engine");

    let mut admin = engine.session(RequestContext::admin(1)).await;
    admin.delete_obj(ObjectKind::Entry, 1, 1, None).await;
    admin.delete_obj(ObjectKind::Category, 2, 1, None).await;
    admin.clean_section(1, true).await;
    admin.finish().await;
    assert_eq!(page_cache.flushes.load(Ordering::SeqCst), 1);

    let mut admin = engine.session(RequestContext::admin(1)).await;
    admin.delete_obj(ObjectKind::Entry, 1, 1, None).await;
    admin.finish().await;
    assert_eq!(page_cache.flushes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn delete_var_handles_exact_prefix_and_global_keys() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");
    let mut session = engine.session(RequestContext::new(1)).await;

    session.add_var(&"main", &VarKey::new("menu", 0)).await;
    session.add_var(&"footer", &VarKey::new("menu_footer", 0)).await;
    session.add_var(&"side", &VarKey::new("sidebar", 0)).await;
    session.delete_var(&VarKey::new("menu", 0)).await;
    assert!(session.get_var::<String>(&VarKey::new("menu", 0)).await.is_miss());
    assert_eq!(
        session.get_var::<String>(&VarKey::new("menu_footer", 0)).await,
        VarLookup::Hit("footer".to_string())
    );

    session.add_var(&"main", &VarKey::new("menu", 0)).await;
    session.delete_var(&VarKey::new("menu", 0).with_sid(1)).await;
    assert!(session.get_var::<String>(&VarKey::new("menu", 0)).await.is_miss());
    assert!(session.get_var::<String>(&VarKey::new("menu_footer", 0)).await.is_miss());
    assert_eq!(
        session.get_var::<String>(&VarKey::new("sidebar", 0)).await,
        VarLookup::Hit("side".to_string())
    );

    session.add_var(&"site-wide", &VarKey::global("banner")).await;
    session.add_var(&"local", &VarKey::new("banner", 0)).await;
    session.delete_var(&VarKey::global("banner")).await;
    assert_eq!(session.scope(), Scope::Section(1));
    assert!(session.get_var::<String>(&VarKey::global("banner")).await.is_miss());
    assert_eq!(
        session.get_var::<String>(&VarKey::new("banner", 0)).await,
        VarLookup::Hit("local".to_string())
    );
    session.finish().await;
}

#[tokio::test]
async fn global_objects_live_in_the_global_scope() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(1)).await;
    assert_eq!(
        session.add_obj(&section(3, "Shared"), 3, GLOBAL_SENTINEL, false).await,
        AddObjOutcome::Stored
    );
    session.add_obj(&section(4, "Local"), 4, 1, false).await;
    session.finish().await;

    let mut global = engine.session(RequestContext::admin(0)).await;
    assert!(global.get_obj(ObjectKind::Section, 3, GLOBAL_SENTINEL, false).await.is_some());
    global.finish().await;

    let mut session = engine.session(RequestContext::new(1)).await;
    session.delete_global_objs(None).await;
    assert_eq!(session.scope(), Scope::Section(1));
    assert!(session.get_obj(ObjectKind::Section, 3, GLOBAL_SENTINEL, false).await.is_none());
    assert!(session.get_obj(ObjectKind::Section, 4, 1, false).await.is_some());
    session.finish().await;
}

#[tokio::test]
async fn purge_section_vars_keeps_objects_and_detail_artifacts() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(2).with_task("list_recent")).await;
    session.add_var(&"hello", &VarKey::new("motd", 0)).await;
    session.add_obj(&section(2, "News"), 2, 2, false).await;
    session.add_artifact(ArtifactDocument::new("<ul>recent</ul>"));
    assert!(session.store_artifact().await.is_some());
    session.finish().await;

    let mut session = engine.session(RequestContext::new(2).with_task("details")).await;
    session.add_artifact(ArtifactDocument::new("<article>entry</article>"));
    assert!(session.store_artifact().await.is_some());
    session.finish().await;

    let mut admin = engine.session(RequestContext::admin(2)).await;
    assert_eq!(admin.purge_section_vars(2).await, 1);
    admin.finish().await;

    let mut session = engine.session(RequestContext::new(2).with_task("list_recent")).await;
    assert!(session.view().await.is_none());
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    assert!(session.get_obj(ObjectKind::Section, 2, 2, false).await.is_some());
    session.finish().await;

    let mut session = engine.session(RequestContext::new(2).with_task("details")).await;
    assert!(session.view().await.is_some());
    session.finish().await;
}

#[tokio::test]
async fn clean_categories_drops_trees_and_their_vars() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");
    let tree = vec![CategoryNode {
        id: 30,
        title: "Food".to_string(),
        path: "food".to_string(),
        children: Vec::new(),
    }];
    engine.trees().write(3, "en", &tree).expect("write tree");
    engine.trees().write(4, "en", &tree).expect("write tree");

    let mut session = engine.session(RequestContext::new(3)).await;
    session.add_var(&tree, &VarKey::new(CATEGORY_TREE_ADMIN_VAR, 3)).await;
    session.add_var(&tree, &VarKey::new(CATEGORY_TREE_FRONT_VAR, 3)).await;
    session.add_var(&"kept", &VarKey::new("motd", 3)).await;

    session.clean_categories(3).await;
    assert!(engine.trees().read(3, "en").is_none());
    assert!(engine.trees().read(4, "en").is_some());
    for name in [CATEGORY_TREE_ADMIN_VAR, CATEGORY_TREE_FRONT_VAR] {
        assert!(
            session.get_var::<Vec<CategoryNode>>(&VarKey::new(name, 3)).await.is_miss(),
            "{name} survived"
        );
    }
    assert_eq!(
        session.get_var::<String>(&VarKey::new("motd", 3)).await,
        VarLookup::Hit("kept".to_string())
    );

    session.clean_categories(0).await;
    assert!(engine.trees().read(4, "en").is_none());
    session.finish().await;
}

#[tokio::test]
async fn slow_requests_skip_the_object_tier_unless_admin_or_forced() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");
    let long_ago = Instant::now()
        .checked_sub(Duration::from_secs(5))
        .expect("instant in the past");
    let object = section(1, "News");

    let mut session = engine.session(RequestContext::new(1).started_at(long_ago)).await;
    assert_eq!(
        session.add_obj(&object, 1, 1, false).await,
        AddObjOutcome::OverBudget
    );
    assert_eq!(session.add_obj(&object, 1, 1, true).await, AddObjOutcome::Stored);
    session.finish().await;

    let mut admin = engine.session(RequestContext::admin(1).started_at(long_ago)).await;
    assert_eq!(admin.add_obj(&object, 1, 1, false).await, AddObjOutcome::Stored);
    admin.finish().await;
}

#[tokio::test]
async fn tampered_objects_read_as_misses() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig::new(dir.path());
    let scopes_dir = config.scopes_dir();
    let engine = CacheEngine::open(config).await.expect("engine");

    let mut session = engine.session(RequestContext::new(3)).await;
    session.add_obj(&section(3, "Genuine"), 3, 3, false).await;
    session.finish().await;

    let forged = Codec::new(CodecConfig::default())
        .encode(&section(3, "Forged"))
        .expect("encode");
    let pool = raw_pool(&scope_path(&scopes_dir, Scope::Section(3))).await;
    sqlx::query("UPDATE objects SET data = ? WHERE id = 3")
        .bind(&forged.data)
        .execute(&pool)
        .await
        .expect("tamper");
    pool.close().await;

    let mut session = engine.session(RequestContext::new(3)).await;
    assert!(session.get_obj(ObjectKind::Section, 3, 3, false).await.is_none());
    session.finish().await;
}

#[tokio::test]
async fn global_deletes_fall_back_to_the_hierarchy_walk() {
    let dir = TempDir::new().expect("temp dir");
    let collaborators = Collaborators::default().with_resolver(Arc::new(WalkingResolver(6)));
    let engine = CacheEngine::open_with(CacheConfig::new(dir.path()), collaborators)
        .await
        .expect("engine");

    let mut session = engine.session(RequestContext::new(6)).await;
    session.revalidate(31, ObjectKind::Entry);
    session.add_obj(&entry(31, 6, "Walked"), 31, 6, false).await;
    session.finish().await;

    let mut admin = engine.session(RequestContext::admin(0)).await;
    admin.delete_obj(ObjectKind::Entry, 31, 6, None).await;
    assert_eq!(admin.scope(), Scope::Global);
    admin.finish().await;

    let mut session = engine.session(RequestContext::new(6)).await;
    assert!(session.get_obj(ObjectKind::Entry, 31, 6, false).await.is_none());
    session.finish().await;
}

#[tokio::test]
async fn store_failure_mid_session_turns_later_reads_into_misses() {
    let dir = TempDir::new().expect("temp dir");
    let config = CacheConfig::new(dir.path());
    let path = scope_path(&config.scopes_dir(), Scope::Section(9));
    let engine = CacheEngine::open(config).await.expect("engine");

    let mut session = engine.session(RequestContext::new(9)).await;
    session.add_var(&"before", &VarKey::new("motd", 0)).await;
    session.add_obj(&section(9, "Before"), 9, 9, false).await;

    let pool = raw_pool(&path).await;
    sqlx::query("DROP TABLE objects").execute(&pool).await.expect("drop table");
    pool.close().await;

    assert_eq!(
        session.add_obj(&section(9, "After"), 9, 9, false).await,
        AddObjOutcome::Failed
    );
    assert!(!session.store_enabled());
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    assert!(session.get_obj(ObjectKind::Section, 9, 9, false).await.is_none());
    session.finish().await;

    let mut session = engine.session(RequestContext::new(9)).await;
    assert!(session.store_enabled());
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    session.finish().await;
}

#[tokio::test]
async fn clean_section_zero_means_the_active_section() {
    let dir = TempDir::new().expect("temp dir");
    let engine = CacheEngine::open(CacheConfig::new(dir.path())).await.expect("engine");

    let mut session = engine.session(RequestContext::new(1)).await;
    session.add_var(&"local", &VarKey::new("motd", 0)).await;
    session.add_var(&"site-wide", &VarKey::global("motd")).await;
    session.finish().await;

    let mut admin = engine.session(RequestContext::admin(1)).await;
    assert!(admin.clean_section(0, false).await.store_cleared);
    admin.finish().await;

    let mut session = engine.session(RequestContext::new(1)).await;
    assert!(session.get_var::<String>(&VarKey::new("motd", 0)).await.is_miss());
    assert_eq!(
        session.get_var::<String>(&VarKey::global("motd")).await,
        VarLookup::Hit("site-wide".to_string())
    );
    session.finish().await;
}
