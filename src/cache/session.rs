//! Per-request cache session.
//!
//! A session owns the single active scope store, the dirty flags, the
//! dependency tracker and the per-request artifact state. All operations take
//! `&mut self`; scope switches are sequential (switch, act, switch back).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::types::{EntityId, ObjectKind, Scope};

use super::artifacts::ArtifactDocument;
use super::deps::DependencyTracker;
use super::engine::CacheEngine;
use super::fingerprint::Fingerprint;
use super::request::RequestContext;
use super::store::CacheStore;

pub struct CacheSession {
    pub(crate) id: Uuid,
    pub(crate) engine: Arc<CacheEngine>,
    pub(crate) request: RequestContext,
    pub(crate) store: CacheStore,
    pub(crate) dirty: HashSet<(ObjectKind, EntityId)>,
    pub(crate) deps: DependencyTracker,
    pub(crate) fingerprint: Option<Fingerprint>,
    pub(crate) staged: Option<ArtifactDocument>,
    pub(crate) served: bool,
    pub(crate) stored: bool,
    host_flushed: bool,
}

impl CacheSession {
    pub(crate) async fn open(engine: Arc<CacheEngine>, request: RequestContext) -> Self {
        let scope = Scope::from_section(request.section);
        let store = CacheStore::open(scope, engine.config().scopes_dir(), engine.driver()).await;
        let id = Uuid::new_v4();
        debug!(
            op = "session_open",
            session = %id,
            scope = %scope,
            store_enabled = store.is_enabled()
        );
        Self {
            id,
            engine,
            request,
            store,
            dirty: HashSet::new(),
            deps: DependencyTracker::new(),
            fingerprint: None,
            staged: None,
            served: false,
            stored: false,
            host_flushed: false,
        }
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn scope(&self) -> Scope {
        self.store.scope()
    }

    pub fn store_enabled(&self) -> bool {
        self.store.is_enabled()
    }

    /// Request language, or the configured default.
    pub fn language(&self) -> &str {
        if self.request.language.is_empty() {
            &self.engine.config().default_language
        } else {
            &self.request.language
        }
    }

    /// Tracker handed to the rendering pipeline; see [`super::deps::scope`].
    pub fn tracker(&self) -> DependencyTracker {
        self.deps.clone()
    }

    pub fn record_dependency(&self, id: EntityId) {
        self.deps.record(id);
    }

    /// Fingerprint of this request, computed once.
    pub fn fingerprint(&mut self) -> &Fingerprint {
        let language = self.language().to_string();
        let request = &self.request;
        let include_params = &self.engine.config().view.include_params;
        self.fingerprint
            .get_or_insert_with(|| Fingerprint::from_request(request, &language, include_params))
    }

    /// Switch the active store to `scope`, returning the previous scope.
    pub(crate) async fn switch_scope(&mut self, scope: Scope) -> Scope {
        let previous = self.store.scope();
        if previous != scope {
            self.store.reopen(scope).await;
        }
        previous
    }

    /// Flush the host page cache, at most once per session.
    pub async fn flush_host(&mut self) {
        if self.host_flushed {
            return;
        }
        self.host_flushed = true;
        self.engine.collaborators().page_cache.flush().await;
    }

    /// Close the store handle. Dropping a session without calling this only
    /// delays closing the connection until the pool is dropped.
    pub async fn finish(mut self) {
        self.store.close().await;
        debug!(
            op = "session_finish",
            session = %self.id,
            served = self.served,
            stored = self.stored,
            dependencies = self.deps.len()
        );
    }
}
