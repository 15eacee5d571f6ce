//! Dependency tracking for rendered artifacts.
//!
//! Every entity read while a page renders is recorded so the stored artifact
//! can be invalidated when one of them changes. The session owns a
//! [`DependencyTracker`]; rendering code deep in the call tree records through
//! the task-local installed by [`scope`] without needing the session.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::domain::types::EntityId;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::deps";

tokio::task_local! {
    static CURRENT: DependencyTracker;
}

/// Shared set of entity ids; clones record into the same set.
#[derive(Debug, Clone, Default)]
pub struct DependencyTracker {
    ids: Arc<Mutex<BTreeSet<EntityId>>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: EntityId) {
        if id > 0 {
            mutex_lock(&self.ids, SOURCE, "record").insert(id);
        }
    }

    pub fn extend(&self, ids: impl IntoIterator<Item = EntityId>) {
        let mut guard = mutex_lock(&self.ids, SOURCE, "extend");
        guard.extend(ids.into_iter().filter(|id| *id > 0));
    }

    pub fn snapshot(&self) -> BTreeSet<EntityId> {
        mutex_lock(&self.ids, SOURCE, "snapshot").clone()
    }

    pub fn clear(&self) {
        mutex_lock(&self.ids, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.ids, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record into the tracker installed by [`scope`]; ignored outside one.
pub fn record(id: EntityId) {
    let _ = CURRENT.try_with(|tracker| tracker.record(id));
}

/// Run `future` with `tracker` installed as the task-local recorder.
pub async fn scope<F>(tracker: DependencyTracker, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(tracker, future).await
}
