//! Per-request inputs consulted by the cache tiers.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::domain::types::{EntityId, SectionId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteKind {
    #[default]
    Page,
    /// An entry reached through a link from another page; shares the
    /// artifact of its `details` rendering.
    LinkedEntry,
    List,
    Admin,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub section: SectionId,
    /// Empty means the configured default language.
    pub language: String,
    pub visitor_groups: Vec<i64>,
    pub task: String,
    pub params: BTreeMap<String, String>,
    pub subject_id: Option<EntityId>,
    pub route: RouteKind,
    /// Public-site request, as opposed to a back-office one.
    pub site: bool,
    pub admin: bool,
    pub authenticated: bool,
    /// Skip the artifact tier for this request.
    pub bypass: bool,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(section: SectionId) -> Self {
        Self {
            section,
            language: String::new(),
            visitor_groups: Vec::new(),
            task: String::new(),
            params: BTreeMap::new(),
            subject_id: None,
            route: RouteKind::Page,
            site: true,
            admin: false,
            authenticated: false,
            bypass: false,
            started_at: Instant::now(),
        }
    }

    /// Back-office request, used by maintenance commands.
    pub fn admin(section: SectionId) -> Self {
        Self {
            route: RouteKind::Admin,
            site: false,
            admin: true,
            authenticated: true,
            ..Self::new(section)
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn with_subject(mut self, id: EntityId) -> Self {
        self.subject_id = Some(id);
        self
    }

    pub fn with_route(mut self, route: RouteKind) -> Self {
        self.route = route;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_visitor_groups(mut self, groups: impl IntoIterator<Item = i64>) -> Self {
        self.visitor_groups = groups.into_iter().collect();
        self
    }

    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn bypassing_artifacts(mut self) -> Self {
        self.bypass = true;
        self
    }

    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
