//! Collaborators supplied by the host application.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::{EntityId, SectionId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("entity {0} is unknown to the hierarchy")]
    NotFound(EntityId),
    #[error("hierarchy lookup is not supported")]
    Unsupported,
    #[error("hierarchy lookup failed: {0}")]
    Backend(String),
}

/// Maps an entity to the section that owns it.
#[async_trait]
pub trait HierarchyResolver: Send + Sync {
    async fn section_of(&self, id: EntityId) -> Result<Option<SectionId>, ResolveError>;

    /// Slow path walking parents one by one; used when `section_of` fails.
    async fn walk_section_of(&self, _id: EntityId) -> Result<Option<SectionId>, ResolveError> {
        Err(ResolveError::Unsupported)
    }
}

/// Full-page cache maintained by the host.
#[async_trait]
pub trait HostPageCache: Send + Sync {
    async fn flush(&self);
}

/// Queue of pending system messages shown to administrators.
#[async_trait]
pub trait SystemMessages: Send + Sync {
    async fn reset(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl HierarchyResolver for NoopResolver {
    async fn section_of(&self, _id: EntityId) -> Result<Option<SectionId>, ResolveError> {
        Ok(None)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPageCache;

#[async_trait]
impl HostPageCache for NoopPageCache {
    async fn flush(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessages;

#[async_trait]
impl SystemMessages for NoopMessages {
    async fn reset(&self) {}
}

#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn HierarchyResolver>,
    pub page_cache: Arc<dyn HostPageCache>,
    pub messages: Arc<dyn SystemMessages>,
}

impl Collaborators {
    pub fn with_resolver(mut self, resolver: Arc<dyn HierarchyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_page_cache(mut self, page_cache: Arc<dyn HostPageCache>) -> Self {
        self.page_cache = page_cache;
        self
    }

    pub fn with_messages(mut self, messages: Arc<dyn SystemMessages>) -> Self {
        self.messages = messages;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            resolver: Arc::new(NoopResolver),
            page_cache: Arc::new(NoopPageCache),
            messages: Arc::new(NoopMessages),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
