//! Process-wide cache engine.
//!
//! Built once at startup: it probes the store driver, picks the memory tier
//! implementation and opens the artifact metadata database. Requests open a
//! [`CacheSession`] from it.

use std::sync::Arc;

use tracing::info;

use crate::infra::error::InfraError;

use super::artifacts::ArtifactCache;
use super::codec::Codec;
use super::config::CacheConfig;
use super::driver::{self, Driver, DriverProbe};
use super::gc::FileGc;
use super::host::Collaborators;
use super::memory::{self, MemoryCache};
use super::request::RequestContext;
use super::session::CacheSession;
use super::trees::CategoryTrees;

pub struct CacheEngine {
    config: CacheConfig,
    probe: DriverProbe,
    memory: Arc<dyn MemoryCache>,
    codec: Codec,
    artifacts: ArtifactCache,
    trees: CategoryTrees,
    gc: FileGc,
    collaborators: Collaborators,
}

impl CacheEngine {
    pub async fn open(config: CacheConfig) -> Result<Arc<Self>, InfraError> {
        Self::open_with(config, Collaborators::default()).await
    }

    /// Fails only when the cache root cannot be created or the artifact
    /// metadata database cannot be opened.
    pub async fn open_with(
        config: CacheConfig,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, InfraError> {
        std::fs::create_dir_all(config.root()).map_err(|err| {
            InfraError::configuration(format!(
                "cannot create cache root `{}`: {err}",
                config.root().display()
            ))
        })?;

        let probe = driver::probe(&config).await;
        let artifacts = ArtifactCache::open(&config, probe.driver()).await?;
        let engine = Self {
            memory: memory::from_config(&config),
            codec: Codec::new(config.codec.clone()),
            trees: CategoryTrees::new(config.trees_dir()),
            gc: FileGc::new(config.gc_max_age),
            probe,
            artifacts,
            collaborators,
            config,
        };

        info!(
            op = "engine_open",
            root = %engine.config.root().display(),
            driver = engine.driver().map_or("none", Driver::name),
            memory = engine.memory.enabled(),
            artifacts = engine.artifacts.is_available(),
            "Cache engine ready"
        );
        Ok(Arc::new(engine))
    }

    pub async fn session(self: &Arc<Self>, request: RequestContext) -> CacheSession {
        CacheSession::open(Arc::clone(self), request).await
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn driver(&self) -> Option<Driver> {
        self.probe.driver()
    }

    pub fn probe(&self) -> &DriverProbe {
        &self.probe
    }

    pub fn store_enabled(&self) -> bool {
        self.driver().is_some()
    }

    pub fn memory(&self) -> &Arc<dyn MemoryCache> {
        &self.memory
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn artifacts(&self) -> &ArtifactCache {
        &self.artifacts
    }

    pub fn trees(&self) -> &CategoryTrees {
        &self.trees
    }

    pub fn gc(&self) -> &FileGc {
        &self.gc
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }
}
