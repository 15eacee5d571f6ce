//! Session-level artifact operations: lookup, staging and storing.

use metrics::counter;
use tracing::warn;

use super::artifacts::ArtifactDocument;
use super::request::RouteKind;
use super::session::CacheSession;

/// Task under which linked entries share their artifact.
const DETAILS_TASK: &str = "details";

impl CacheSession {
    /// True when this request may read or write artifacts.
    pub fn artifacts_eligible(&self) -> bool {
        let config = self.engine.config();
        let request = &self.request;
        config.view.enabled
            && self.engine.artifacts().is_available()
            && !request.bypass
            && !(request.authenticated && config.view.bypass_authenticated)
            && !config.task_denied_for_views(&request.task)
            && !config.task_denied_for_objects(&request.task)
    }

    /// Look up the artifact for this request.
    pub async fn view(&mut self) -> Option<ArtifactDocument> {
        if !self.artifacts_eligible() {
            return None;
        }

        let fingerprint = self.fingerprint().clone();
        let mut hit = None;
        if self.request.route == RouteKind::LinkedEntry {
            hit = self
                .engine
                .artifacts()
                .lookup(&fingerprint.with_task(DETAILS_TASK))
                .await;
        }
        if hit.is_none() {
            hit = self.engine.artifacts().lookup(&fingerprint).await;
        }

        match hit {
            Some(document) => {
                counter!("sectio_cache_artifact_hit_total").increment(1);
                self.served = true;
                Some(document)
            }
            None => {
                counter!("sectio_cache_artifact_miss_total").increment(1);
                None
            }
        }
    }

    /// Stage the composed document; the first one staged wins.
    pub fn add_artifact(&mut self, document: ArtifactDocument) {
        if self.staged.is_none() {
            self.staged = Some(document);
        }
    }

    /// Persist the staged document. Returns the artifact id when stored.
    pub async fn store_artifact(&mut self) -> Option<String> {
        if self.served || self.stored || !self.artifacts_eligible() {
            return None;
        }
        let document = self.staged.take()?;

        let fingerprint = self.fingerprint().clone();
        let mut relations = self.deps.snapshot();
        if let Some(subject) = self.request.subject_id.filter(|id| *id > 0) {
            relations.insert(subject);
        }

        match self
            .engine
            .artifacts()
            .insert(&fingerprint, document, &relations)
            .await
        {
            Ok(Some(artifact_id)) => {
                self.stored = true;
                Some(artifact_id)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(
                    op = "store_artifact",
                    session = %self.id,
                    error = %err,
                    "Failed to store artifact"
                );
                None
            }
        }
    }

    pub fn artifact_served(&self) -> bool {
        self.served
    }

    pub fn artifact_stored(&self) -> bool {
        self.stored
    }
}
