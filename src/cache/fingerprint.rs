//! Request fingerprints identifying rendered artifacts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::types::{EntityId, SectionId};

use super::request::RequestContext;

/// Parameters that never distinguish one rendering from another unless
/// explicitly re-included through `view.include_params`.
pub const RESERVED_PARAMS: [&str; 11] = [
    "route", "item", "session", "token", "format", "tmpl", "debug", "lang", "start", "limit",
    "nocache",
];

/// Inputs that select a rendered artifact.
///
/// Field order and the `BTreeMap` keep the serialized form canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub section: SectionId,
    pub subject_id: Option<EntityId>,
    pub task: String,
    pub site: bool,
    pub params: BTreeMap<String, String>,
    pub language: String,
    pub visitor_groups: Vec<i64>,
}

impl Fingerprint {
    pub fn from_request(request: &RequestContext, language: &str, include_params: &[String]) -> Self {
        let params = request
            .params
            .iter()
            .filter(|(key, _)| {
                let key = key.to_ascii_lowercase();
                !RESERVED_PARAMS.contains(&key.as_str())
                    || include_params.iter().any(|kept| kept.eq_ignore_ascii_case(&key))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut visitor_groups = request.visitor_groups.clone();
        visitor_groups.sort_unstable();
        visitor_groups.dedup();

        Self {
            section: request.section,
            subject_id: request.subject_id,
            task: request.task.clone(),
            site: request.site,
            params,
            language: language.to_string(),
            visitor_groups,
        }
    }

    pub fn with_task(&self, task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..self.clone()
        }
    }

    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// SHA-256 of the canonical JSON, lowercase hex.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}
