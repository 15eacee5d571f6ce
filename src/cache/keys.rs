//! Cache key definitions.
//!
//! `VarKey` addresses persisted var rows; the `memory_*` helpers
//! build the namespaced string keys used by the in-process tier.

use crate::domain::types::{EntityId, GLOBAL_SENTINEL, ObjectKind, SectionId};

/// Marker shared by every memory-tier key this engine writes.
pub const NAMESPACE: &str = "sectio:";

/// Address of a named value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarKey {
    pub name: String,
    /// Sub-scope id; `0` means "same as `section`".
    pub sid: i64,
    /// Empty means the session language.
    pub lang: String,
    pub section: SectionId,
}

impl VarKey {
    pub fn new(name: impl Into<String>, section: SectionId) -> Self {
        Self {
            name: name.into(),
            sid: 0,
            lang: String::new(),
            section,
        }
    }

    /// Key of a value owned by the global scope.
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(name, GLOBAL_SENTINEL)
    }

    pub fn with_sid(mut self, sid: i64) -> Self {
        self.sid = sid;
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// `sid`, or `section` when no sid was given.
    pub fn effective_sid(&self) -> i64 {
        if self.sid != 0 { self.sid } else { self.section }
    }

    /// A non-zero sid turns deletes into name-prefix deletes.
    pub fn is_prefix_delete(&self) -> bool {
        self.sid != 0
    }
}

pub fn memory_var_key(sid: i64, name: &str, lang: &str) -> String {
    format!("{NAMESPACE}var:{sid}:{name}:{lang}")
}

/// Prefix covering every language of every var in `sid` whose name starts with `name`.
pub fn memory_var_prefix(sid: i64, name: &str) -> String {
    format!("{NAMESPACE}var:{sid}:{name}")
}

pub fn memory_object_key(kind: ObjectKind, id: EntityId, sid: i64, lang: &str) -> String {
    format!("{NAMESPACE}obj:{kind}:{id}:{sid}:{lang}")
}

/// Kinds whose tag starts with `prefix`, mirroring the `type` prefix delete.
pub fn kinds_with_prefix(prefix: ObjectKind) -> impl Iterator<Item = ObjectKind> {
    ObjectKind::ALL
        .into_iter()
        .filter(move |kind| kind.as_str().starts_with(prefix.as_str()))
}
