//! Cacheable domain objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::types::{EntityId, ObjectKind, SectionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: EntityId,
    pub section: SectionId,
    pub category_id: Option<EntityId>,
    pub title: String,
    pub alias: String,
    pub published: bool,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Denormalized per-language field values of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDataRecord {
    pub entry_id: EntityId,
    pub lang: String,
    pub values: BTreeMap<String, String>,
}

/// Raw table row of an entry as loaded by list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRowRecord {
    pub entry_id: EntityId,
    pub section: SectionId,
    pub columns: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: EntityId,
    pub section: SectionId,
    pub parent_id: Option<EntityId>,
    pub title: String,
    pub path: String,
    pub children: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: SectionId,
    pub title: String,
    pub params: BTreeMap<String, String>,
}

/// A page of entry ids produced by a list-style task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub section: SectionId,
    pub task: String,
    pub entry_ids: Vec<EntityId>,
    pub total: u64,
}

/// Every object the object cache can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedObject {
    Entry(EntryRecord),
    FieldData(FieldDataRecord),
    EntryRow(EntryRowRecord),
    Category(CategoryRecord),
    Section(SectionRecord),
    Listing(ListingRecord),
}

impl CachedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            CachedObject::Entry(_) => ObjectKind::Entry,
            CachedObject::FieldData(_) => ObjectKind::FieldData,
            CachedObject::EntryRow(_) => ObjectKind::EntryRow,
            CachedObject::Category(_) => ObjectKind::Category,
            CachedObject::Section(_) => ObjectKind::Section,
            CachedObject::Listing(_) => ObjectKind::Listing,
        }
    }

    /// Kinds that must be known to decode this object, itself first.
    pub fn required_kinds(&self) -> Vec<ObjectKind> {
        match self {
            CachedObject::Listing(_) => vec![ObjectKind::Listing, ObjectKind::Entry],
            other => vec![other.kind()],
        }
    }

    pub fn as_entry(&self) -> Option<&EntryRecord> {
        match self {
            CachedObject::Entry(entry) => Some(entry),
            _ => None,
        }
    }
}

/// One node of a materialized category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub id: EntityId,
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub children: Vec<CategoryNode>,
}
