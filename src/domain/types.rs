//! Shared identifiers and the tags used to address persisted cache rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a content section (a positive integer for real sections).
pub type SectionId = i64;

/// Identifier of any content entity (entry, category, section, ...).
pub type EntityId = i64;

/// Value stored in `section`/`sid` columns for rows owned by the global scope.
pub const GLOBAL_SENTINEL: i64 = -1;

/// Physical partition of the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Section(SectionId),
}

impl Scope {
    /// Positive ids map to their section; anything else is the global scope.
    pub fn from_section(section: SectionId) -> Self {
        if section > 0 {
            Scope::Section(section)
        } else {
            Scope::Global
        }
    }

    pub fn is_global(self) -> bool {
        matches!(self, Scope::Global)
    }

    /// Section id as persisted in rows, with the global sentinel for the global scope.
    pub fn section_id(self) -> SectionId {
        match self {
            Scope::Global => GLOBAL_SENTINEL,
            Scope::Section(id) => id,
        }
    }

    /// File stem of the scope's database file.
    pub fn file_stem(self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Section(id) => format!("section-{id}"),
        }
    }

    /// Inverse of [`Scope::file_stem`].
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        if stem == "global" {
            return Some(Scope::Global);
        }
        stem.strip_prefix("section-")
            .and_then(|raw| raw.parse::<SectionId>().ok())
            .filter(|id| *id > 0)
            .map(Scope::Section)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Tag of every cacheable domain object variant.
///
/// The set is closed: a row recorded with a tag this build does not know is
/// treated as a miss rather than decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Entry,
    FieldData,
    EntryRow,
    Category,
    Section,
    Listing,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::Entry,
        ObjectKind::FieldData,
        ObjectKind::EntryRow,
        ObjectKind::Category,
        ObjectKind::Section,
        ObjectKind::Listing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Entry => "entry",
            ObjectKind::FieldData => "field_data",
            ObjectKind::EntryRow => "entry_row",
            ObjectKind::Category => "category",
            ObjectKind::Section => "section",
            ObjectKind::Listing => "listing",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown object kind `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for ObjectKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ObjectKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownKind(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_from_section_treats_non_positive_as_global() {
        assert_eq!(Scope::from_section(5), Scope::Section(5));
        assert_eq!(Scope::from_section(0), Scope::Global);
        assert_eq!(Scope::from_section(GLOBAL_SENTINEL), Scope::Global);
    }

    #[test]
    fn scope_file_stem_round_trips() {
        for scope in [Scope::Global, Scope::Section(42)] {
            assert_eq!(Scope::from_file_stem(&scope.file_stem()), Some(scope));
        }
        assert_eq!(Scope::from_file_stem("section-0"), None);
        assert_eq!(Scope::from_file_stem("meta"), None);
    }

    #[test]
    fn object_kind_parses_every_tag() {
        for kind in ObjectKind::ALL {
            assert_eq!(kind.as_str().parse::<ObjectKind>(), Ok(kind));
        }
        assert!("plugin_blob".parse::<ObjectKind>().is_err());
    }
}
