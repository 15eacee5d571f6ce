//! Materialized category trees, one JSON file per section and language.

use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::domain::entities::CategoryNode;
use crate::domain::types::SectionId;
use crate::infra::fs::{remove_dir_defensive, remove_file_defensive, write_atomic};

#[derive(Debug, Clone)]
pub struct CategoryTrees {
    dir: PathBuf,
}

impl CategoryTrees {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, section: SectionId, lang: &str) -> PathBuf {
        self.dir.join(format!("{section}-{lang}.json"))
    }

    pub fn write(&self, section: SectionId, lang: &str, tree: &[CategoryNode]) -> io::Result<()> {
        let bytes = serde_json::to_vec(tree).map_err(io::Error::other)?;
        write_atomic(&self.path(section, lang), &bytes)
    }

    /// `None` when the tree was never written or the file is unreadable.
    pub fn read(&self, section: SectionId, lang: &str) -> Option<Vec<CategoryNode>> {
        let path = self.path(section, lang);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(tree) => Some(tree),
            Err(err) => {
                debug!(op = "category_tree_read", path = %path.display(), error = %err);
                None
            }
        }
    }

    pub fn remove(&self, section: SectionId, lang: &str) -> bool {
        let path = self.path(section, lang);
        match remove_file_defensive(&path) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(op = "category_tree_remove", path = %path.display(), error = %err, "Failed to remove category tree");
                false
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = remove_dir_defensive(&self.dir) {
            warn!(op = "category_tree_clear", path = %self.dir.display(), error = %err, "Failed to clear category trees");
        }
    }
}
