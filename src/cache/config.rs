//! Cache configuration.
//!
//! Runtime view of the `[cache]`, `[view]` and `[gc]` sections of `sectio.toml`,
//! plus the on-disk layout derived from the cache root.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{
    DEFAULT_BUNDLE_DIRS, DEFAULT_COMPRESS_LEVEL, DEFAULT_COMPRESS_MIN_BYTES,
    DEFAULT_GC_MAX_AGE_SECS, DEFAULT_LANGUAGE, DEFAULT_LIST_TASK_PATTERNS, DEFAULT_MEMORY_LIMIT,
    DEFAULT_OBJECT_BUDGET_MS, DEFAULT_OBJECT_TASK_DENYLIST, DEFAULT_VIEW_TASK_DENYLIST,
    DEFAULT_VISITOR_SELECTOR, Settings,
};

const SCOPES_DIR: &str = "scopes";
const VIEWS_DIR: &str = "views";
const ARTIFACT_FILES_DIR: &str = "files";
const METADATA_DB_FILE: &str = "meta.sqlite";
const TREES_DIR: &str = "trees";
const TMP_DIR: &str = "tmp";

/// Codec tuning.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Compress payloads at or above `compress_min_bytes`.
    pub compress: bool,
    pub compress_min_bytes: usize,
    /// zstd level (1-22).
    pub compress_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compress: true,
            compress_min_bytes: DEFAULT_COMPRESS_MIN_BYTES,
            compress_level: DEFAULT_COMPRESS_LEVEL,
        }
    }
}

/// Rendered artifact cache behaviour.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub enabled: bool,
    /// Skip the artifact tier for authenticated visitors.
    pub bypass_authenticated: bool,
    /// Reserved request parameters that still take part in the fingerprint.
    pub include_params: Vec<String>,
    /// Task fragments that never read or write artifacts.
    pub task_denylist: Vec<String>,
    /// SQL `LIKE` patterns of list-style tasks.
    pub list_task_patterns: Vec<String>,
    /// CSS selector of visitor-specific nodes removed before storing.
    pub visitor_selector: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bypass_authenticated: true,
            include_params: Vec::new(),
            task_denylist: to_owned_list(DEFAULT_VIEW_TASK_DENYLIST),
            list_task_patterns: to_owned_list(DEFAULT_LIST_TASK_PATTERNS),
            visitor_selector: DEFAULT_VISITOR_SELECTOR.to_string(),
        }
    }
}

/// Cache configuration shared by the engine and every session.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub default_language: String,
    /// Enable the first-level in-process cache.
    pub memory_enabled: bool,
    /// Maximum entries kept by the first-level cache.
    pub memory_limit: usize,
    pub codec: CodecConfig,
    /// Time since request start after which objects are no longer persisted.
    pub object_budget: Duration,
    /// Task fragments during which the object cache is bypassed.
    pub object_task_denylist: Vec<String>,
    pub view: ViewConfig,
    /// Age after which generated files are collected.
    pub gc_max_age: Duration,
    /// Generated bundle directories, relative to the root.
    pub bundle_dirs: Vec<PathBuf>,
}

impl CacheConfig {
    /// Configuration rooted at `root` with defaults everywhere else.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            memory_enabled: false,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            codec: CodecConfig::default(),
            object_budget: Duration::from_millis(DEFAULT_OBJECT_BUDGET_MS),
            object_task_denylist: to_owned_list(DEFAULT_OBJECT_TASK_DENYLIST),
            view: ViewConfig::default(),
            gc_max_age: Duration::from_secs(DEFAULT_GC_MAX_AGE_SECS),
            bundle_dirs: DEFAULT_BUNDLE_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Returns the memory limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn scopes_dir(&self) -> PathBuf {
        self.root.join(SCOPES_DIR)
    }

    pub fn views_dir(&self) -> PathBuf {
        self.root.join(VIEWS_DIR)
    }

    pub fn artifact_files_dir(&self) -> PathBuf {
        self.views_dir().join(ARTIFACT_FILES_DIR)
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.views_dir().join(METADATA_DB_FILE)
    }

    pub fn trees_dir(&self) -> PathBuf {
        self.root.join(TREES_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub fn bundle_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.bundle_dirs.iter().map(|dir| self.root.join(dir))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `task` contains any object-cache denylist fragment.
    pub fn task_denied_for_objects(&self, task: &str) -> bool {
        contains_fragment(&self.object_task_denylist, task)
    }

    /// True when `task` contains any view denylist fragment.
    pub fn task_denied_for_views(&self, task: &str) -> bool {
        contains_fragment(&self.view.task_denylist, task)
    }
}

impl From<&Settings> for CacheConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            root: settings.cache.root.clone(),
            default_language: settings.cache.default_language.clone(),
            memory_enabled: settings.cache.memory_enabled,
            memory_limit: settings.cache.memory_limit.get(),
            codec: CodecConfig {
                compress: settings.cache.compress,
                compress_min_bytes: settings.cache.compress_min_bytes,
                compress_level: settings.cache.compress_level,
            },
            object_budget: settings.cache.object_budget,
            object_task_denylist: settings.cache.object_task_denylist.clone(),
            view: ViewConfig {
                enabled: settings.view.enabled,
                bypass_authenticated: settings.view.bypass_authenticated,
                include_params: settings.view.include_params.clone(),
                task_denylist: settings.view.task_denylist.clone(),
                list_task_patterns: settings.view.list_task_patterns.clone(),
                visitor_selector: settings.view.visitor_selector.clone(),
            },
            gc_max_age: settings.gc.max_age,
            bundle_dirs: settings.gc.bundle_dirs.clone(),
        }
    }
}

fn contains_fragment(fragments: &[String], task: &str) -> bool {
    if task.is_empty() {
        return false;
    }
    let task = task.to_ascii_lowercase();
    fragments
        .iter()
        .any(|fragment| !fragment.is_empty() && task.contains(fragment.as_str()))
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::new("/tmp/sectio");
        assert!(!config.memory_enabled);
        assert_eq!(config.memory_limit, 2048);
        assert_eq!(config.object_budget, Duration::from_secs(3));
        assert!(config.view.enabled);
        assert!(config.view.bypass_authenticated);
        assert_eq!(config.bundle_dirs.len(), 2);
    }

    #[test]
    fn layout_is_rooted() {
        let config = CacheConfig::new("/tmp/sectio");
        assert_eq!(config.scopes_dir(), PathBuf::from("/tmp/sectio/scopes"));
        assert_eq!(
            config.metadata_db_path(),
            PathBuf::from("/tmp/sectio/views/meta.sqlite")
        );
        assert_eq!(
            config.artifact_files_dir(),
            PathBuf::from("/tmp/sectio/views/files")
        );
    }

    #[test]
    fn denylist_matches_fragments_case_insensitively() {
        let config = CacheConfig::new("/tmp/sectio");
        assert!(config.task_denied_for_objects("entry.Save"));
        assert!(config.task_denied_for_objects("payment_callback"));
        assert!(!config.task_denied_for_objects("details"));
        assert!(!config.task_denied_for_objects(""));
        assert!(config.task_denied_for_views("edit_entry"));
    }

    #[test]
    fn settings_conversion_carries_values() {
        let mut settings = Settings::with_root("/srv/cache");
        settings.cache.memory_enabled = true;
        let config = CacheConfig::from(&settings);
        assert_eq!(config.root, PathBuf::from("/srv/cache"));
        assert!(config.memory_enabled);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_limit: 0,
            ..CacheConfig::new("/tmp")
        };
        assert_eq!(config.memory_limit_non_zero().get(), 1);
    }
}
