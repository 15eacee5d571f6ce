//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::SectionId;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "sectio";
const DEFAULT_CACHE_ROOT: &str = "cache";
pub(crate) const DEFAULT_MEMORY_LIMIT: usize = 2048;
pub(crate) const DEFAULT_COMPRESS_MIN_BYTES: usize = 1024;
pub(crate) const DEFAULT_COMPRESS_LEVEL: i32 = 3;
pub(crate) const DEFAULT_OBJECT_BUDGET_MS: u64 = 3000;
pub(crate) const DEFAULT_GC_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
pub(crate) const DEFAULT_LANGUAGE: &str = "en";
pub(crate) const DEFAULT_OBJECT_TASK_DENYLIST: &[&str] = &[
    "save", "clone", "payment", "submit", "approve", "publish", "icon",
];
pub(crate) const DEFAULT_VIEW_TASK_DENYLIST: &[&str] = &["edit", "add", "form", "rate", "vote"];
pub(crate) const DEFAULT_LIST_TASK_PATTERNS: &[&str] = &["list%", "category%", "search%"];
pub(crate) const DEFAULT_BUNDLE_DIRS: &[&str] = &["bundles/js", "bundles/css"];
pub(crate) const DEFAULT_VISITOR_SELECTOR: &str = "[data-visitor]";

/// Command-line arguments for the sectio maintenance binary.
#[derive(Debug, Parser)]
#[command(name = "sectio", version, about = "Section-scoped cache maintenance")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SECTIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the cache root directory.
    #[arg(long = "cache-root", value_name = "PATH", global = true)]
    pub cache_root: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the object cache time budget in milliseconds.
    #[arg(long = "object-budget-ms", value_name = "MILLIS", global = true)]
    pub object_budget_ms: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Wipe the stores, trees and artifacts of one section.
    #[command(name = "clean-section")]
    CleanSection(CleanSectionArgs),
    /// Remove category-tree materializations.
    #[command(name = "clean-categories")]
    CleanCategories(CleanCategoriesArgs),
    /// Delete the variables recorded for one section and list-style artifacts.
    #[command(name = "purge-vars")]
    PurgeVars(PurgeVarsArgs),
    /// Rebuild every scope store and remove every generated file.
    #[command(name = "clean-all")]
    CleanAll,
    /// Remove stale generated files.
    #[command(name = "gc")]
    Gc(GcArgs),
    /// Clear the persisted "store disabled" flag.
    #[command(name = "enable-store")]
    EnableStore,
}

#[derive(Debug, Args, Clone)]
pub struct CleanSectionArgs {
    /// Section whose caches are wiped.
    #[arg(long, value_name = "ID")]
    pub section: SectionId,

    /// Keep queued system messages.
    #[arg(long = "keep-messages", action = clap::ArgAction::SetTrue)]
    pub keep_messages: bool,

    /// Language of the category tree to remove.
    #[arg(long, value_name = "LANG")]
    pub lang: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CleanCategoriesArgs {
    /// Section whose tree is removed; omit to remove every tree.
    #[arg(long, value_name = "ID", default_value_t = 0)]
    pub section: SectionId,

    /// Language of the tree to remove.
    #[arg(long, value_name = "LANG")]
    pub lang: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeVarsArgs {
    /// Section whose variables are deleted.
    #[arg(long, value_name = "ID")]
    pub section: SectionId,
}

#[derive(Debug, Args, Clone)]
pub struct GcArgs {
    /// Delete every generated file regardless of age.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub view: ViewSettings,
    pub gc: GcSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub default_language: String,
    pub memory_enabled: bool,
    pub memory_limit: NonZeroUsize,
    pub compress: bool,
    pub compress_min_bytes: usize,
    pub compress_level: i32,
    pub object_budget: Duration,
    pub object_task_denylist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub enabled: bool,
    pub bypass_authenticated: bool,
    pub include_params: Vec<String>,
    pub task_denylist: Vec<String>,
    pub list_task_patterns: Vec<String>,
    pub visitor_selector: String,
}

#[derive(Debug, Clone)]
pub struct GcSettings {
    pub max_age: Duration,
    pub bundle_dirs: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("SECTIO")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.object_task_denylist")
            .with_list_parse_key("view.include_params")
            .with_list_parse_key("view.task_denylist")
            .with_list_parse_key("view.list_task_patterns")
            .with_list_parse_key("gc.bundle_dirs")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            cache: CacheSettings {
                root: PathBuf::from(DEFAULT_CACHE_ROOT),
                default_language: DEFAULT_LANGUAGE.to_string(),
                memory_enabled: false,
                memory_limit: NonZeroUsize::new(DEFAULT_MEMORY_LIMIT).unwrap_or(NonZeroUsize::MIN),
                compress: true,
                compress_min_bytes: DEFAULT_COMPRESS_MIN_BYTES,
                compress_level: DEFAULT_COMPRESS_LEVEL,
                object_budget: Duration::from_millis(DEFAULT_OBJECT_BUDGET_MS),
                object_task_denylist: normalize_list(None, DEFAULT_OBJECT_TASK_DENYLIST),
            },
            view: ViewSettings {
                enabled: true,
                bypass_authenticated: true,
                include_params: Vec::new(),
                task_denylist: normalize_list(None, DEFAULT_VIEW_TASK_DENYLIST),
                list_task_patterns: normalize_list(None, DEFAULT_LIST_TASK_PATTERNS),
                visitor_selector: DEFAULT_VISITOR_SELECTOR.to_string(),
            },
            gc: GcSettings {
                max_age: Duration::from_secs(DEFAULT_GC_MAX_AGE_SECS),
                bundle_dirs: DEFAULT_BUNDLE_DIRS.iter().map(PathBuf::from).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    view: RawViewSettings,
    gc: RawGcSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(budget) = overrides.object_budget_ms {
            self.cache.object_budget_ms = Some(budget);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            view,
            gc,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            view: build_view_settings(view)?,
            gc: build_gc_settings(gc)?,
        })
    }

    /// Settings rooted at `root` with every other value at its default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut settings = Settings::default();
        settings.cache.root = root.into();
        settings
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "path must not be empty"));
    }

    let default_language = cache
        .default_language
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let memory_limit_value = cache.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
    let memory_limit = NonZeroUsize::new(memory_limit_value)
        .ok_or_else(|| LoadError::invalid("cache.memory_limit", "must be greater than zero"))?;

    let compress_level = cache.compress_level.unwrap_or(DEFAULT_COMPRESS_LEVEL);
    if !(1..=22).contains(&compress_level) {
        return Err(LoadError::invalid(
            "cache.compress_level",
            "must be between 1 and 22",
        ));
    }

    let budget_ms = cache.object_budget_ms.unwrap_or(DEFAULT_OBJECT_BUDGET_MS);
    let budget_ms = NonZeroU64::new(budget_ms).ok_or_else(|| {
        LoadError::invalid("cache.object_budget_ms", "must be greater than zero")
    })?;

    Ok(CacheSettings {
        root,
        default_language,
        memory_enabled: cache.memory_enabled.unwrap_or(false),
        memory_limit,
        compress: cache.compress.unwrap_or(true),
        compress_min_bytes: cache
            .compress_min_bytes
            .unwrap_or(DEFAULT_COMPRESS_MIN_BYTES),
        compress_level,
        object_budget: Duration::from_millis(budget_ms.get()),
        object_task_denylist: normalize_list(
            cache.object_task_denylist,
            DEFAULT_OBJECT_TASK_DENYLIST,
        ),
    })
}

fn build_view_settings(view: RawViewSettings) -> Result<ViewSettings, LoadError> {
    let visitor_selector = view
        .visitor_selector
        .unwrap_or_else(|| DEFAULT_VISITOR_SELECTOR.to_string());
    if visitor_selector.trim().is_empty() {
        return Err(LoadError::invalid(
            "view.visitor_selector",
            "selector must not be empty",
        ));
    }

    Ok(ViewSettings {
        enabled: view.enabled.unwrap_or(true),
        bypass_authenticated: view.bypass_authenticated.unwrap_or(true),
        include_params: normalize_list(view.include_params, &[]),
        task_denylist: normalize_list(view.task_denylist, DEFAULT_VIEW_TASK_DENYLIST),
        list_task_patterns: normalize_list(view.list_task_patterns, DEFAULT_LIST_TASK_PATTERNS),
        visitor_selector,
    })
}

fn build_gc_settings(gc: RawGcSettings) -> Result<GcSettings, LoadError> {
    let max_age_secs = gc.max_age_secs.unwrap_or(DEFAULT_GC_MAX_AGE_SECS);
    if max_age_secs == 0 {
        return Err(LoadError::invalid(
            "gc.max_age_secs",
            "must be greater than zero",
        ));
    }

    let bundle_dirs = match gc.bundle_dirs {
        Some(dirs) => dirs,
        None => DEFAULT_BUNDLE_DIRS.iter().map(PathBuf::from).collect(),
    };
    if bundle_dirs.iter().any(|dir| dir.is_absolute()) {
        return Err(LoadError::invalid(
            "gc.bundle_dirs",
            "bundle directories must be relative to the cache root",
        ));
    }

    Ok(GcSettings {
        max_age: Duration::from_secs(max_age_secs),
        bundle_dirs,
    })
}

fn normalize_list(values: Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    match values {
        Some(values) => values
            .into_iter()
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
            .collect(),
        None => defaults.iter().map(|value| value.to_string()).collect(),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root: Option<PathBuf>,
    default_language: Option<String>,
    memory_enabled: Option<bool>,
    memory_limit: Option<usize>,
    compress: Option<bool>,
    compress_min_bytes: Option<usize>,
    compress_level: Option<i32>,
    object_budget_ms: Option<u64>,
    object_task_denylist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawViewSettings {
    enabled: Option<bool>,
    bypass_authenticated: Option<bool>,
    include_params: Option<Vec<String>>,
    task_denylist: Option<Vec<String>>,
    list_task_patterns: Option<Vec<String>>,
    visitor_selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGcSettings {
    max_age_secs: Option<u64>,
    bundle_dirs: Option<Vec<PathBuf>>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
