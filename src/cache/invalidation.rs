//! Cascading invalidation after content changes.

use std::time::Instant;

use metrics::histogram;
use tracing::{debug, info, warn};

use crate::domain::types::{Scope, SectionId};

use super::gc::GcReport;
use super::keys::{NAMESPACE, VarKey};
use super::session::CacheSession;
use super::statement::{Conditions, Table};
use super::store::{remove_scope_files, scopes_on_disk};

pub const CATEGORY_TREE_ADMIN_VAR: &str = "category_tree.admin";
pub const CATEGORY_TREE_FRONT_VAR: &str = "category_tree.front";

/// Summary of a `clean_section` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub store_cleared: bool,
    pub memory_entries: usize,
    pub artifacts: usize,
    pub files: GcReport,
}

impl CacheSession {
    /// Drop everything cached for `section`; `0` means the active scope.
    pub async fn clean_section(&mut self, section: SectionId, also_system_messages: bool) -> CleanReport {
        let started = Instant::now();
        let mut report = CleanReport::default();
        self.flush_host().await;

        let section = if section == 0 {
            self.store.scope().section_id()
        } else {
            section
        };
        if self.store.is_enabled() {
            let target = Scope::from_section(section);
            let wipe = [
                Conditions::new().delete_from(Table::Vars),
                Conditions::new().delete_from(Table::Objects),
            ];
            let target = (target != self.store.scope()).then_some(target);
            report.store_cleared = self.exec_in(target, &wipe).await;
        }

        if section > 0 {
            report.memory_entries = self.engine.memory().clear_matching(NAMESPACE);
            self.clean_categories(section).await;
        }

        if also_system_messages {
            self.engine.collaborators().messages.reset().await;
        }

        report.artifacts = self.engine.artifacts().invalidate_by_section(section).await;

        let engine = self.engine.clone();
        for dir in engine.config().bundle_paths() {
            report.files = report.files.merge(engine.gc().collect(&dir, true));
        }

        record_clean("clean_section", started);
        info!(
            op = "clean_section",
            section,
            store_cleared = report.store_cleared,
            memory_entries = report.memory_entries,
            artifacts = report.artifacts,
            files_removed = report.files.removed,
            "Section cache cleaned"
        );
        report
    }

    /// Drop category trees: one section in the session language, or every
    /// tree when `section` is 0.
    pub async fn clean_categories(&mut self, section: SectionId) {
        let started = Instant::now();
        match section {
            0 => self.engine.trees().clear(),
            section if section > 0 => {
                let lang = self.language().to_string();
                self.engine.trees().remove(section, &lang);
                for name in [CATEGORY_TREE_ADMIN_VAR, CATEGORY_TREE_FRONT_VAR] {
                    self.delete_var(&VarKey::new(name, section).with_lang(lang.as_str()))
                        .await;
                }
            }
            other => debug!(op = "clean_categories", section = other, result = "ignored"),
        }
        record_clean("clean_categories", started);
    }

    /// Drop the section's vars and its list-style artifacts, keeping objects.
    pub async fn purge_section_vars(&mut self, section: SectionId) -> usize {
        let started = Instant::now();
        let statement = Conditions::new()
            .eq("section", section)
            .delete_from(Table::Vars);
        let target = Scope::from_section(section);
        let target = (target != self.store.scope()).then_some(target);
        self.exec_in(target, &[statement]).await;

        let mut artifacts = 0;
        let engine = self.engine.clone();
        for pattern in &engine.config().view.list_task_patterns {
            artifacts += engine
                .artifacts()
                .invalidate_by_task_pattern(section, pattern)
                .await;
        }
        engine.memory().clear();

        record_clean("purge_section_vars", started);
        debug!(op = "purge_section_vars", section, artifacts);
        artifacts
    }

    /// Drop every tier: all scope files, artifacts, temporary files, category
    /// trees and the memory tier.
    pub async fn clean_all(&mut self) {
        let started = Instant::now();
        let scopes_dir = self.engine.config().scopes_dir();

        self.store.close().await;
        match scopes_on_disk(&scopes_dir) {
            Ok(scopes) => {
                for scope in scopes {
                    remove_scope_files(&scopes_dir, scope);
                }
            }
            Err(err) => warn!(
                op = "clean_all",
                path = %scopes_dir.display(),
                error = %err,
                "Failed to list scope stores"
            ),
        }

        let artifacts = self.engine.artifacts().wipe().await;
        self.flush_host().await;

        let engine = self.engine.clone();
        let files = engine.gc().collect(&engine.config().tmp_dir(), true);
        engine.trees().clear();
        engine.memory().clear();

        record_clean("clean_all", started);
        info!(
            op = "clean_all",
            artifacts,
            files_removed = files.removed,
            "All cache tiers cleaned"
        );
    }
}

fn record_clean(op: &'static str, started: Instant) {
    histogram!("sectio_cache_clean_ms", "op" => op).record(started.elapsed().as_secs_f64() * 1000.0);
}
