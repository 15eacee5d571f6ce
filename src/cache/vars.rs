//! Named values.
//!
//! Small values keyed by `(name, section, sid, lang)`. Falsy values are
//! stored as an explicit "no value" marker so a cached absence can be told
//! apart from a miss.

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, warn};

use crate::domain::types::{GLOBAL_SENTINEL, Scope, SectionId};

use super::codec::Codec;
use super::keys::{VarKey, memory_var_key, memory_var_prefix};
use super::memory::MemoryValue;
use super::session::CacheSession;
use super::statement::{Conditions, Statement, Table};

/// Outcome of [`CacheSession::get_var`].
#[derive(Debug, Clone, PartialEq)]
pub enum VarLookup<T> {
    Miss,
    /// A falsy value was cached.
    NoValue,
    Hit(T),
}

impl<T> VarLookup<T> {
    pub fn is_miss(&self) -> bool {
        matches!(self, VarLookup::Miss)
    }

    pub fn hit(self) -> Option<T> {
        match self {
            VarLookup::Hit(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
enum StoredVar {
    Value(Value),
    NoValue,
}

#[derive(Debug, FromRow)]
struct VarRow {
    checksum: String,
    data: String,
}

/// JSON values the host treats as "nothing": null, false, 0, "", [] and {}.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// A key with the session defaults filled in.
struct ResolvedVar {
    name: String,
    section: SectionId,
    sid: i64,
    lang: String,
    /// Scope the row lives in when it differs from the active one.
    target: Option<Scope>,
}

impl CacheSession {
    fn resolve_var(&self, key: &VarKey) -> ResolvedVar {
        let active = self.store.scope();
        let section = if key.section == 0 {
            active.section_id()
        } else {
            key.section
        };
        let sid = if key.sid != 0 { key.sid } else { section };
        let lang = if key.lang.is_empty() {
            self.language().to_string()
        } else {
            key.lang.clone()
        };
        let target = (section == GLOBAL_SENTINEL && !active.is_global()).then_some(Scope::Global);
        ResolvedVar {
            name: key.name.clone(),
            section,
            sid,
            lang,
            target,
        }
    }

    /// Cache `value` under `key`. No-op when the store is disabled.
    pub async fn add_var<T: Serialize + ?Sized>(&mut self, value: &T, key: &VarKey) {
        if !self.store.is_enabled() {
            return;
        }
        let resolved = self.resolve_var(key);

        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(err) => {
                debug!(op = "add_var", name = %resolved.name, error = %err, result = "skipped");
                return;
            }
        };
        let stored = if is_falsy(&json) {
            StoredVar::NoValue
        } else {
            StoredVar::Value(json.clone())
        };

        let memory = self.engine.memory();
        if memory.enabled() {
            memory.set(
                memory_var_key(resolved.sid, &resolved.name, &resolved.lang),
                MemoryValue::Var(json),
            );
        }

        let encoded = match self.engine.codec().encode(&stored) {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(op = "add_var", name = %resolved.name, error = %err, result = "skipped");
                return;
            }
        };
        let statement = Statement::new(
            "INSERT OR REPLACE INTO vars
             (name, validtime, section, sid, lang, params, checksum, md5, data)
             VALUES (?, 0, ?, ?, ?, '', ?, ?, ?)",
        )
        .bind(&resolved.name)
        .bind(resolved.section)
        .bind(resolved.sid)
        .bind(&resolved.lang)
        .bind(encoded.checksum())
        .bind(encoded.digest)
        .bind(encoded.data);

        self.exec_in(resolved.target, &[statement]).await;
    }

    pub async fn get_var<T: DeserializeOwned>(&mut self, key: &VarKey) -> VarLookup<T> {
        let resolved = self.resolve_var(key);

        let memory_key = memory_var_key(resolved.sid, &resolved.name, &resolved.lang);
        if let Some(MemoryValue::Var(json)) = self.engine.memory().get(&memory_key) {
            if let Some(lookup) = lookup_from_json(json) {
                counter!("sectio_cache_var_hit_total", "tier" => "memory").increment(1);
                return lookup;
            }
        }

        let statement = Conditions::new()
            .eq("name", &resolved.name)
            .eq("section", resolved.section)
            .eq("sid", resolved.sid)
            .eq("lang", &resolved.lang)
            .select_from(Table::Vars, &["checksum", "data"]);

        let row: Option<VarRow> = self.query_row_in(resolved.target, &statement).await;

        let lookup = row
            .and_then(|row| self.decode_var_row(&resolved.name, row))
            .and_then(|stored| {
                let json = match stored {
                    StoredVar::Value(json) => json,
                    StoredVar::NoValue => Value::Null,
                };
                let memory = self.engine.memory();
                if memory.enabled() {
                    memory.set(memory_key, MemoryValue::Var(json.clone()));
                }
                lookup_from_json(json)
            });

        match lookup {
            Some(lookup) => {
                counter!("sectio_cache_var_hit_total", "tier" => "store").increment(1);
                lookup
            }
            None => {
                counter!("sectio_cache_var_miss_total").increment(1);
                VarLookup::Miss
            }
        }
    }

    /// Delete the exact row, or every row whose name starts with `key.name`
    /// when `key.sid` is set.
    pub async fn delete_var(&mut self, key: &VarKey) {
        let resolved = self.resolve_var(key);
        let memory = self.engine.memory();

        let statement = if key.is_prefix_delete() {
            memory.remove_prefix(&memory_var_prefix(resolved.sid, &resolved.name));
            Conditions::new()
                .prefix("name", &resolved.name)
                .eq("sid", resolved.sid)
                .eq("lang", &resolved.lang)
                .delete_from(Table::Vars)
        } else {
            memory.remove(&memory_var_key(resolved.sid, &resolved.name, &resolved.lang));
            Conditions::new()
                .eq("name", &resolved.name)
                .eq("section", resolved.section)
                .eq("sid", resolved.sid)
                .eq("lang", &resolved.lang)
                .delete_from(Table::Vars)
        };

        self.exec_in(resolved.target, &[statement]).await;
    }

    /// Run `statements` in `target` (or the active scope) and switch back.
    pub(crate) async fn exec_in(&mut self, target: Option<Scope>, statements: &[Statement]) -> bool {
        let previous = match target {
            Some(scope) => Some(self.switch_scope(scope).await),
            None => None,
        };
        let done = self.store.exec_all(statements).await;
        if let Some(previous) = previous {
            self.switch_scope(previous).await;
        }
        done
    }

    /// Single-row query in `target` (or the active scope), switching back after.
    pub(crate) async fn query_row_in<O>(&mut self, target: Option<Scope>, statement: &Statement) -> Option<O>
    where
        O: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let previous = match target {
            Some(scope) => Some(self.switch_scope(scope).await),
            None => None,
        };
        let row = self.store.query_row(statement).await;
        if let Some(previous) = previous {
            self.switch_scope(previous).await;
        }
        row
    }

    fn decode_var_row(&self, name: &str, row: VarRow) -> Option<StoredVar> {
        if row.data.is_empty() {
            return None;
        }
        if !Codec::verify(&row.data, &row.checksum) {
            counter!("sectio_cache_checksum_mismatch_total", "table" => "vars").increment(1);
            warn!(
                op = "get_var",
                name,
                scope = %self.store.scope(),
                result = "checksum_mismatch",
                "Stored var failed its checksum; treating as a miss"
            );
            return None;
        }
        match self.engine.codec().decode(&row.data) {
            Ok(stored) => Some(stored),
            Err(err) => {
                debug!(op = "get_var", name, error = %err, result = "undecodable");
                None
            }
        }
    }
}

fn lookup_from_json<T: DeserializeOwned>(json: Value) -> Option<VarLookup<T>> {
    if is_falsy(&json) {
        return Some(VarLookup::NoValue);
    }
    match serde_json::from_value(json) {
        Ok(value) => Some(VarLookup::Hit(value)),
        Err(err) => {
            debug!(op = "get_var", error = %err, result = "type_mismatch");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn falsy_values() {
        for value in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(is_falsy(&value), "{value} should be falsy");
        }
        for value in [json!(true), json!(1), json!("0"), json!([0]), json!({"a": null})] {
            assert!(!is_falsy(&value), "{value} should be truthy");
        }
    }

    #[test]
    fn lookup_from_json_maps_states() {
        assert_eq!(lookup_from_json::<String>(json!("")), Some(VarLookup::NoValue));
        assert_eq!(
            lookup_from_json::<String>(json!("menu")),
            Some(VarLookup::Hit("menu".to_string()))
        );
        assert_eq!(lookup_from_json::<u32>(json!("menu")), None);
    }
}
