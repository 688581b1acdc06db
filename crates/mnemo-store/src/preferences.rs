//! Keyed preference records, one current value per `(scope, key)`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use mnemo_core::scope::Scoped;
use mnemo_core::{current_unix_timestamp_ms, merge_preferences, LockCoordinator, ScopeKey};

use crate::jsonl::{append_record, load_records};
use crate::DEFAULT_LOCK_WAIT;

const PREFERENCES_FILE_NAME: &str = "preferences.jsonl";
const PREFERENCES_SCHEMA_VERSION: u32 = 1;
const PREFERENCES_LOCK_RESOURCE: &str = "preferences";

fn preferences_schema_version() -> u32 {
    PREFERENCES_SCHEMA_VERSION
}

/// One stored preference value. The stream is append-only; the latest record
/// per `(scope, key)` is the current value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceRecord {
    #[serde(default = "preferences_schema_version")]
    pub schema_version: u32,
    pub scope: ScopeKey,
    pub key: String,
    pub value: String,
    pub updated_unix_ms: u64,
}

impl Scoped for PreferenceRecord {
    fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    fn merge_key(&self) -> &str {
        self.key.as_str()
    }

    fn updated_unix_ms(&self) -> u64 {
        self.updated_unix_ms
    }
}

/// Append-only preference stream with last-writer-wins per `(scope, key)`.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    root: PathBuf,
    locks: LockCoordinator,
}

impl PreferenceStore {
    pub fn new(root: PathBuf, locks: LockCoordinator) -> Self {
        Self { root, locks }
    }

    /// Overwrites the current value for `(scope, key)` under the preference
    /// lock. Concurrent writers are serialized; the last one wins whole.
    pub fn put(&self, scope: &ScopeKey, key: &str, value: &str) -> Result<PreferenceRecord> {
        let key = key.trim();
        if key.is_empty() {
            bail!("preference key must not be empty");
        }
        let record = PreferenceRecord {
            schema_version: PREFERENCES_SCHEMA_VERSION,
            scope: scope.clone(),
            key: key.to_string(),
            value: value.trim().to_string(),
            updated_unix_ms: current_unix_timestamp_ms(),
        };

        let _guard = self
            .locks
            .acquire(PREFERENCES_LOCK_RESOURCE, DEFAULT_LOCK_WAIT)
            .context("failed to lock preference store")?;
        append_record(self.stream_path().as_path(), &record)?;
        Ok(record)
    }

    /// Latest record per `(scope, key)` across every scope, unfiltered.
    pub fn load_current(&self) -> Result<Vec<PreferenceRecord>> {
        let records: Vec<PreferenceRecord> = load_records(self.stream_path().as_path())?;
        let mut current: Vec<PreferenceRecord> = Vec::new();
        for record in records {
            match current
                .iter()
                .position(|existing| existing.scope == record.scope && existing.key == record.key)
            {
                Some(index) => current[index] = record,
                None => current.push(record),
            }
        }
        Ok(current)
    }

    /// Per-key winners under `precedence`, most specific scope first.
    pub fn merged(&self, precedence: &[ScopeKey]) -> Result<Vec<PreferenceRecord>> {
        let current = self.load_current()?;
        Ok(merge_preferences(&current, precedence))
    }

    /// Current records for one scope, ordered by key.
    pub fn scope_entries(&self, scope: &ScopeKey) -> Result<Vec<PreferenceRecord>> {
        let mut entries = self
            .load_current()?
            .into_iter()
            .filter(|record| record.scope == *scope)
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(entries)
    }

    pub fn stream_path(&self) -> PathBuf {
        self.root.join(PREFERENCES_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::{resolve_scopes, ScopeContext};

    fn store(root: &std::path::Path) -> PreferenceStore {
        PreferenceStore::new(root.to_path_buf(), LockCoordinator::new(root))
    }

    #[test]
    fn functional_put_overwrites_current_value_per_scope_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        store
            .put(&ScopeKey::Global, "style", "typescript")
            .expect("first put");
        store
            .put(&ScopeKey::Global, "style", "rust")
            .expect("second put");

        let current = store.load_current().expect("load");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].value, "rust");
    }

    #[test]
    fn functional_project_scope_shadows_global_for_matching_context() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let project = ScopeKey::Project("foo".to_string());
        store
            .put(&project, "style", "vanilla-css")
            .expect("project put");
        store
            .put(&ScopeKey::Global, "style", "typescript")
            .expect("global put");

        let foo_scopes = resolve_scopes(&ScopeContext {
            app: None,
            project: Some("foo".to_string()),
        });
        let merged = store.merged(&foo_scopes).expect("merged");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].value, "vanilla-css");

        let bar_scopes = resolve_scopes(&ScopeContext {
            app: None,
            project: Some("bar".to_string()),
        });
        let merged = store.merged(&bar_scopes).expect("merged");
        assert_eq!(merged[0].value, "typescript");
    }

    #[test]
    fn unit_put_rejects_empty_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let error = store
            .put(&ScopeKey::Global, "  ", "value")
            .expect_err("must fail");
        assert!(error.to_string().contains("must not be empty"));
    }
}
