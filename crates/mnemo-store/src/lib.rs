//! Persistent scoped knowledge store and incremental header index.
//!
//! Backing layout under one storage root: an append-only preference stream
//! (`preferences.jsonl`), dated journal files under `memory/`, a versioned
//! fact collection (`knowledge/facts.jsonl`), and a rebuildable header
//! snapshot (`.index/headers.json`). Every mutation acquires the matching
//! resource lock through `mnemo_core::LockCoordinator`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mnemo_core::{LockCoordinator, ScopeKey};

mod facts;
mod index;
mod journal;
mod jsonl;
mod preferences;

pub use facts::{FactQuery, FactStore, KnowledgeFact};
pub use index::{ArtifactKind, IndexHeader, IndexManager, IndexRefreshReport};
pub use journal::Journal;
pub use preferences::{PreferenceRecord, PreferenceStore};

pub(crate) const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(5_000);

/// One retrievable backing document, used as the search corpus unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchDocument {
    pub id: String,
    pub scope: ScopeKey,
    pub kind: ArtifactKind,
    pub text: String,
    pub updated_unix_ms: u64,
}

/// Facade over the preference stream, journal, and fact collection sharing
/// one storage root and lock coordinator. No hidden process-wide state: every
/// component receives this handle at construction.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    root: PathBuf,
    locks: LockCoordinator,
    preferences: PreferenceStore,
    journal: Journal,
    facts: FactStore,
}

impl KnowledgeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let locks = LockCoordinator::new(root.clone());
        Self {
            preferences: PreferenceStore::new(root.clone(), locks.clone()),
            journal: Journal::new(root.clone(), locks.clone()),
            facts: FactStore::new(root.clone(), locks.clone()),
            locks,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    /// Overwrites the current value for `(scope, key)`, bumping its timestamp.
    pub fn put_preference(
        &self,
        scope: &ScopeKey,
        key: &str,
        value: &str,
    ) -> Result<PreferenceRecord> {
        self.preferences.put(scope, key, value)
    }

    /// Current preference records visible under `precedence`, merged by
    /// scope specificity with most-recent-update tie-breaks.
    pub fn merged_preferences(&self, precedence: &[ScopeKey]) -> Result<Vec<PreferenceRecord>> {
        self.preferences.merged(precedence)
    }

    /// Appends a journal entry for `date`; append-only, never overwrites.
    pub fn append_log(&self, scope: &ScopeKey, date: NaiveDate, content: &str) -> Result<PathBuf> {
        self.journal.append(scope, date, content)
    }

    /// Creates a new fact version, superseding any current fact with the same
    /// logical subject under `scope`.
    pub fn assert_fact(
        &self,
        scope: &ScopeKey,
        subject: &str,
        statement: &str,
        confidence: f32,
    ) -> Result<KnowledgeFact> {
        self.facts.assert_fact(scope, subject, statement, confidence)
    }

    /// Current (non-superseded) facts visible under `scopes`, ranked by scope
    /// precedence then recency, paginated.
    pub fn query_facts(&self, query: &FactQuery) -> Result<Vec<KnowledgeFact>> {
        self.facts.query(query)
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }
}
