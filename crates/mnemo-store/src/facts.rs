//! Versioned atomic facts with supersession chains.
//!
//! Facts are never destroyed: asserting a claim that already has a current
//! version appends a successor and points the predecessor's `superseded_by`
//! at it. Both states land in one atomic snapshot rewrite, so no crash window
//! leaves two current versions or a dangling pointer.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mnemo_core::{current_unix_timestamp_ms, write_text_atomic, LockCoordinator, ScopeKey};

use crate::jsonl::load_records;
use crate::DEFAULT_LOCK_WAIT;

const FACTS_FILE_NAME: &str = "knowledge/facts.jsonl";
const FACTS_SCHEMA_VERSION: u32 = 1;
const FACTS_LOCK_RESOURCE: &str = "facts";

fn facts_schema_version() -> u32 {
    FACTS_SCHEMA_VERSION
}

/// One version of an atomic assertion. `superseded_by` is an id lookup, never
/// a live reference; a fact carrying it is history, not a current claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeFact {
    #[serde(default = "facts_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub scope: ScopeKey,
    pub subject: String,
    pub statement: String,
    pub confidence: f32,
    pub version: u32,
    pub created_unix_ms: u64,
    #[serde(default)]
    pub superseded_by: Option<String>,
}

impl KnowledgeFact {
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Query over current facts, restricted to visible scopes and paginated.
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
    pub scopes: Vec<ScopeKey>,
    pub subject_contains: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Arena of fact versions keyed by opaque ids, persisted as a JSONL stream
/// rewritten atomically under the fact lock on every supersession.
#[derive(Debug, Clone)]
pub struct FactStore {
    root: PathBuf,
    locks: LockCoordinator,
}

impl FactStore {
    pub fn new(root: PathBuf, locks: LockCoordinator) -> Self {
        Self { root, locks }
    }

    /// Asserts `statement` about `subject` under `scope`. When a current fact
    /// with the same logical subject exists, the new version supersedes it.
    pub fn assert_fact(
        &self,
        scope: &ScopeKey,
        subject: &str,
        statement: &str,
        confidence: f32,
    ) -> Result<KnowledgeFact> {
        let subject_norm = normalize_subject(subject);
        if subject_norm.is_empty() {
            bail!("fact subject must not be empty");
        }
        let statement = statement.trim();
        if statement.is_empty() {
            bail!("fact statement must not be empty");
        }

        let _guard = self
            .locks
            .acquire(FACTS_LOCK_RESOURCE, DEFAULT_LOCK_WAIT)
            .context("failed to lock fact store")?;

        let mut facts = self.load_folded()?;
        let created_unix_ms = current_unix_timestamp_ms();
        let predecessor = facts.iter().position(|fact| {
            fact.is_current()
                && fact.scope == *scope
                && normalize_subject(fact.subject.as_str()) == subject_norm
        });
        let version = predecessor
            .map(|index| facts[index].version.saturating_add(1))
            .unwrap_or(1);
        let id = fact_id(scope, subject_norm.as_str(), version, created_unix_ms);

        if let Some(index) = predecessor {
            facts[index].superseded_by = Some(id.clone());
        }
        let fact = KnowledgeFact {
            schema_version: FACTS_SCHEMA_VERSION,
            id,
            scope: scope.clone(),
            subject: subject_norm,
            statement: statement.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            version,
            created_unix_ms,
            superseded_by: None,
        };
        facts.push(fact.clone());
        self.write_snapshot(&facts)?;
        Ok(fact)
    }

    /// Latest state of every fact version ever written (audit trail included).
    pub fn load_folded(&self) -> Result<Vec<KnowledgeFact>> {
        let records: Vec<KnowledgeFact> = load_records(self.stream_path().as_path())?;
        let mut folded: Vec<KnowledgeFact> = Vec::new();
        for record in records {
            match folded.iter().position(|existing| existing.id == record.id) {
                Some(index) => folded[index] = record,
                None => folded.push(record),
            }
        }
        Ok(folded)
    }

    /// Current (non-superseded) facts across all scopes.
    pub fn current(&self) -> Result<Vec<KnowledgeFact>> {
        Ok(self
            .load_folded()?
            .into_iter()
            .filter(KnowledgeFact::is_current)
            .collect())
    }

    /// Current facts restricted to `query.scopes`, ranked by scope precedence
    /// then recency. Unknown scopes simply match nothing.
    pub fn query(&self, query: &FactQuery) -> Result<Vec<KnowledgeFact>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let filter = query
            .subject_contains
            .as_deref()
            .map(normalize_subject)
            .filter(|value| !value.is_empty());
        let mut matched = self
            .current()?
            .into_iter()
            .filter(|fact| query.scopes.contains(&fact.scope))
            .filter(|fact| {
                filter
                    .as_deref()
                    .map(|needle| fact.subject.contains(needle))
                    .unwrap_or(true)
            })
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| {
            left.scope
                .specificity()
                .cmp(&right.scope.specificity())
                .then_with(|| right.created_unix_ms.cmp(&left.created_unix_ms))
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    /// Full version chain for one logical subject, oldest first.
    pub fn history(&self, scope: &ScopeKey, subject: &str) -> Result<Vec<KnowledgeFact>> {
        let subject_norm = normalize_subject(subject);
        let mut chain = self
            .load_folded()?
            .into_iter()
            .filter(|fact| {
                fact.scope == *scope && normalize_subject(fact.subject.as_str()) == subject_norm
            })
            .collect::<Vec<_>>();
        chain.sort_by_key(|fact| fact.version);
        Ok(chain)
    }

    pub fn stream_path(&self) -> PathBuf {
        self.root.join(FACTS_FILE_NAME)
    }

    fn write_snapshot(&self, facts: &[KnowledgeFact]) -> Result<()> {
        let mut body = String::with_capacity(facts.len() * 160);
        for fact in facts {
            let encoded = serde_json::to_string(fact).context("failed to encode fact")?;
            let _ = writeln!(body, "{encoded}");
        }
        write_text_atomic(self.stream_path().as_path(), body.as_str())
    }
}

fn normalize_subject(subject: &str) -> String {
    subject
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fact_id(scope: &ScopeKey, subject: &str, version: u32, created_unix_ms: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(subject.as_bytes());
    hasher.update(b"|");
    hasher.update(version.to_le_bytes());
    hasher.update(created_unix_ms.to_le_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(17);
    id.push_str("fact-");
    for byte in digest.iter().take(6) {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &std::path::Path) -> FactStore {
        FactStore::new(root.to_path_buf(), LockCoordinator::new(root))
    }

    #[test]
    fn functional_assert_twice_supersedes_first_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let scope = ScopeKey::Global;

        let first = store
            .assert_fact(&scope, "Editor Choice", "user prefers vim", 0.8)
            .expect("first assert");
        let second = store
            .assert_fact(&scope, "editor choice", "user prefers helix", 0.9)
            .expect("second assert");

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        let current = store.current().expect("current");
        let current_for_subject = current
            .iter()
            .filter(|fact| fact.subject == "editor choice")
            .collect::<Vec<_>>();
        assert_eq!(current_for_subject.len(), 1);
        assert_eq!(current_for_subject[0].id, second.id);

        let chain = store.history(&scope, "editor choice").expect("history");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].superseded_by.as_deref(), Some(second.id.as_str()));
        assert!(chain[1].superseded_by.is_none());
    }

    #[test]
    fn functional_same_subject_in_different_scopes_keeps_separate_chains() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        store
            .assert_fact(&ScopeKey::Global, "css framework", "tailwind", 0.7)
            .expect("global");
        store
            .assert_fact(
                &ScopeKey::Project("landing".to_string()),
                "css framework",
                "vanilla css",
                0.9,
            )
            .expect("project");

        let current = store.current().expect("current");
        assert_eq!(current.len(), 2);
        assert!(current.iter().all(KnowledgeFact::is_current));
    }

    #[test]
    fn functional_query_ranks_specific_scope_first_and_paginates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let project = ScopeKey::Project("foo".to_string());
        store
            .assert_fact(&ScopeKey::Global, "deploy target", "fly.io", 0.6)
            .expect("global");
        store
            .assert_fact(&project, "deploy target", "bare metal", 0.9)
            .expect("project");

        let results = store
            .query(&FactQuery {
                scopes: vec![project.clone(), ScopeKey::Global],
                subject_contains: Some("deploy".to_string()),
                limit: 10,
                offset: 0,
            })
            .expect("query");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].scope, project);

        let second_page = store
            .query(&FactQuery {
                scopes: vec![project, ScopeKey::Global],
                subject_contains: None,
                limit: 1,
                offset: 1,
            })
            .expect("query offset");
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].scope, ScopeKey::Global);
    }

    #[test]
    fn unit_query_unknown_scope_returns_empty_not_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        store
            .assert_fact(&ScopeKey::Global, "anything", "value", 0.5)
            .expect("assert");
        let results = store
            .query(&FactQuery {
                scopes: vec![ScopeKey::App("never-written".to_string())],
                subject_contains: None,
                limit: 10,
                offset: 0,
            })
            .expect("query");
        assert!(results.is_empty());
    }

    #[test]
    fn unit_confidence_is_clamped_to_unit_interval() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let fact = store
            .assert_fact(&ScopeKey::Global, "clamp", "value", 3.5)
            .expect("assert");
        assert_eq!(fact.confidence, 1.0);
    }
}
