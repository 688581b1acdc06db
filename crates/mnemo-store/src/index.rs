//! Incremental header index over the backing artifacts.
//!
//! Headers are derived, rebuildable metadata: scanning them answers "what is
//! stored where" without loading full content. Freshness is tracked per
//! artifact with a modification marker; reconciliation rebuilds only headers
//! whose marker differs from the artifact's current one, never the whole
//! index. Scans take no lock and may observe an in-flight refresh.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use mnemo_core::{write_text_atomic, ScopeKey};

use crate::{KnowledgeStore, SearchDocument, DEFAULT_LOCK_WAIT};

const INDEX_SNAPSHOT_FILE: &str = ".index/headers.json";
const INDEX_SCHEMA_VERSION: u32 = 1;
const INDEX_LOCK_RESOURCE: &str = "index";
const SUMMARY_MAX_CHARS: usize = 120;

const PREFERENCES_ARTIFACT: &str = "preferences.jsonl";
const FACTS_ARTIFACT: &str = "knowledge/facts.jsonl";

/// Kind of backing artifact a header summarizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Log,
    Preference,
    Fact,
}

/// Lightweight derived metadata for one retrievable document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexHeader {
    pub id: String,
    pub path: String,
    pub scope: ScopeKey,
    pub kind: ArtifactKind,
    pub change_marker_ms: u64,
    pub summary: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ArtifactIndex {
    change_marker_ms: u64,
    headers: Vec<IndexHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexSnapshot {
    schema_version: u32,
    artifacts: BTreeMap<String, ArtifactIndex>,
}

impl Default for IndexSnapshot {
    fn default() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            artifacts: BTreeMap::new(),
        }
    }
}

/// Outcome of one reconciliation pass. A second pass with no intervening
/// writes reports zero rebuilt artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexRefreshReport {
    pub checked_artifacts: usize,
    pub rebuilt_artifacts: usize,
    pub removed_artifacts: usize,
    pub skipped_corrupt: usize,
}

/// Owns and exclusively mutates the header snapshot.
#[derive(Debug, Clone)]
pub struct IndexManager {
    store: KnowledgeStore,
}

impl IndexManager {
    pub fn new(store: KnowledgeStore) -> Self {
        Self { store }
    }

    fn root(&self) -> &Path {
        self.store.root()
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root().join(INDEX_SNAPSHOT_FILE)
    }

    /// Header-only scan, cheap and lock-free. Headers are filtered to the
    /// visible scopes, ordered by scope precedence then recency, paginated.
    pub fn scan(
        &self,
        scopes: &[ScopeKey],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<IndexHeader>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let snapshot = match self.load_snapshot()? {
            Some(snapshot) => snapshot,
            // First access on a fresh store: build the initial snapshot.
            None => {
                self.rebuild_if_stale()?;
                self.load_snapshot()?.unwrap_or_default()
            }
        };
        let mut headers = snapshot
            .artifacts
            .into_values()
            .flat_map(|artifact| artifact.headers)
            .filter(|header| scopes.contains(&header.scope))
            .collect::<Vec<_>>();
        headers.sort_by(|left, right| {
            left.scope
                .specificity()
                .cmp(&right.scope.specificity())
                .then_with(|| right.change_marker_ms.cmp(&left.change_marker_ms))
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(headers.into_iter().skip(offset).take(limit).collect())
    }

    /// Reconciles the index for one backing artifact. Returns true when the
    /// artifact's headers were rebuilt.
    pub fn ensure_fresh(&self, relative_path: &str) -> Result<bool> {
        let _guard = self
            .store
            .locks()
            .acquire(INDEX_LOCK_RESOURCE, DEFAULT_LOCK_WAIT)
            .context("failed to lock index")?;
        let mut snapshot = self.load_snapshot()?.unwrap_or_default();
        let mut report = IndexRefreshReport::default();
        self.reconcile_artifact(relative_path, &mut snapshot, &mut report)?;
        if report.rebuilt_artifacts > 0 || report.removed_artifacts > 0 {
            self.write_snapshot(&snapshot)?;
        }
        Ok(report.rebuilt_artifacts > 0)
    }

    /// Walks all backing artifacts and rebuilds only headers whose change
    /// marker differs from the artifact's current one.
    pub fn rebuild_if_stale(&self) -> Result<IndexRefreshReport> {
        let _guard = self
            .store
            .locks()
            .acquire(INDEX_LOCK_RESOURCE, DEFAULT_LOCK_WAIT)
            .context("failed to lock index")?;

        let mut snapshot = self.load_snapshot()?.unwrap_or_default();
        let mut report = IndexRefreshReport::default();

        let known = snapshot.artifacts.keys().cloned().collect::<Vec<_>>();
        let mut present = self.enumerate_artifacts()?;
        for known_path in known {
            if !present.contains(&known_path) {
                snapshot.artifacts.remove(&known_path);
                report.removed_artifacts += 1;
            }
        }
        present.sort();
        for relative_path in present {
            self.reconcile_artifact(relative_path.as_str(), &mut snapshot, &mut report)?;
        }

        if report.rebuilt_artifacts > 0 || report.removed_artifacts > 0 {
            self.write_snapshot(&snapshot)?;
        }
        Ok(report)
    }

    /// Full content fetch for one header id, confined to the storage root.
    pub fn read_content(&self, id: &str) -> Result<String> {
        if let Some(scope_raw) = id.strip_prefix("preferences:") {
            let scope = parse_scope(scope_raw)?;
            let entries = self.store.preferences().scope_entries(&scope)?;
            let mut rendered = String::new();
            for entry in entries {
                let _ = writeln!(rendered, "{}: {}", entry.key, entry.value);
            }
            return Ok(rendered);
        }
        if let Some(scope_raw) = id.strip_prefix("facts:") {
            let scope = parse_scope(scope_raw)?;
            let mut facts = self
                .store
                .facts()
                .current()?
                .into_iter()
                .filter(|fact| fact.scope == scope)
                .collect::<Vec<_>>();
            facts.sort_by(|left, right| right.created_unix_ms.cmp(&left.created_unix_ms));
            let mut rendered = String::new();
            for fact in facts {
                let _ = writeln!(
                    rendered,
                    "- {} (subject: {}, v{}, confidence {:.2})",
                    fact.statement, fact.subject, fact.version, fact.confidence
                );
            }
            return Ok(rendered);
        }

        let snapshot = self.load_snapshot()?.unwrap_or_default();
        let header = snapshot
            .artifacts
            .values()
            .flat_map(|artifact| artifact.headers.iter())
            .find(|header| header.id == id)
            .with_context(|| format!("no indexed content for id '{id}'"))?;
        let path = self.root().join(header.path.as_str());
        let resolved = path
            .canonicalize()
            .with_context(|| format!("failed to resolve content path {}", path.display()))?;
        let root = self
            .root()
            .canonicalize()
            .context("failed to resolve storage root")?;
        if !resolved.starts_with(&root) {
            bail!("content id '{id}' resolves outside the storage root");
        }
        fs::read_to_string(&resolved)
            .with_context(|| format!("failed to read content {}", resolved.display()))
    }

    /// Search corpus: visible headers with their full content attached.
    pub fn documents(&self, scopes: &[ScopeKey]) -> Result<Vec<SearchDocument>> {
        let headers = self.scan(scopes, usize::MAX, 0)?;
        let mut documents = Vec::with_capacity(headers.len());
        for header in headers {
            let text = match self.read_content(header.id.as_str()) {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(id = %header.id, %error, "index_artifact_skipped_corrupt");
                    continue;
                }
            };
            documents.push(SearchDocument {
                id: header.id,
                scope: header.scope,
                kind: header.kind,
                text,
                updated_unix_ms: header.change_marker_ms,
            });
        }
        Ok(documents)
    }

    fn reconcile_artifact(
        &self,
        relative_path: &str,
        snapshot: &mut IndexSnapshot,
        report: &mut IndexRefreshReport,
    ) -> Result<()> {
        report.checked_artifacts += 1;
        let absolute = self.root().join(relative_path);
        if !absolute.exists() {
            if snapshot.artifacts.remove(relative_path).is_some() {
                report.removed_artifacts += 1;
            }
            return Ok(());
        }

        let marker = change_marker_ms(&absolute);
        let recorded = snapshot
            .artifacts
            .get(relative_path)
            .map(|artifact| artifact.change_marker_ms);
        if recorded == Some(marker) {
            return Ok(());
        }

        match self.derive_headers(relative_path, marker) {
            Ok(headers) => {
                snapshot.artifacts.insert(
                    relative_path.to_string(),
                    ArtifactIndex {
                        change_marker_ms: marker,
                        headers,
                    },
                );
                report.rebuilt_artifacts += 1;
            }
            Err(error) => {
                // One unreadable artifact must not take the whole scan down.
                tracing::warn!(
                    path = relative_path,
                    %error,
                    "index_artifact_skipped_corrupt"
                );
                report.skipped_corrupt += 1;
            }
        }
        Ok(())
    }

    fn derive_headers(&self, relative_path: &str, marker: u64) -> Result<Vec<IndexHeader>> {
        let absolute = self.root().join(relative_path);
        let size_bytes = fs::metadata(&absolute).map(|meta| meta.len()).unwrap_or(0);

        if relative_path == PREFERENCES_ARTIFACT {
            let current = self.store.preferences().load_current()?;
            let mut by_scope: BTreeMap<ScopeKey, Vec<String>> = BTreeMap::new();
            for record in current {
                by_scope.entry(record.scope).or_default().push(record.key);
            }
            return Ok(by_scope
                .into_iter()
                .map(|(scope, mut keys)| {
                    keys.sort();
                    IndexHeader {
                        id: format!("preferences:{scope}"),
                        path: relative_path.to_string(),
                        scope,
                        kind: ArtifactKind::Preference,
                        change_marker_ms: marker,
                        summary: truncate_summary(keys.join(", ").as_str()),
                        size_bytes,
                    }
                })
                .collect());
        }

        if relative_path == FACTS_ARTIFACT {
            let current = self.store.facts().current()?;
            let mut by_scope: BTreeMap<ScopeKey, Vec<(u64, String)>> = BTreeMap::new();
            for fact in current {
                by_scope
                    .entry(fact.scope)
                    .or_default()
                    .push((fact.created_unix_ms, fact.statement));
            }
            return Ok(by_scope
                .into_iter()
                .map(|(scope, mut statements)| {
                    statements.sort_by(|left, right| right.0.cmp(&left.0));
                    let latest = statements
                        .first()
                        .map(|(_, statement)| statement.as_str())
                        .unwrap_or("");
                    IndexHeader {
                        id: format!("facts:{scope}"),
                        path: relative_path.to_string(),
                        scope,
                        kind: ArtifactKind::Fact,
                        change_marker_ms: marker,
                        summary: truncate_summary(
                            format!("{} current facts; latest: {latest}", statements.len())
                                .as_str(),
                        ),
                        size_bytes,
                    }
                })
                .collect());
        }

        // Journal day file.
        let content = fs::read_to_string(&absolute)
            .with_context(|| format!("failed to read journal artifact {relative_path}"))?;
        let stem = absolute
            .file_stem()
            .and_then(|value| value.to_str())
            .with_context(|| format!("journal artifact {relative_path} has no date stem"))?;
        Ok(vec![IndexHeader {
            id: format!("journal:{stem}"),
            path: relative_path.to_string(),
            scope: ScopeKey::Global,
            kind: ArtifactKind::Log,
            change_marker_ms: marker,
            summary: truncate_summary(first_body_line(content.as_str())),
            size_bytes,
        }])
    }

    fn enumerate_artifacts(&self) -> Result<Vec<String>> {
        let mut artifacts = Vec::new();
        for fixed in [PREFERENCES_ARTIFACT, FACTS_ARTIFACT] {
            if self.root().join(fixed).exists() {
                artifacts.push(fixed.to_string());
            }
        }
        let journal_dir = self.store.journal().journal_dir();
        if journal_dir.exists() {
            collect_markdown_files(&journal_dir, self.root(), &mut artifacts)?;
        }
        Ok(artifacts)
    }

    fn load_snapshot(&self) -> Result<Option<IndexSnapshot>> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read index snapshot {}", path.display()))?;
        match serde_json::from_str::<IndexSnapshot>(raw.as_str()) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) => {
                // A damaged snapshot is derived state: rebuild from scratch.
                tracing::warn!(%error, "index_snapshot_reset_corrupt");
                Ok(None)
            }
        }
    }

    fn write_snapshot(&self, snapshot: &IndexSnapshot) -> Result<()> {
        let encoded =
            serde_json::to_string_pretty(snapshot).context("failed to encode index snapshot")?;
        write_text_atomic(self.snapshot_path().as_path(), encoded.as_str())
    }
}

fn parse_scope(raw: &str) -> Result<ScopeKey> {
    ScopeKey::parse(raw).with_context(|| format!("invalid scope '{raw}' in content id"))
}

fn collect_markdown_files(dir: &Path, root: &Path, into: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list journal directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_markdown_files(&path, root, into)?;
        } else if path.extension().and_then(|value| value.to_str()) == Some("md") {
            if let Ok(relative) = path.strip_prefix(root) {
                into.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

fn change_marker_ms(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|duration| duration.as_millis() as u64)
        // Unreadable marker forces a rebuild next pass; staleness only ever
        // errs toward rebuilding, never toward silently serving stale headers.
        .unwrap_or(0)
}

fn first_body_line(content: &str) -> &str {
    let body = match content.strip_prefix("---\n") {
        Some(rest) => rest.split_once("---\n").map(|(_, body)| body).unwrap_or(rest),
        None => content,
    };
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

fn truncate_summary(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_MAX_CHARS {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(SUMMARY_MAX_CHARS).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup() -> (tempfile::TempDir, KnowledgeStore, IndexManager) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = KnowledgeStore::new(temp.path());
        let index = IndexManager::new(store.clone());
        (temp, store, index)
    }

    fn sample_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 28).expect("date")
    }

    #[test]
    fn functional_rebuild_indexes_all_artifact_kinds() {
        let (_temp, store, index) = setup();
        store
            .put_preference(&ScopeKey::Global, "style", "typescript")
            .expect("preference");
        store
            .assert_fact(&ScopeKey::Global, "editor", "vim", 0.8)
            .expect("fact");
        store
            .append_log(&ScopeKey::Global, sample_date(), "worked on the index")
            .expect("log");

        let report = index.rebuild_if_stale().expect("rebuild");
        assert_eq!(report.rebuilt_artifacts, 3);
        assert_eq!(report.skipped_corrupt, 0);

        let headers = index
            .scan(&[ScopeKey::Global], usize::MAX, 0)
            .expect("scan");
        let ids = headers
            .iter()
            .map(|header| header.id.as_str())
            .collect::<Vec<_>>();
        assert!(ids.contains(&"preferences:global"));
        assert!(ids.contains(&"facts:global"));
        assert!(ids.contains(&"journal:2026-08-28"));
    }

    #[test]
    fn functional_second_rebuild_without_writes_does_zero_work() {
        let (_temp, store, index) = setup();
        store
            .put_preference(&ScopeKey::Global, "style", "typescript")
            .expect("preference");
        store
            .append_log(&ScopeKey::Global, sample_date(), "entry")
            .expect("log");

        let first = index.rebuild_if_stale().expect("first rebuild");
        assert!(first.rebuilt_artifacts > 0);
        let second = index.rebuild_if_stale().expect("second rebuild");
        assert_eq!(second.rebuilt_artifacts, 0);
        assert_eq!(second.removed_artifacts, 0);
    }

    #[test]
    fn functional_scan_filters_by_visible_scope() {
        let (_temp, store, index) = setup();
        store
            .put_preference(&ScopeKey::Project("foo".to_string()), "style", "css")
            .expect("project preference");
        store
            .put_preference(&ScopeKey::Global, "style", "ts")
            .expect("global preference");
        index.rebuild_if_stale().expect("rebuild");

        let global_only = index.scan(&[ScopeKey::Global], usize::MAX, 0).expect("scan");
        assert!(global_only
            .iter()
            .all(|header| header.scope == ScopeKey::Global));

        let with_project = index
            .scan(
                &[ScopeKey::Project("foo".to_string()), ScopeKey::Global],
                usize::MAX,
                0,
            )
            .expect("scan");
        assert!(with_project.len() > global_only.len());
        // More specific scope sorts first.
        assert_eq!(with_project[0].scope, ScopeKey::Project("foo".to_string()));
    }

    #[test]
    fn regression_corrupt_journal_artifact_is_skipped_not_fatal() {
        let (_temp, store, index) = setup();
        store
            .append_log(&ScopeKey::Global, sample_date(), "good entry")
            .expect("log");
        let bad_path = store
            .journal()
            .day_path(NaiveDate::from_ymd_opt(2026, 8, 27).expect("date"));
        fs::create_dir_all(bad_path.parent().expect("parent")).expect("mkdir");
        fs::write(&bad_path, [0xff, 0xfe, 0x00, 0x9f]).expect("write bad bytes");

        let report = index.rebuild_if_stale().expect("rebuild succeeds");
        assert_eq!(report.skipped_corrupt, 1);
        let headers = index
            .scan(&[ScopeKey::Global], usize::MAX, 0)
            .expect("scan");
        assert!(headers.iter().any(|header| header.id == "journal:2026-08-28"));
    }

    #[test]
    fn functional_read_content_round_trips_each_kind() {
        let (_temp, store, index) = setup();
        store
            .put_preference(&ScopeKey::Global, "style", "typescript")
            .expect("preference");
        store
            .assert_fact(&ScopeKey::Global, "editor", "user prefers vim", 0.9)
            .expect("fact");
        store
            .append_log(&ScopeKey::Global, sample_date(), "indexed content")
            .expect("log");
        index.rebuild_if_stale().expect("rebuild");

        let prefs = index.read_content("preferences:global").expect("prefs");
        assert!(prefs.contains("style: typescript"));
        let facts = index.read_content("facts:global").expect("facts");
        assert!(facts.contains("user prefers vim"));
        let journal = index.read_content("journal:2026-08-28").expect("journal");
        assert!(journal.contains("indexed content"));
        assert!(index.read_content("journal:1999-01-01").is_err());
    }

    #[test]
    fn functional_ensure_fresh_updates_single_artifact() {
        let (_temp, store, index) = setup();
        store
            .put_preference(&ScopeKey::Global, "style", "first")
            .expect("preference");
        index.rebuild_if_stale().expect("rebuild");

        assert!(!index.ensure_fresh(PREFERENCES_ARTIFACT).expect("fresh"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .put_preference(&ScopeKey::Global, "style", "second")
            .expect("preference update");
        assert!(index.ensure_fresh(PREFERENCES_ARTIFACT).expect("stale"));

        let headers = index
            .scan(&[ScopeKey::Global], usize::MAX, 0)
            .expect("scan");
        let pref_header = headers
            .iter()
            .find(|header| header.id == "preferences:global")
            .expect("preference header");
        assert!(pref_header.summary.contains("style"));
    }

    #[test]
    fn unit_truncate_summary_bounds_length() {
        let long = "word ".repeat(200);
        let summary = truncate_summary(long.as_str());
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS + 3);
        assert!(summary.ends_with("..."));
    }
}
