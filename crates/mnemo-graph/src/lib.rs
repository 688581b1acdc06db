//! Scoped relation graph persisted as a JSON triple snapshot.
//!
//! Relations are `(subject, predicate, object)` triples tagged with a scope
//! and optional provenance. Asserting an existing triple refreshes its
//! confidence and timestamp instead of duplicating it. Traversal is
//! breadth-first over subject-to-object edges with per-entity hop
//! deduplication, so cyclic graphs terminate.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use mnemo_core::{current_unix_timestamp_ms, write_text_atomic, LockCoordinator, ScopeKey};

const GRAPH_SNAPSHOT_FILE: &str = "graph/triples.json";
const GRAPH_SCHEMA_VERSION: u32 = 1;
const GRAPH_LOCK_RESOURCE: &str = "graph";
const GRAPH_LOCK_WAIT: Duration = Duration::from_millis(5_000);

fn default_schema_version() -> u32 {
    GRAPH_SCHEMA_VERSION
}

fn default_confidence() -> f32 {
    1.0
}

/// One directed relation edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphTriple {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub scope: ScopeKey,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fact_id: Option<String>,
    pub created_unix_ms: u64,
}

impl GraphTriple {
    fn matches_identity(&self, subject: &str, predicate: &str, object: &str, scope: &ScopeKey) -> bool {
        normalize_entity(self.subject.as_str()) == subject
            && normalize_entity(self.predicate.as_str()) == predicate
            && normalize_entity(self.object.as_str()) == normalize_entity(object)
            && self.scope == *scope
    }
}

/// Filter for triple queries. Exact fields narrow to one value; the contains
/// field matches a substring of any of subject, predicate, or object.
#[derive(Debug, Clone, Default)]
pub struct TripleFilter {
    pub scopes: Vec<ScopeKey>,
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub contains: Option<String>,
    pub limit: usize,
}

/// One traversal result: the entity chain and the edges walked to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphPath {
    pub entities: Vec<String>,
    pub triples: Vec<GraphTriple>,
}

impl GraphPath {
    pub fn hops(&self) -> usize {
        self.triples.len()
    }
}

/// Traversal output; `partial` is set when the deadline cut the walk short.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphTraversal {
    pub paths: Vec<GraphPath>,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GraphStats {
    pub triple_count: usize,
    pub entity_count: usize,
    pub predicate_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphSnapshot {
    schema_version: u32,
    triples: Vec<GraphTriple>,
}

impl Default for GraphSnapshot {
    fn default() -> Self {
        Self {
            schema_version: GRAPH_SCHEMA_VERSION,
            triples: Vec::new(),
        }
    }
}

/// File-backed triple store; mutations run under the graph resource lock.
#[derive(Debug, Clone)]
pub struct GraphStore {
    root: PathBuf,
    locks: LockCoordinator,
}

impl GraphStore {
    pub fn new(root: impl Into<PathBuf>, locks: LockCoordinator) -> Self {
        Self {
            root: root.into(),
            locks,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(GRAPH_SNAPSHOT_FILE)
    }

    /// Inserts or refreshes a relation. Re-asserting the same
    /// `(subject, predicate, object, scope)` updates confidence, provenance,
    /// and timestamp in place and never grows the triple count.
    pub fn assert_relation(
        &self,
        scope: &ScopeKey,
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f32,
        source_fact_id: Option<&str>,
    ) -> Result<GraphTriple> {
        let subject = subject.trim();
        let predicate = predicate.trim();
        let object = object.trim();
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            bail!("relation fields must not be empty");
        }
        let subject_norm = normalize_entity(subject);
        let predicate_norm = normalize_entity(predicate);

        let _guard = self
            .locks
            .acquire(GRAPH_LOCK_RESOURCE, GRAPH_LOCK_WAIT)
            .context("failed to lock graph")?;
        let mut snapshot = self.load_snapshot()?;
        let now = current_unix_timestamp_ms();
        let confidence = confidence.clamp(0.0, 1.0);

        let triple = match snapshot.triples.iter_mut().find(|triple| {
            triple.matches_identity(subject_norm.as_str(), predicate_norm.as_str(), object, scope)
        }) {
            Some(existing) => {
                existing.confidence = confidence;
                existing.created_unix_ms = now;
                if let Some(fact_id) = source_fact_id {
                    existing.source_fact_id = Some(fact_id.to_string());
                }
                existing.clone()
            }
            None => {
                let triple = GraphTriple {
                    schema_version: GRAPH_SCHEMA_VERSION,
                    subject: subject.to_string(),
                    predicate: predicate.to_string(),
                    object: object.to_string(),
                    scope: scope.clone(),
                    confidence,
                    source_fact_id: source_fact_id.map(str::to_string),
                    created_unix_ms: now,
                };
                snapshot.triples.push(triple.clone());
                triple
            }
        };

        self.write_snapshot(&snapshot)?;
        tracing::debug!(
            subject = %triple.subject,
            predicate = %triple.predicate,
            object = %triple.object,
            scope = %triple.scope,
            "graph_relation_asserted"
        );
        Ok(triple)
    }

    /// Triples matching `filter`, newest first. `limit == 0` yields nothing.
    pub fn query(&self, filter: &TripleFilter) -> Result<Vec<GraphTriple>> {
        if filter.limit == 0 {
            return Ok(Vec::new());
        }
        let snapshot = self.load_snapshot()?;
        let subject = filter.subject.as_deref().map(normalize_entity);
        let predicate = filter.predicate.as_deref().map(normalize_entity);
        let object = filter.object.as_deref().map(normalize_entity);
        let contains = filter.contains.as_deref().map(normalize_entity);

        let mut matched = snapshot
            .triples
            .into_iter()
            .filter(|triple| filter.scopes.contains(&triple.scope))
            .filter(|triple| {
                subject
                    .as_deref()
                    .map_or(true, |wanted| normalize_entity(triple.subject.as_str()) == wanted)
            })
            .filter(|triple| {
                predicate
                    .as_deref()
                    .map_or(true, |wanted| normalize_entity(triple.predicate.as_str()) == wanted)
            })
            .filter(|triple| {
                object
                    .as_deref()
                    .map_or(true, |wanted| normalize_entity(triple.object.as_str()) == wanted)
            })
            .filter(|triple| {
                contains.as_deref().map_or(true, |needle| {
                    normalize_entity(triple.subject.as_str()).contains(needle)
                        || normalize_entity(triple.predicate.as_str()).contains(needle)
                        || normalize_entity(triple.object.as_str()).contains(needle)
                })
            })
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| {
            right
                .created_unix_ms
                .cmp(&left.created_unix_ms)
                .then_with(|| left.subject.cmp(&right.subject))
        });
        matched.truncate(filter.limit);
        Ok(matched)
    }

    /// Breadth-first walk from `start` over subject-to-object edges visible
    /// under `scopes`, up to `max_hops` edges deep. Each entity is expanded
    /// at most once per hop depth, so cycles terminate. A reached `deadline`
    /// returns the paths found so far with `partial` set.
    pub fn multi_hop(
        &self,
        scopes: &[ScopeKey],
        start: &str,
        max_hops: usize,
        deadline: Option<Instant>,
    ) -> Result<GraphTraversal> {
        let start_norm = normalize_entity(start);
        if start_norm.is_empty() || max_hops == 0 {
            return Ok(GraphTraversal {
                paths: Vec::new(),
                partial: false,
            });
        }

        let snapshot = self.load_snapshot()?;
        let edges = snapshot
            .triples
            .into_iter()
            .filter(|triple| scopes.contains(&triple.scope))
            .collect::<Vec<_>>();

        let mut paths = Vec::new();
        let mut partial = false;
        let mut visited: HashSet<(String, usize)> = HashSet::new();
        let mut frontier: VecDeque<GraphPath> = VecDeque::new();
        frontier.push_back(GraphPath {
            entities: vec![start_norm.clone()],
            triples: Vec::new(),
        });
        visited.insert((start_norm, 0));

        while let Some(path) = frontier.pop_front() {
            if deadline.is_some_and(|cutoff| Instant::now() >= cutoff) {
                partial = true;
                break;
            }
            let hop = path.hops();
            if hop >= max_hops {
                continue;
            }
            let tail = path
                .entities
                .last()
                .map(String::as_str)
                .unwrap_or_default();
            for edge in edges
                .iter()
                .filter(|edge| normalize_entity(edge.subject.as_str()) == tail)
            {
                let next = normalize_entity(edge.object.as_str());
                if !visited.insert((next.clone(), hop + 1)) {
                    continue;
                }
                let mut extended = path.clone();
                extended.entities.push(next);
                extended.triples.push(edge.clone());
                paths.push(extended.clone());
                frontier.push_back(extended);
            }
        }

        paths.sort_by(|left, right| {
            left.hops()
                .cmp(&right.hops())
                .then_with(|| left.entities.cmp(&right.entities))
        });
        Ok(GraphTraversal { paths, partial })
    }

    pub fn stats(&self, scopes: &[ScopeKey]) -> Result<GraphStats> {
        let snapshot = self.load_snapshot()?;
        let mut entities = HashSet::new();
        let mut predicate_counts = BTreeMap::new();
        let mut triple_count = 0usize;
        for triple in snapshot
            .triples
            .iter()
            .filter(|triple| scopes.contains(&triple.scope))
        {
            triple_count += 1;
            entities.insert(normalize_entity(triple.subject.as_str()));
            entities.insert(normalize_entity(triple.object.as_str()));
            *predicate_counts
                .entry(normalize_entity(triple.predicate.as_str()))
                .or_default() += 1;
        }
        Ok(GraphStats {
            triple_count,
            entity_count: entities.len(),
            predicate_counts,
        })
    }

    /// All triples visible under `scopes`; the traversal and augmentation
    /// paths use this as their edge set.
    pub fn visible_triples(&self, scopes: &[ScopeKey]) -> Result<Vec<GraphTriple>> {
        let snapshot = self.load_snapshot()?;
        Ok(snapshot
            .triples
            .into_iter()
            .filter(|triple| scopes.contains(&triple.scope))
            .collect())
    }

    fn load_snapshot(&self) -> Result<GraphSnapshot> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(GraphSnapshot::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read graph snapshot {}", path.display()))?;
        match serde_json::from_str::<GraphSnapshot>(raw.as_str()) {
            Ok(snapshot) => Ok(snapshot),
            Err(error) => {
                tracing::warn!(%error, "graph_snapshot_reset_corrupt");
                Ok(GraphSnapshot::default())
            }
        }
    }

    fn write_snapshot(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let encoded =
            serde_json::to_string_pretty(snapshot).context("failed to encode graph snapshot")?;
        write_text_atomic(self.snapshot_path().as_path(), encoded.as_str())
    }
}

/// Case-insensitive, whitespace-collapsed entity identity.
pub fn normalize_entity(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
