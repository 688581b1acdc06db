//! Agent-facing operation surface: one `Toolkit` handle wiring the scope
//! context, stores, index, graph, and retrieval engine over a single storage
//! root. Every operation returns a serializable report so callers can relay
//! results verbatim.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use mnemo_core::{resolve_scopes, LockCoordinator, ScopeContext, ScopeKey};
use mnemo_graph::{GraphStats, GraphStore, GraphTraversal, GraphTriple, TripleFilter};
use mnemo_retrieval::{RetrievalEngine, SearchReport, SearchRequest, VectorStore};
use mnemo_store::{
    FactQuery, IndexHeader, IndexManager, KnowledgeFact, KnowledgeStore, PreferenceRecord,
};

// Stable relative locations of the rebuildable streams; the index reconciles
// them by this path after each mutation.
const PREFERENCES_ARTIFACT: &str = "preferences.jsonl";
const FACTS_ARTIFACT: &str = "knowledge/facts.jsonl";

const DEFAULT_RECENT_DAYS: u32 = 7;

/// Session bootstrap payload: what an agent needs before its first turn.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeReport {
    pub storage_root: PathBuf,
    pub scopes: Vec<ScopeKey>,
    pub preferences: Vec<PreferenceRecord>,
    pub recent_headers: Vec<IndexHeader>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteReport {
    pub path: PathBuf,
    pub scope: ScopeKey,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphQueryReport {
    pub triples: Vec<GraphTriple>,
    pub traversal: Option<GraphTraversal>,
    pub stats: GraphStats,
}

/// One handle per storage root and scope context.
#[derive(Debug, Clone)]
pub struct Toolkit {
    context: ScopeContext,
    store: KnowledgeStore,
    index: IndexManager,
    graph: GraphStore,
    engine: RetrievalEngine,
}

impl Toolkit {
    pub fn new(root: impl Into<PathBuf>, context: ScopeContext) -> Self {
        let root = root.into();
        let store = KnowledgeStore::new(root.clone());
        let index = IndexManager::new(store.clone());
        let locks = LockCoordinator::new(root.clone());
        let graph = GraphStore::new(root.clone(), locks.clone());
        let engine = RetrievalEngine::new(
            index.clone(),
            graph.clone(),
            VectorStore::new(root, locks),
        );
        Self {
            context,
            store,
            index,
            graph,
            engine,
        }
    }

    pub fn with_engine(mut self, engine: RetrievalEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn scopes(&self) -> Vec<ScopeKey> {
        resolve_scopes(&self.context)
    }

    /// The most specific scope in the current context, used as the default
    /// write target.
    pub fn write_scope(&self) -> ScopeKey {
        self.scopes()
            .into_iter()
            .next()
            .unwrap_or(ScopeKey::Global)
    }

    fn target_scope(&self, explicit: Option<ScopeKey>) -> ScopeKey {
        explicit.unwrap_or_else(|| self.write_scope())
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Session bootstrap: resolves the scope chain, merges preferences across
    /// it, and returns headers for the most recent artifacts.
    pub fn initialize(&self, recent_limit: usize) -> Result<InitializeReport> {
        let scopes = self.scopes();
        let preferences = self.store.merged_preferences(&scopes)?;
        self.index.rebuild_if_stale()?;
        let recent_headers = self.index.scan(&scopes, recent_limit, 0)?;
        tracing::info!(
            scopes = scopes.len(),
            preferences = preferences.len(),
            headers = recent_headers.len(),
            "toolkit_initialized"
        );
        Ok(InitializeReport {
            storage_root: self.store.root().to_path_buf(),
            scopes,
            preferences,
            recent_headers,
        })
    }

    /// Cheap metadata listing over everything visible in the current scopes.
    pub fn read_headers(&self, limit: usize, offset: usize) -> Result<Vec<IndexHeader>> {
        self.index.rebuild_if_stale()?;
        self.index.scan(&self.scopes(), limit, offset)
    }

    /// Full content for one header id; resolution is confined to the storage
    /// root.
    pub fn read_content(&self, id: &str) -> Result<String> {
        self.index.rebuild_if_stale()?;
        self.index.read_content(id)
    }

    /// Appends a journal entry for `date` (today when absent) and reconciles
    /// the index for that day file.
    pub fn write_log(
        &self,
        scope: Option<ScopeKey>,
        date: Option<NaiveDate>,
        content: &str,
    ) -> Result<WriteReport> {
        let scope = self.target_scope(scope);
        let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
        let path = self.store.append_log(&scope, date, content)?;
        if let Some(relative) = relative_to(self.store.root(), path.as_path()) {
            self.index.ensure_fresh(relative.as_str())?;
        }
        Ok(WriteReport { path, scope })
    }

    /// Sets a preference, defaulting to the most specific context scope.
    pub fn write_preference(
        &self,
        scope: Option<ScopeKey>,
        key: &str,
        value: &str,
    ) -> Result<PreferenceRecord> {
        let scope = self.target_scope(scope);
        let record = self.store.put_preference(&scope, key, value)?;
        self.index.ensure_fresh(PREFERENCES_ARTIFACT)?;
        Ok(record)
    }

    /// Records a fact, superseding any current fact with the same subject in
    /// the target scope.
    pub fn write_fact(
        &self,
        scope: Option<ScopeKey>,
        subject: &str,
        statement: &str,
        confidence: f32,
    ) -> Result<KnowledgeFact> {
        let scope = self.target_scope(scope);
        let fact = self
            .store
            .assert_fact(&scope, subject, statement, confidence)?;
        self.index.ensure_fresh(FACTS_ARTIFACT)?;
        Ok(fact)
    }

    /// Current facts visible from the scope chain, optionally filtered by
    /// subject substring.
    pub fn query_facts(
        &self,
        subject_contains: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KnowledgeFact>> {
        self.store.query_facts(&FactQuery {
            scopes: self.scopes(),
            subject_contains: subject_contains.map(str::to_string),
            limit,
            offset,
        })
    }

    /// Retrieval across the indexed corpus. An empty scope list means "use
    /// the context scope chain"; a request that names scopes, even just
    /// `global`, searches exactly those.
    pub fn search(&self, mut request: SearchRequest) -> Result<SearchReport> {
        if request.scopes.is_empty() {
            request.scopes = self.scopes();
        }
        self.engine.search(&request)
    }

    /// Asserts a relation edge, defaulting to the most specific context
    /// scope.
    pub fn assert_relation(
        &self,
        scope: Option<ScopeKey>,
        subject: &str,
        predicate: &str,
        object: &str,
        confidence: f32,
        source_fact_id: Option<&str>,
    ) -> Result<GraphTriple> {
        let scope = self.target_scope(scope);
        self.graph
            .assert_relation(&scope, subject, predicate, object, confidence, source_fact_id)
    }

    /// Relation lookup plus optional traversal from a start entity, with
    /// graph statistics for the visible scopes.
    pub fn graph_query(
        &self,
        filter: TripleFilter,
        traverse_from: Option<&str>,
        max_hops: usize,
    ) -> Result<GraphQueryReport> {
        let scopes = self.scopes();
        let filter = TripleFilter { scopes: scopes.clone(), ..filter };
        let triples = self.graph.query(&filter)?;
        let traversal = traverse_from
            .map(|start| self.graph.multi_hop(&scopes, start, max_hops, None))
            .transpose()?;
        let stats = self.graph.stats(&scopes)?;
        Ok(GraphQueryReport {
            triples,
            traversal,
            stats,
        })
    }

    /// Journal days with content in the window ending at `until`, newest
    /// first.
    pub fn recent_log_days(&self, until: NaiveDate) -> Vec<NaiveDate> {
        self.store
            .journal()
            .recent_days(until, DEFAULT_RECENT_DAYS)
            .into_iter()
            .map(|(date, _)| date)
            .collect()
    }
}

fn relative_to(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|relative| relative.to_string_lossy().replace('\\', "/"))
}
