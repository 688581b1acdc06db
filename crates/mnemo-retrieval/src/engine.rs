//! Search orchestration across the header index, vector cache, embedding
//! and rerank providers, and the relation graph.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mnemo_core::ScopeKey;
use mnemo_graph::{normalize_entity, GraphStore};
use mnemo_store::{ArtifactKind, IndexManager, SearchDocument};

use crate::capability::{
    embed_texts, rerank_documents, CapabilityError, EmbeddingProviderConfig, RerankProviderConfig,
};
use crate::ranking::{
    embed_text_vector, fuse_weighted, rank_lexical_bm25, rank_vector, RankedCandidate, RankedMatch,
};
use crate::vectors::{VectorRecord, VectorStore};

const SNIPPET_MAX_CHARS: usize = 200;
const GRAPH_SCORE_BASE: f32 = 0.5;

pub const REASON_VECTOR_UNCONFIGURED: &str = "search_degraded_vector_unconfigured";
pub const REASON_VECTOR_FAILED: &str = "search_degraded_vector_failed";
pub const REASON_RERANK_FAILED: &str = "search_rerank_failed";
pub const REASON_DEADLINE_PARTIAL: &str = "search_deadline_partial";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Lexical,
    Vector,
    #[default]
    Hybrid,
    Graph,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub scopes: Vec<ScopeKey>,
    pub mode: SearchMode,
    pub limit: usize,
    pub lexical_weight: f32,
    pub vector_weight: f32,
    pub rerank: bool,
    pub graph_hops: usize,
    pub deadline_ms: Option<u64>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            scopes: Vec::new(),
            mode: SearchMode::default(),
            limit: 10,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            rerank: false,
            graph_hops: 2,
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub scope: ScopeKey,
    pub kind: ArtifactKind,
    pub score: f32,
    pub snippet: String,
    pub via_graph: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchReport {
    pub hits: Vec<SearchHit>,
    pub mode: SearchMode,
    pub degraded: bool,
    pub partial: bool,
    pub reason_codes: Vec<String>,
}

/// Read-side engine over one storage root. Stateless between calls apart
/// from the persistent vector cache.
#[derive(Debug, Clone)]
pub struct RetrievalEngine {
    index: IndexManager,
    graph: GraphStore,
    vectors: VectorStore,
    embedding: Option<EmbeddingProviderConfig>,
    rerank: Option<RerankProviderConfig>,
}

impl RetrievalEngine {
    pub fn new(index: IndexManager, graph: GraphStore, vectors: VectorStore) -> Self {
        Self {
            index,
            graph,
            vectors,
            embedding: EmbeddingProviderConfig::from_env(),
            rerank: RerankProviderConfig::from_env(),
        }
    }

    pub fn with_embedding_provider(mut self, config: Option<EmbeddingProviderConfig>) -> Self {
        self.embedding = config;
        self
    }

    pub fn with_rerank_provider(mut self, config: Option<RerankProviderConfig>) -> Self {
        self.rerank = config;
        self
    }

    /// Runs one search. Vector mode fails when no embedding provider is
    /// configured; hybrid and graph modes degrade to lexical instead and
    /// record the reason. A missed deadline returns what was ranked so far
    /// with `partial` set.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchReport> {
        let deadline = request
            .deadline_ms
            .map(|budget| Instant::now() + Duration::from_millis(budget));
        let query = request.query.trim();
        if query.is_empty() || request.limit == 0 {
            return Ok(SearchReport {
                hits: Vec::new(),
                mode: request.mode,
                degraded: false,
                partial: false,
                reason_codes: Vec::new(),
            });
        }

        self.index.rebuild_if_stale()?;
        let documents = self.index.documents(&request.scopes)?;
        let by_id: HashMap<&str, &SearchDocument> = documents
            .iter()
            .map(|document| (document.id.as_str(), document))
            .collect();
        let candidates = documents
            .iter()
            .map(|document| RankedCandidate {
                id: document.id.clone(),
                text: document.text.clone(),
            })
            .collect::<Vec<_>>();

        // Rank wide, fuse, then cut to the requested limit.
        let pool = request.limit.saturating_mul(4).max(request.limit);
        let lexical = rank_lexical_bm25(query, &candidates, pool, 0.0);

        let mut degraded = false;
        let mut partial = false;
        let mut reason_codes = Vec::new();

        let mut ranked = match request.mode {
            SearchMode::Lexical => lexical,
            SearchMode::Vector => {
                let (vector, vector_partial) =
                    self.rank_by_vector(query, &documents, pool, deadline)?;
                if vector_partial {
                    partial = true;
                    reason_codes.push(REASON_DEADLINE_PARTIAL.to_string());
                }
                vector
            }
            SearchMode::Hybrid | SearchMode::Graph => {
                if deadline_passed(deadline) {
                    partial = true;
                    reason_codes.push(REASON_DEADLINE_PARTIAL.to_string());
                    lexical
                } else {
                    match self.rank_by_vector(query, &documents, pool, deadline) {
                        Ok((vector, vector_partial)) => {
                            if vector_partial {
                                partial = true;
                                reason_codes.push(REASON_DEADLINE_PARTIAL.to_string());
                            }
                            fuse_weighted(
                                &lexical,
                                &vector,
                                pool,
                                request.lexical_weight,
                                request.vector_weight,
                            )
                        }
                        Err(error) => {
                            let reason = match error.downcast_ref::<CapabilityError>() {
                                Some(CapabilityError::Unconfigured { .. }) => {
                                    REASON_VECTOR_UNCONFIGURED
                                }
                                _ => REASON_VECTOR_FAILED,
                            };
                            tracing::warn!(%error, reason, "search_vector_side_degraded");
                            degraded = true;
                            reason_codes.push(reason.to_string());
                            lexical
                        }
                    }
                }
            }
        };

        if request.rerank && !ranked.is_empty() && !deadline_passed(deadline) {
            match self.apply_rerank(query, &mut ranked, &by_id) {
                Ok(()) => {}
                Err(error) => {
                    tracing::warn!(%error, "search_rerank_degraded");
                    degraded = true;
                    reason_codes.push(REASON_RERANK_FAILED.to_string());
                }
            }
        }

        ranked.truncate(request.limit);
        let mut hits = ranked
            .into_iter()
            .filter_map(|candidate| {
                by_id.get(candidate.id.as_str()).map(|document| SearchHit {
                    id: candidate.id,
                    scope: document.scope.clone(),
                    kind: document.kind,
                    score: candidate.score,
                    snippet: snippet(document.text.as_str()),
                    via_graph: false,
                })
            })
            .collect::<Vec<_>>();

        if request.mode == SearchMode::Graph {
            let graph_partial =
                self.augment_from_graph(query, request, deadline, &mut hits)?;
            partial = partial || graph_partial;
            if graph_partial && !reason_codes.iter().any(|code| code == REASON_DEADLINE_PARTIAL) {
                reason_codes.push(REASON_DEADLINE_PARTIAL.to_string());
            }
        }

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.scope.specificity().cmp(&right.scope.specificity()))
                .then_with(|| left.id.cmp(&right.id))
        });
        hits.truncate(request.limit);

        Ok(SearchReport {
            hits,
            mode: request.mode,
            degraded,
            partial,
            reason_codes,
        })
    }

    /// Vector ranking with the persistent cache: fresh cached vectors are
    /// reused, stale or missing ones are re-embedded in one provider batch.
    /// Returns the ranked matches plus whether a missed deadline cut the
    /// candidate set short.
    fn rank_by_vector(
        &self,
        query: &str,
        documents: &[SearchDocument],
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<(Vec<RankedMatch>, bool)> {
        let config = self
            .embedding
            .as_ref()
            .ok_or(CapabilityError::Unconfigured {
                capability: "embedding",
            })?;

        let cached = self.vectors.load()?;
        let mut resolved: Vec<(String, Vec<f32>)> = Vec::with_capacity(documents.len());
        let mut pending: Vec<&SearchDocument> = Vec::new();
        for document in documents {
            match cached.get(document.id.as_str()) {
                Some(record) if record.change_marker_ms == document.updated_unix_ms => {
                    resolved.push((document.id.clone(), record.vector.clone()));
                }
                _ => pending.push(document),
            }
        }

        let mut cut_short = false;
        if !pending.is_empty() {
            if deadline_passed(deadline) {
                // Unembedded documents fall out of the candidate set; the
                // caller reports the result as partial.
                cut_short = true;
            } else {
                let inputs = pending
                    .iter()
                    .map(|document| document.text.clone())
                    .collect::<Vec<_>>();
                let embedded = embed_texts(config, &inputs)?;
                let mut fresh = Vec::with_capacity(pending.len());
                for (document, vector) in pending.iter().zip(embedded.into_iter()) {
                    fresh.push(VectorRecord {
                        schema_version: 1,
                        id: document.id.clone(),
                        change_marker_ms: document.updated_unix_ms,
                        vector: vector.clone(),
                    });
                    resolved.push((document.id.clone(), vector));
                }
                self.vectors.store(&fresh)?;
            }
        }

        // Past the deadline the provider is not consulted again; the local
        // hash embedding keeps the ranking deterministic over what resolved.
        let query_vector = if deadline_passed(deadline) {
            cut_short = true;
            embed_text_vector(query, config.dimensions)
        } else {
            embed_texts(config, &[query.to_string()])?
                .into_iter()
                .next()
                .unwrap_or_else(|| embed_text_vector(query, config.dimensions))
        };
        Ok((rank_vector(&query_vector, &resolved, limit, 0.0), cut_short))
    }

    /// Replaces fused scores for the current top candidates with provider
    /// relevance scores; candidates the provider drops keep their order after
    /// the reranked block.
    fn apply_rerank(
        &self,
        query: &str,
        ranked: &mut Vec<RankedMatch>,
        by_id: &HashMap<&str, &SearchDocument>,
    ) -> Result<()> {
        let config = self.rerank.as_ref().ok_or(CapabilityError::Unconfigured {
            capability: "rerank",
        })?;
        let texts = ranked
            .iter()
            .filter_map(|candidate| {
                by_id
                    .get(candidate.id.as_str())
                    .map(|document| document.text.clone())
            })
            .collect::<Vec<_>>();
        let reranked = rerank_documents(config, query, &texts, texts.len())
            .context("rerank request failed")?;

        let mut reordered = Vec::with_capacity(ranked.len());
        let mut taken = vec![false; ranked.len()];
        for result in reranked {
            if let Some(candidate) = ranked.get(result.index) {
                reordered.push(RankedMatch {
                    id: candidate.id.clone(),
                    score: result.relevance_score,
                });
                taken[result.index] = true;
            }
        }
        let floor = reordered
            .last()
            .map(|candidate| candidate.score)
            .unwrap_or(0.0);
        for (index, candidate) in ranked.iter().enumerate() {
            if !taken[index] {
                reordered.push(RankedMatch {
                    id: candidate.id.clone(),
                    // Keep dropped candidates strictly below the reranked block.
                    score: floor - 1.0 - index as f32,
                });
            }
        }
        *ranked = reordered;
        Ok(())
    }

    /// Walks relations out of entities named in the query and in the current
    /// hits, adding relation paths as synthetic hits scored by hop distance.
    fn augment_from_graph(
        &self,
        query: &str,
        request: &SearchRequest,
        deadline: Option<Instant>,
        hits: &mut Vec<SearchHit>,
    ) -> Result<bool> {
        let top_score = hits.first().map(|hit| hit.score).unwrap_or(1.0).max(0.0);
        let mut seeds = query
            .split(|character: char| !character.is_alphanumeric() && character != '-')
            .map(normalize_entity)
            .filter(|seed| !seed.is_empty())
            .collect::<Vec<_>>();
        // Known graph entities mentioned in the top results seed traversal too.
        let snippets = hits
            .iter()
            .map(|hit| hit.snippet.to_lowercase())
            .collect::<Vec<_>>();
        for triple in self.graph.visible_triples(&request.scopes)? {
            let subject = normalize_entity(triple.subject.as_str());
            if snippets.iter().any(|snippet| snippet.contains(subject.as_str())) {
                seeds.push(subject);
            }
        }
        seeds.sort();
        seeds.dedup();

        let mut partial = false;
        for seed in seeds {
            if deadline_passed(deadline) {
                partial = true;
                break;
            }
            let traversal =
                self.graph
                    .multi_hop(&request.scopes, seed.as_str(), request.graph_hops, deadline)?;
            partial = partial || traversal.partial;
            for path in traversal.paths {
                let Some(last) = path.triples.last() else {
                    continue;
                };
                let id = format!("graph:{}", path.entities.join(">"));
                if hits.iter().any(|hit| hit.id == id) {
                    continue;
                }
                let description = path
                    .triples
                    .iter()
                    .map(|triple| {
                        format!("{} {} {}", triple.subject, triple.predicate, triple.object)
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                // Each hop halves the contribution relative to the best hit.
                let score =
                    top_score * GRAPH_SCORE_BASE.powi(path.hops() as i32) * last.confidence;
                hits.push(SearchHit {
                    id,
                    scope: last.scope.clone(),
                    kind: ArtifactKind::Fact,
                    score,
                    snippet: snippet(description.as_str()),
                    via_graph: true,
                });
            }
        }
        Ok(partial)
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|cutoff| Instant::now() >= cutoff)
}

fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_MAX_CHARS {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(SNIPPET_MAX_CHARS).collect();
    format!("{truncated}...")
}
