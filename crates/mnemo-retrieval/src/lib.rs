//! Retrieval over the indexed knowledge corpus.
//!
//! Four modes: pure lexical BM25, pure vector similarity, weighted hybrid
//! fusion of both, and graph-augmented search. Vector scoring needs an
//! embedding provider; hybrid degrades to lexical when the provider is
//! unconfigured or failing, and records why.

mod capability;
mod engine;
mod ranking;
mod vectors;

pub use capability::{
    embed_texts, rerank_documents, CapabilityError, EmbeddingProviderConfig, RerankProviderConfig,
    RerankedDocument,
};
pub use engine::{RetrievalEngine, SearchHit, SearchMode, SearchReport, SearchRequest};
pub use ranking::{
    cosine_similarity, embed_text_vector, fuse_weighted, rank_lexical_bm25, rank_vector,
    RankedCandidate, RankedMatch,
};
pub use vectors::{VectorRecord, VectorStore};
