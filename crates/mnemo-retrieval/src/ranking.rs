//! Scoring primitives: BM25 lexical ranking, cosine vector ranking, hash
//! fallback embeddings, and weighted score fusion.

use std::collections::HashMap;

/// BM25 shape parameters tuned for short knowledge documents.
pub const BM25_K1: f32 = 1.2;
pub const BM25_B: f32 = 0.75;

/// One scoreable document.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub id: String,
    pub text: String,
}

/// A scored candidate; higher is more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    pub id: String,
    pub score: f32,
}

/// BM25 over the candidate corpus. Scores below `min_score` are dropped;
/// ties break on id for deterministic output.
pub fn rank_lexical_bm25(
    query: &str,
    candidates: &[RankedCandidate],
    limit: usize,
    min_score: f32,
) -> Vec<RankedMatch> {
    if limit == 0 || candidates.is_empty() {
        return Vec::new();
    }
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }
    let min_score = min_score.max(0.0);

    let mut corpus_tokens = Vec::with_capacity(candidates.len());
    let mut doc_frequencies = HashMap::<String, usize>::new();
    let mut total_doc_len = 0usize;
    for candidate in candidates {
        let tokens = tokenize(candidate.text.as_str());
        total_doc_len = total_doc_len.saturating_add(tokens.len());
        let unique = tokens
            .iter()
            .cloned()
            .collect::<std::collections::BTreeSet<_>>();
        for term in unique {
            *doc_frequencies.entry(term).or_default() += 1;
        }
        corpus_tokens.push(tokens);
    }

    let doc_count = candidates.len() as f32;
    let average_doc_len = (total_doc_len as f32 / doc_count).max(1.0);
    let mut matches = Vec::new();
    for (candidate, tokens) in candidates.iter().zip(corpus_tokens.into_iter()) {
        if tokens.is_empty() {
            continue;
        }
        let mut term_frequencies = HashMap::<String, usize>::new();
        for token in tokens {
            *term_frequencies.entry(token).or_default() += 1;
        }
        let doc_len = term_frequencies.values().sum::<usize>() as f32;

        let mut score = 0.0f32;
        for term in &query_tokens {
            let term_frequency = *term_frequencies.get(term.as_str()).unwrap_or(&0) as f32;
            if term_frequency <= 0.0 {
                continue;
            }
            let doc_frequency = *doc_frequencies.get(term.as_str()).unwrap_or(&0) as f32;
            if doc_frequency <= 0.0 {
                continue;
            }
            let idf = (((doc_count - doc_frequency + 0.5) / (doc_frequency + 0.5)) + 1.0).ln();
            let normalization = BM25_K1 * (1.0 - BM25_B + BM25_B * (doc_len / average_doc_len));
            let denominator = (term_frequency + normalization).max(f32::EPSILON);
            score += idf * ((term_frequency * (BM25_K1 + 1.0)) / denominator);
        }

        if score >= min_score && score > 0.0 {
            matches.push(RankedMatch {
                id: candidate.id.clone(),
                score,
            });
        }
    }

    sort_and_truncate(&mut matches, limit);
    matches
}

/// Cosine ranking of pre-embedded candidates against a query vector.
pub fn rank_vector(
    query_vector: &[f32],
    candidate_vectors: &[(String, Vec<f32>)],
    limit: usize,
    min_similarity: f32,
) -> Vec<RankedMatch> {
    if limit == 0 || query_vector.iter().all(|component| *component == 0.0) {
        return Vec::new();
    }
    let mut matches = candidate_vectors
        .iter()
        .filter_map(|(id, vector)| {
            let score = cosine_similarity(query_vector, vector);
            (score >= min_similarity).then(|| RankedMatch {
                id: id.clone(),
                score,
            })
        })
        .collect::<Vec<_>>();
    sort_and_truncate(&mut matches, limit);
    matches
}

/// Fuses two ranked lists with max-normalization: each list's scores are
/// scaled into `[0, 1]` by its own maximum, then combined as a weighted sum.
/// An id present in only one list contributes only that side's weighted
/// score.
pub fn fuse_weighted(
    lexical: &[RankedMatch],
    vector: &[RankedMatch],
    limit: usize,
    lexical_weight: f32,
    vector_weight: f32,
) -> Vec<RankedMatch> {
    if limit == 0 {
        return Vec::new();
    }
    let lexical_weight = lexical_weight.max(0.0);
    let vector_weight = vector_weight.max(0.0);

    let mut scores = HashMap::<String, f32>::new();
    for (matches, weight) in [(lexical, lexical_weight), (vector, vector_weight)] {
        let max_score = matches
            .iter()
            .map(|candidate| candidate.score)
            .fold(0.0f32, f32::max);
        if max_score <= 0.0 {
            continue;
        }
        for candidate in matches {
            *scores.entry(candidate.id.clone()).or_default() +=
                weight * (candidate.score / max_score);
        }
    }

    let mut fused = scores
        .into_iter()
        .map(|(id, score)| RankedMatch { id, score })
        .collect::<Vec<_>>();
    sort_and_truncate(&mut fused, limit);
    fused
}

/// Deterministic fallback embedding: FNV-1a token hashing into a fixed-size
/// signed-bucket vector, L2-normalized.
pub fn embed_text_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let dimensions = dimensions.max(1);
    let mut vector = vec![0.0f32; dimensions];
    for token in tokenize(text) {
        let hash = fnv1a_hash(token.as_bytes());
        let index = (hash as usize) % dimensions;
        let sign = if (hash & 1) == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
    normalize_in_place(&mut vector);
    vector
}

/// Folds an arbitrary-length provider vector into `dimensions` buckets and
/// L2-normalizes it.
pub(crate) fn resize_and_normalize(values: &[f32], dimensions: usize) -> Vec<f32> {
    let dimensions = dimensions.max(1);
    let mut resized = vec![0.0f32; dimensions];
    for (index, value) in values.iter().enumerate() {
        resized[index % dimensions] += *value;
    }
    normalize_in_place(&mut resized);
    resized
}

/// Dot product of equal-length vectors; unit vectors make this cosine.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    left.iter()
        .zip(right)
        .map(|(left, right)| left * right)
        .sum()
}

fn normalize_in_place(vector: &mut [f32]) {
    let magnitude = vector
        .iter()
        .map(|component| component * component)
        .sum::<f32>()
        .sqrt();
    if magnitude > 0.0 {
        for component in vector {
            *component /= magnitude;
        }
    }
}

fn sort_and_truncate(matches: &mut Vec<RankedMatch>, limit: usize) {
    matches.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.id.cmp(&right.id))
    });
    matches.truncate(limit);
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect::<Vec<_>>()
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, text: &str) -> RankedCandidate {
        RankedCandidate {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn unit_bm25_prefers_term_dense_documents() {
        let corpus = vec![
            candidate("a", "rust rust rust memory"),
            candidate("b", "rust appears once here in a longer unrelated sentence"),
            candidate("c", "nothing relevant at all"),
        ];
        let ranked = rank_lexical_bm25("rust", &corpus, 10, 0.0);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "a");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn unit_bm25_empty_query_yields_nothing() {
        let corpus = vec![candidate("a", "anything")];
        assert!(rank_lexical_bm25("   ", &corpus, 10, 0.0).is_empty());
        assert!(rank_lexical_bm25("anything", &corpus, 0, 0.0).is_empty());
    }

    #[test]
    fn unit_hash_embedding_is_deterministic_and_normalized() {
        let first = embed_text_vector("the same sentence", 64);
        let second = embed_text_vector("the same sentence", 64);
        assert_eq!(first, second);
        let magnitude = first.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
        assert!((cosine_similarity(&first, &second) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn unit_rank_vector_filters_below_min_similarity() {
        let query = embed_text_vector("rust borrow checker", 64);
        let near = embed_text_vector("rust borrow checker notes", 64);
        let far = embed_text_vector("completely different topic entirely", 64);
        let ranked = rank_vector(
            &query,
            &[("near".to_string(), near), ("far".to_string(), far)],
            10,
            0.5,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "near");
    }

    #[test]
    fn unit_fusion_weights_shift_the_winner() {
        let lexical = vec![
            RankedMatch {
                id: "lex".to_string(),
                score: 8.0,
            },
            RankedMatch {
                id: "both".to_string(),
                score: 4.0,
            },
        ];
        let vector = vec![
            RankedMatch {
                id: "vec".to_string(),
                score: 0.9,
            },
            RankedMatch {
                id: "both".to_string(),
                score: 0.8,
            },
        ];

        let lexical_heavy = fuse_weighted(&lexical, &vector, 10, 1.0, 0.0);
        assert_eq!(lexical_heavy[0].id, "lex");
        assert!(!lexical_heavy.iter().any(|candidate| candidate.id == "vec"));

        let balanced = fuse_weighted(&lexical, &vector, 10, 0.5, 0.5);
        // Present in both lists beats a single-side maximum.
        assert_eq!(balanced[0].id, "both");
    }

    #[test]
    fn unit_fusion_normalizes_scales_before_combining() {
        let lexical = vec![RankedMatch {
            id: "a".to_string(),
            score: 1000.0,
        }];
        let vector = vec![RankedMatch {
            id: "b".to_string(),
            score: 0.001,
        }];
        let fused = fuse_weighted(&lexical, &vector, 10, 0.5, 0.5);
        // Both are their list's maximum, so both normalize to the same
        // contribution regardless of raw magnitude.
        assert!((fused[0].score - fused[1].score).abs() < 1e-6);
    }

    #[test]
    fn unit_resize_and_normalize_folds_long_vectors() {
        let folded = resize_and_normalize(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3);
        assert_eq!(folded.len(), 3);
        let magnitude = folded.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }
}
