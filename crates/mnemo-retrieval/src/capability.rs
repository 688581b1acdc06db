//! Optional remote capabilities: embedding and reranking providers.
//!
//! Both speak common HTTP shapes: embeddings as an OpenAI-compatible
//! `POST /embeddings`, reranking as a Cohere-compatible `POST /rerank`.
//! Configuration comes from the environment; an absent configuration is a
//! typed condition callers decide how to handle, not an error string.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{capability} capability is not configured")]
    Unconfigured { capability: &'static str },
    #[error("{capability} request failed: {detail}")]
    Request {
        capability: &'static str,
        detail: String,
    },
    #[error("{capability} response malformed: {detail}")]
    MalformedResponse {
        capability: &'static str,
        detail: String,
    },
}

/// OpenAI-compatible embedding endpoint configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingProviderConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_ms: u64,
}

impl EmbeddingProviderConfig {
    /// Reads `MNEMO_EMBEDDING_API_BASE`, `MNEMO_EMBEDDING_API_KEY`,
    /// `MNEMO_EMBEDDING_MODEL`, and optional `MNEMO_EMBEDDING_DIMENSIONS` /
    /// `MNEMO_EMBEDDING_TIMEOUT_MS`. Missing required values leave the
    /// capability unconfigured.
    pub fn from_env() -> Option<Self> {
        let api_base = non_empty_env("MNEMO_EMBEDDING_API_BASE")?;
        let api_key = non_empty_env("MNEMO_EMBEDDING_API_KEY")?;
        let model = non_empty_env("MNEMO_EMBEDDING_MODEL")?;
        Some(Self {
            api_base,
            api_key,
            model,
            dimensions: parsed_env("MNEMO_EMBEDDING_DIMENSIONS")
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            timeout_ms: parsed_env("MNEMO_EMBEDDING_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS),
        })
    }
}

/// Cohere-compatible rerank endpoint configuration.
#[derive(Debug, Clone)]
pub struct RerankProviderConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl RerankProviderConfig {
    /// Reads `MNEMO_RERANK_API_BASE`, `MNEMO_RERANK_API_KEY`,
    /// `MNEMO_RERANK_MODEL`, and optional `MNEMO_RERANK_TIMEOUT_MS`.
    pub fn from_env() -> Option<Self> {
        let api_base = non_empty_env("MNEMO_RERANK_API_BASE")?;
        let api_key = non_empty_env("MNEMO_RERANK_API_KEY")?;
        let model = non_empty_env("MNEMO_RERANK_MODEL")?;
        Some(Self {
            api_base,
            api_key,
            model,
            timeout_ms: parsed_env("MNEMO_RERANK_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS),
        })
    }
}

/// One rerank result: the index into the submitted document list plus the
/// provider's relevance score.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RerankedDocument {
    pub index: usize,
    pub relevance_score: f32,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankedDocument>,
}

/// Embeds `inputs` in one batch call. Returned vectors keep input order and
/// are normalized to `config.dimensions` components.
pub fn embed_texts(
    config: &EmbeddingProviderConfig,
    inputs: &[String],
) -> Result<Vec<Vec<f32>>, CapabilityError> {
    const CAPABILITY: &str = "embedding";
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let response = build_client(CAPABILITY, config.timeout_ms)?
        .post(format!(
            "{}/embeddings",
            config.api_base.trim_end_matches('/')
        ))
        .bearer_auth(config.api_key.as_str())
        .json(&serde_json::json!({
            "model": config.model,
            "input": inputs,
        }))
        .send()
        .map_err(|error| CapabilityError::Request {
            capability: CAPABILITY,
            detail: error.to_string(),
        })?;
    let payload = decode_success(CAPABILITY, response)?;

    let data = payload
        .get("data")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| CapabilityError::MalformedResponse {
            capability: CAPABILITY,
            detail: "missing data array".to_string(),
        })?;
    if data.len() != inputs.len() {
        return Err(CapabilityError::MalformedResponse {
            capability: CAPABILITY,
            detail: format!("expected {} vectors, got {}", inputs.len(), data.len()),
        });
    }

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let raw = item
            .get("embedding")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| CapabilityError::MalformedResponse {
                capability: CAPABILITY,
                detail: "item missing embedding array".to_string(),
            })?;
        let parsed = raw
            .iter()
            .map(|component| {
                component.as_f64().map(|value| value as f32).ok_or_else(|| {
                    CapabilityError::MalformedResponse {
                        capability: CAPABILITY,
                        detail: "embedding component must be numeric".to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        vectors.push(crate::ranking::resize_and_normalize(
            &parsed,
            config.dimensions,
        ));
    }
    Ok(vectors)
}

/// Reranks `documents` against `query`, returning up to `top_n` results in
/// provider relevance order.
pub fn rerank_documents(
    config: &RerankProviderConfig,
    query: &str,
    documents: &[String],
    top_n: usize,
) -> Result<Vec<RerankedDocument>, CapabilityError> {
    const CAPABILITY: &str = "rerank";
    if documents.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let response = build_client(CAPABILITY, config.timeout_ms)?
        .post(format!("{}/rerank", config.api_base.trim_end_matches('/')))
        .bearer_auth(config.api_key.as_str())
        .json(&serde_json::json!({
            "model": config.model,
            "query": query,
            "documents": documents,
            "top_n": top_n,
        }))
        .send()
        .map_err(|error| CapabilityError::Request {
            capability: CAPABILITY,
            detail: error.to_string(),
        })?;
    let payload = decode_success(CAPABILITY, response)?;

    let decoded: RerankResponse =
        serde_json::from_value(payload).map_err(|error| CapabilityError::MalformedResponse {
            capability: CAPABILITY,
            detail: error.to_string(),
        })?;
    for result in &decoded.results {
        if result.index >= documents.len() {
            return Err(CapabilityError::MalformedResponse {
                capability: CAPABILITY,
                detail: format!("result index {} out of range", result.index),
            });
        }
    }
    Ok(decoded.results)
}

fn build_client(
    capability: &'static str,
    timeout_ms: u64,
) -> Result<reqwest::blocking::Client, CapabilityError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(timeout_ms.max(1)))
        .build()
        .map_err(|error| CapabilityError::Request {
            capability,
            detail: format!("failed to build client: {error}"),
        })
}

fn decode_success(
    capability: &'static str,
    response: reqwest::blocking::Response,
) -> Result<serde_json::Value, CapabilityError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(CapabilityError::Request {
            capability,
            detail: format!(
                "status {}: {}",
                status.as_u16(),
                body.chars().take(240).collect::<String>()
            ),
        });
    }
    response
        .json::<serde_json::Value>()
        .map_err(|error| CapabilityError::MalformedResponse {
            capability,
            detail: error.to_string(),
        })
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_env(name).and_then(|value| value.parse().ok())
}
