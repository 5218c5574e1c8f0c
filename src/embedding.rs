//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`CohereProvider`]**: calls the Cohere v2 embed API.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//!
//! Both HTTP providers batch nothing themselves (the index manager sends
//! `embedding.batch_size` texts per call) and retry transient failures with
//! exponential backoff.
//!
//! Also provides vector utilities for the SQLite-backed index:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use sheet_rag::config::EmbeddingConfig;
//! # use sheet_rag::embedding::create_provider;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "disabled".to_string();
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! Credentials are read from the environment on the first call to
//! [`EmbeddingProvider::embed`], never at construction.

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::http;

const COHERE_BASE: &str = "https://api.cohere.com/v2";
const OPENAI_BASE: &str = "https://api.openai.com/v1";

/// What a batch of texts will be used for. Some providers embed documents
/// and queries differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPurpose {
    Document,
    Query,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"embed-v4.0"`).
    fn model_name(&self) -> &str;

    /// Returns the configured vector dimensionality, if pinned.
    fn dims(&self) -> Option<usize>;

    /// Embed a batch of texts; one vector per input, in input order.
    async fn embed(&self, texts: &[String], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`EmbeddingProvider::embed`] for the
/// retrieval step of the pipeline.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider
        .embed(&[text.to_string()], EmbedPurpose::Query)
        .await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| RagError::EmbeddingProviderError("empty embedding response".to_string()))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> Option<usize> {
        None
    }
    async fn embed(&self, _texts: &[String], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingProviderError(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }
}

// ============ Cohere Provider ============

/// Embedding provider using the Cohere v2 API (`POST /v2/embed`).
///
/// Requires `EMBEDDING_API_KEY` (or `COHERE_API_KEY`) in the environment.
pub struct CohereProvider {
    model: String,
    dims: Option<usize>,
    base_url: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl CohereProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Config("embedding.model required for Cohere provider".to_string())
        })?;
        Ok(Self {
            model,
            dims: config.dims,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| COHERE_BASE.to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, texts: &[String], purpose: EmbedPurpose) -> serde_json::Value {
        let input_type = match purpose {
            EmbedPurpose::Document => "search_document",
            EmbedPurpose::Query => "search_query",
        };
        let mut body = serde_json::json!({
            "model": self.model,
            "texts": texts,
            "input_type": input_type,
            "embedding_types": ["float"],
        });
        if let Some(dims) = self.dims {
            body["output_dimension"] = serde_json::json!(dims);
        }
        body
    }
}

#[async_trait]
impl EmbeddingProvider for CohereProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String], purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        let api_key = http::api_key(&["EMBEDDING_API_KEY", "COHERE_API_KEY"])
            .map_err(RagError::EmbeddingProviderError)?;
        let client = http::client(self.timeout_secs).map_err(RagError::EmbeddingProviderError)?;
        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));

        tracing::debug!(model = %self.model, texts = texts.len(), "requesting Cohere embeddings");
        let json = http::post_json(
            &client,
            &url,
            &api_key,
            &self.request_body(texts, purpose),
            self.max_retries,
            "Cohere",
        )
        .await
        .map_err(RagError::EmbeddingProviderError)?;

        let vectors = parse_cohere_response(&json)?;
        check_count(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Parse the Cohere v2 embed response: `embeddings.float[][]`.
fn parse_cohere_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let rows = json
        .get("embeddings")
        .and_then(|e| e.get("float"))
        .and_then(|f| f.as_array())
        .ok_or_else(|| {
            RagError::EmbeddingProviderError(
                "invalid Cohere response: missing embeddings.float".to_string(),
            )
        })?;

    rows.iter().map(parse_vector).collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (`POST /v1/embeddings`).
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: Option<usize>,
    base_url: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Config("embedding.model required for OpenAI provider".to_string())
        })?;
        Ok(Self {
            model,
            dims: config.dims,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE.to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
        let api_key = http::api_key(&["OPENAI_API_KEY"]).map_err(RagError::EmbeddingProviderError)?;
        let client = http::client(self.timeout_secs).map_err(RagError::EmbeddingProviderError)?;
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if let Some(dims) = self.dims {
            body["dimensions"] = serde_json::json!(dims);
        }

        tracing::debug!(model = %self.model, texts = texts.len(), "requesting OpenAI embeddings");
        let json = http::post_json(&client, &url, &api_key, &body, self.max_retries, "OpenAI")
            .await
            .map_err(RagError::EmbeddingProviderError)?;

        let vectors = parse_openai_response(&json)?;
        check_count(texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and returns them ordered by
/// their `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            RagError::EmbeddingProviderError(
                "invalid OpenAI response: missing data array".to_string(),
            )
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            RagError::EmbeddingProviderError(
                "invalid OpenAI response: missing embedding".to_string(),
            )
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, parse_vector(embedding)?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    let arr = value.as_array().ok_or_else(|| {
        RagError::EmbeddingProviderError("invalid embedding: expected an array".to_string())
    })?;
    arr.iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RagError::EmbeddingProviderError("invalid embedding: non-numeric value".to_string())
            })
        })
        .collect()
}

fn check_count(expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(RagError::EmbeddingProviderError(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }
    Ok(())
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"cohere"` | [`CohereProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "cohere" => Ok(Box::new(CohereProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => Err(RagError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use sheet_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_parse_cohere_response() {
        let json = serde_json::json!({
            "id": "abc",
            "embeddings": { "float": [[0.1, 0.2], [0.3, 0.4]] },
            "texts": ["a", "b"]
        });
        let vecs = parse_cohere_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_cohere_missing_float() {
        let json = serde_json::json!({ "embeddings": {} });
        assert!(matches!(
            parse_cohere_response(&json),
            Err(RagError::EmbeddingProviderError(_))
        ));
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 2.0] },
                { "index": 0, "embedding": [1.0, 1.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_cohere_body_uses_input_type() {
        let mut config = EmbeddingConfig::default();
        config.dims = Some(256);
        let provider = CohereProvider::new(&config).unwrap();
        let body = provider.request_body(&["q".to_string()], EmbedPurpose::Query);
        assert_eq!(body["input_type"], "search_query");
        assert_eq!(body["output_dimension"], 256);
        assert_eq!(body["model"], "embed-v4.0");
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let err = DisabledProvider
            .embed(&["x".to_string()], EmbedPurpose::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingProviderError(_)));
    }

    #[test]
    fn test_check_count_mismatch() {
        assert!(check_count(2, &[vec![1.0]]).is_err());
        assert!(check_count(1, &[vec![1.0]]).is_ok());
    }
}
