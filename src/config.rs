//! TOML configuration.
//!
//! Every section is optional; a missing config file yields
//! [`Config::default`], which points at `./data`, `./vectorstore` and
//! `./chat_history` and uses Cohere embeddings with Groq generation.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory scanned by `srag files`.
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite file holding the persisted vector index.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("vectorstore/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Override the provider's API root (e.g. a proxy).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "cohere".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("embed-v4.0".to_string())
}
fn default_batch_size() -> usize {
    96
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// System prompt; must contain a `{context}` slot.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            base_url: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_retries(),
            system_prompt: None,
        }
    }
}

fn default_generation_provider() -> String {
    "groq".to_string()
}
fn default_generation_model() -> String {
    "gemma2-9b-it".to_string()
}
fn default_max_tokens() -> u32 {
    512
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
    /// User identity when `--user` is not given.
    #[serde(default = "default_user")]
    pub default_user: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
            default_user: default_user(),
        }
    }
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("chat_history")
}
fn default_user() -> String {
    "default".to_string()
}

/// Read and validate a config file. A missing file is not an error: the
/// defaults are returned instead.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| RagError::Config(format!("failed to parse config file: {}", e)))?;

    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size".into(),
            ));
        }

        if self.retrieval.top_k < 1 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }

        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be > 0".into()));
        }

        match self.embedding.provider.as_str() {
            "disabled" => {}
            "cohere" | "openai" => {
                if self.embedding.model.is_none() {
                    return Err(RagError::Config(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    )));
                }
                if self.embedding.dims == Some(0) {
                    return Err(RagError::Config("embedding.dims must be > 0".into()));
                }
            }
            other => {
                return Err(RagError::Config(format!(
                    "unknown embedding provider: '{}'. Must be cohere, openai, or disabled.",
                    other
                )))
            }
        }

        match self.generation.provider.as_str() {
            "disabled" | "groq" | "openai" => {}
            other => {
                return Err(RagError::Config(format!(
                    "unknown generation provider: '{}'. Must be groq, openai, or disabled.",
                    other
                )))
            }
        }

        if let Some(prompt) = &self.generation.system_prompt {
            if !prompt.contains("{context}") {
                return Err(RagError::Config(
                    "generation.system_prompt must contain a {context} slot".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src).expect("valid toml");
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.provider, "cohere");
        assert_eq!(config.embedding.model.as_deref(), Some("embed-v4.0"));
        assert_eq!(config.generation.model, "gemma2-9b-it");
        assert_eq!(config.generation.temperature, 0.0);
        assert_eq!(config.index.path, PathBuf::from("vectorstore/index.sqlite"));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse("[chunking]\nchunk_size = 50\nchunk_overlap = 50\n").unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse("[embedding]\nprovider = \"fastembed\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown embedding provider"));

        let err = parse("[generation]\nprovider = \"anthropic\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown generation provider"));
    }

    #[test]
    fn system_prompt_needs_context_slot() {
        let err = parse("[generation]\nsystem_prompt = \"Answer briefly.\"\n").unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn example_config_matches_defaults() {
        let config = parse(include_str!("../config/srag.example.toml")).unwrap();
        assert_eq!(config.embedding.batch_size, 96);
        assert_eq!(config.generation.max_tokens, 512);
        assert!(config.generation.system_prompt.is_none());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/srag.toml")).unwrap();
        assert_eq!(config.history.default_user, "default");
    }
}
