//! Retrieval-augmented question answering.
//!
//! ```text
//! query ──▶ embed ──▶ top-k search ──▶ join "\n\n" ──▶ {context} ──▶ LLM ──▶ Answer
//! ```

use crate::config::RetrievalConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generation::{GenerationProvider, Prompt};
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

/// Default system prompt; `{context}` is replaced with the retrieved chunks.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Use the given context to answer the question. \
If you don't know the answer, say you don't know. \
Use three sentences maximum and keep the answer concise. \
Do not generate inaccurate answers. \
Context: {context}";

/// A generated answer plus the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub context: Vec<RetrievedChunk>,
}

pub struct RagPipeline<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    generator: &'a dyn GenerationProvider,
    top_k: usize,
    system_prompt: String,
}

impl<'a> RagPipeline<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        generator: &'a dyn GenerationProvider,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            top_k: config.top_k.max(1),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the system prompt template. Must contain `{context}`.
    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_prompt = template.into();
        self
    }

    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyInput("question is blank".to_string()));
        }

        let query_vec = embedding::embed_query(self.embedder, query)
            .await
            .map_err(|e| RagError::RetrievalError(format!("embedding the question: {}", e)))?;

        let context = self.index.search(&query_vec, self.top_k)?;
        tracing::debug!(
            hits = context.len(),
            best = context.first().map(|c| c.score).unwrap_or(0.0),
            "retrieved context"
        );

        let prompt = build_prompt(&self.system_prompt, query, &context);
        let answer = self.generator.generate(&prompt).await.map_err(|e| match e {
            RagError::GenerationError(_) => e,
            other => RagError::GenerationError(other.to_string()),
        })?;

        Ok(Answer { answer, context })
    }
}

/// Fill `{context}` in `template` with the chunk texts joined by blank lines.
pub fn build_prompt(template: &str, query: &str, context: &[RetrievedChunk]) -> Prompt {
    let joined = context
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Prompt {
        system: template.replace("{context}", &joined),
        user: query.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: text.into(),
                row_index: 0,
                chunk_index: 0,
                text: text.into(),
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn test_build_prompt_joins_context() {
        let prompt = build_prompt(
            DEFAULT_SYSTEM_PROMPT,
            "Who scored 20?",
            &[hit("Name: A\nScore: 10"), hit("Name: B\nScore: 20")],
        );
        assert!(prompt
            .system
            .ends_with("Context: Name: A\nScore: 10\n\nName: B\nScore: 20"));
        assert!(prompt.system.starts_with("Use the given context"));
        assert_eq!(prompt.user, "Who scored 20?");
    }

    #[test]
    fn test_build_prompt_without_hits() {
        let prompt = build_prompt("ctx=[{context}]", "q", &[]);
        assert_eq!(prompt.system, "ctx=[]");
    }
}
