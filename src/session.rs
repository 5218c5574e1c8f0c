//! One user's interaction context.
//!
//! A [`Session`] ties together the configured providers, the persisted
//! vector index, and the user's chat history. It owns the rebuild policy:
//! the index is rebuilt only when there is none, when it was built with a
//! different embedding model, or when the content fingerprint of the
//! selected file differs from the one last indexed.

use std::path::Path;

use crate::chunk;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::fingerprint::Fingerprint;
use crate::generation::GenerationProvider;
use crate::history::{ChatHistory, HistoryStore};
use crate::index::{IndexStore, VectorIndex};
use crate::loader;
use crate::models::Table;
use crate::pipeline::{Answer, RagPipeline};

/// Result of selecting or uploading a file.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub table: Table,
    pub fingerprint: Fingerprint,
    /// `false` when the existing index was reused.
    pub rebuilt: bool,
    pub chunk_count: usize,
}

pub struct Session {
    config: Config,
    embedder: Box<dyn EmbeddingProvider>,
    generator: Box<dyn GenerationProvider>,
    store: IndexStore,
    index: Option<VectorIndex>,
    last_fingerprint: Option<Fingerprint>,
    history: ChatHistory,
}

impl Session {
    /// Load the persisted index (if any) and `user`'s history.
    pub async fn open(
        config: Config,
        user: &str,
        embedder: Box<dyn EmbeddingProvider>,
        generator: Box<dyn GenerationProvider>,
    ) -> Result<Self> {
        let history = HistoryStore::new(&config.history.dir).load(user)?;
        let store = IndexStore::new(&config);
        let index = store.load().await?;
        let last_fingerprint = index
            .as_ref()
            .and_then(|ix| ix.meta().source_fingerprint.clone());

        Ok(Self {
            config,
            embedder,
            generator,
            store,
            index,
            last_fingerprint,
            history,
        })
    }

    /// Select a file on disk. The table and its fingerprint come from the
    /// same read.
    pub async fn use_file(&mut self, path: &Path) -> Result<IngestOutcome> {
        let bytes = loader::read_source(path)?;
        self.upload(&path.display().to_string(), &bytes).await
    }

    /// Ingest uploaded bytes; `file_name` decides the format.
    pub async fn upload(&mut self, file_name: &str, bytes: &[u8]) -> Result<IngestOutcome> {
        let table = loader::load_table_from_bytes(file_name, bytes)?;
        let fingerprint = Fingerprint::of_bytes(bytes);
        self.ingest(table, fingerprint).await
    }

    async fn ingest(&mut self, table: Table, fingerprint: Fingerprint) -> Result<IngestOutcome> {
        if let Some(reason) = self.rebuild_reason(&fingerprint) {
            tracing::info!(reason, fingerprint = fingerprint.short(), "rebuilding index");
            let chunks = chunk::chunk_table(&table, &self.config.chunking)?;
            let index = self
                .store
                .build(chunks, self.embedder.as_ref(), &fingerprint)
                .await?;
            let chunk_count = index.len();
            self.index = Some(index);
            self.last_fingerprint = Some(fingerprint.clone());
            return Ok(IngestOutcome {
                table,
                fingerprint,
                rebuilt: true,
                chunk_count,
            });
        }

        let chunk_count = self.index.as_ref().map(|ix| ix.len()).unwrap_or(0);
        tracing::info!(
            fingerprint = fingerprint.short(),
            chunks = chunk_count,
            "content unchanged, reusing index"
        );
        Ok(IngestOutcome {
            table,
            fingerprint,
            rebuilt: false,
            chunk_count,
        })
    }

    fn rebuild_reason(&self, fingerprint: &Fingerprint) -> Option<&'static str> {
        match &self.index {
            None => Some("no index"),
            Some(ix) if !ix.is_compatible(self.embedder.as_ref()) => {
                Some("embedding model changed")
            }
            Some(_) if self.last_fingerprint.as_ref() != Some(fingerprint) => {
                Some("content changed")
            }
            Some(_) => None,
        }
    }

    /// Answer `question` from the current index and record it in history.
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let index = self.index.as_ref().ok_or(RagError::IndexNotReady)?;

        let mut pipeline = RagPipeline::new(
            index,
            self.embedder.as_ref(),
            self.generator.as_ref(),
            &self.config.retrieval,
        );
        if let Some(template) = &self.config.generation.system_prompt {
            pipeline = pipeline.with_system_prompt(template.clone());
        }

        let answer = pipeline.answer(question).await?;
        self.history.record(question.trim(), &answer.answer)?;
        Ok(answer)
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.index.as_ref()
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn user(&self) -> &str {
        self.history.user()
    }
}
