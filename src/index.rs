//! Persisted vector index over table chunks.
//!
//! The index lives in a single SQLite file:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `index_meta` | `model`, `dims`, `source_fingerprint`, `chunk_count`, `built_at` |
//! | `chunks` | chunk id, row/chunk position, text, text hash |
//! | `chunk_vectors` | one little-endian `f32` BLOB per chunk |
//!
//! [`IndexStore`] owns the file: [`IndexStore::load`] reads it fully into a
//! [`VectorIndex`] and [`IndexStore::build`] replaces it wholesale. Search is
//! exact brute-force cosine similarity over the loaded vectors.
//!
//! Deciding *when* to rebuild is the caller's job (see
//! [`Session`](crate::session::Session)).

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbedPurpose, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::fingerprint::Fingerprint;
use crate::lock::FileLock;
use crate::migrate;
use crate::models::{Chunk, RetrievedChunk};

/// Metadata recorded alongside the vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    /// Embedding model that produced the vectors.
    pub model: String,
    pub dims: usize,
    /// Fingerprint of the file the index was built from.
    pub source_fingerprint: Option<Fingerprint>,
    pub chunk_count: usize,
    /// RFC 3339 build time (UTC).
    pub built_at: String,
}

/// An index loaded into memory.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMeta,
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl VectorIndex {
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|(chunk, _)| chunk)
    }

    /// Whether vectors from `provider` can be compared against this index.
    ///
    /// The model name must match; the dimension must match when the provider
    /// pins one.
    pub fn is_compatible(&self, provider: &dyn EmbeddingProvider) -> bool {
        self.meta.model == provider.model_name()
            && provider.dims().map_or(true, |d| d == self.meta.dims)
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// Equal scores are ordered by `(row_index, chunk_index)`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if query.len() != self.meta.dims {
            return Err(RagError::RetrievalError(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.meta.dims
            )));
        }

        let mut scored: Vec<(&Chunk, f32)> = self
            .entries
            .iter()
            .map(|(chunk, vec)| (chunk, embedding::cosine_similarity(query, vec)))
            .collect();

        scored.sort_by(|(ca, sa), (cb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ca.row_index.cmp(&cb.row_index))
                .then_with(|| ca.chunk_index.cmp(&cb.chunk_index))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(chunk, score)| RetrievedChunk {
                chunk: chunk.clone(),
                score,
            })
            .collect())
    }
}

/// Handle on the index file at `index.path`.
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
    batch_size: usize,
}

impl IndexStore {
    pub fn new(config: &Config) -> Self {
        Self::at(&config.index.path, config.embedding.batch_size)
    }

    pub fn at(path: &Path, batch_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted index, or `None` if nothing has been built yet.
    pub async fn load(&self) -> Result<Option<VectorIndex>> {
        if !self.exists() {
            return Ok(None);
        }

        let pool = db::connect(&self.path).await?;
        let result = load_from(&pool).await;
        pool.close().await;
        result
    }

    /// Embed `chunks` and replace the persisted index with them.
    ///
    /// All embedding happens before the database is touched, so a provider
    /// failure leaves the previous index in place.
    pub async fn build(
        &self,
        chunks: Vec<Chunk>,
        provider: &dyn EmbeddingProvider,
        fingerprint: &Fingerprint,
    ) -> Result<VectorIndex> {
        if chunks.is_empty() {
            return Err(RagError::EmptyInput(
                "no chunks to index".to_string(),
            ));
        }

        let _lock = FileLock::acquire_async(&self.path).await?;

        tracing::info!(
            chunks = chunks.len(),
            model = provider.model_name(),
            fingerprint = fingerprint.short(),
            "building vector index"
        );

        let vectors = self.embed_all(&chunks, provider).await?;
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);

        let meta = IndexMeta {
            model: provider.model_name().to_string(),
            dims,
            source_fingerprint: Some(fingerprint.clone()),
            chunk_count: chunks.len(),
            built_at: Utc::now().to_rfc3339(),
        };

        let pool = db::connect(&self.path).await?;
        let written = write_index(&pool, &meta, &chunks, &vectors).await;
        pool.close().await;
        written?;

        tracing::info!(
            path = %self.path.display(),
            chunks = meta.chunk_count,
            dims = meta.dims,
            "vector index written"
        );

        Ok(VectorIndex {
            meta,
            entries: chunks.into_iter().zip(vectors).collect(),
        })
    }

    async fn embed_all(
        &self,
        chunks: &[Chunk],
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = provider.embed(&texts, EmbedPurpose::Document).await?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingProviderError(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    embedded.len()
                )));
            }
            tracing::debug!(done = vectors.len() + embedded.len(), total = chunks.len(), "embedded batch");
            vectors.extend(embedded);
        }

        let expected = provider
            .dims()
            .or_else(|| vectors.first().map(|v| v.len()))
            .unwrap_or(0);
        if expected == 0 {
            return Err(RagError::EmbeddingProviderError(
                "provider returned empty vectors".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::EmbeddingProviderError(format!(
                "inconsistent vector dimensions: expected {}, got {}",
                expected,
                bad.len()
            )));
        }

        Ok(vectors)
    }
}

async fn load_from(pool: &SqlitePool) -> Result<Option<VectorIndex>> {
    if !migrate::has_schema(pool).await? {
        return Ok(None);
    }

    let meta_rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;
    let lookup = |key: &str| -> Option<String> {
        meta_rows
            .iter()
            .find(|row| row.get::<String, _>("key") == key)
            .map(|row| row.get::<String, _>("value"))
    };

    let (Some(model), Some(dims)) = (lookup("model"), lookup("dims")) else {
        return Ok(None);
    };
    let dims: usize = dims
        .parse()
        .map_err(|_| RagError::PersistenceError(format!("corrupt index dims: {}", dims)))?;

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.row_index, c.chunk_index, c.text, c.hash, cv.embedding
        FROM chunks c
        JOIN chunk_vectors cv ON cv.chunk_id = c.id
        ORDER BY c.row_index, c.chunk_index
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let blob: Vec<u8> = row.get("embedding");
        let vec = embedding::blob_to_vec(&blob);
        if vec.len() != dims {
            return Err(RagError::PersistenceError(format!(
                "stored vector has {} dimensions, index metadata says {}",
                vec.len(),
                dims
            )));
        }
        let chunk = Chunk {
            id: row.get("id"),
            row_index: row.get("row_index"),
            chunk_index: row.get("chunk_index"),
            text: row.get("text"),
            hash: row.get("hash"),
        };
        entries.push((chunk, vec));
    }

    let meta = IndexMeta {
        model,
        dims,
        source_fingerprint: lookup("source_fingerprint").map(Fingerprint::from_hex),
        chunk_count: entries.len(),
        built_at: lookup("built_at").unwrap_or_default(),
    };

    tracing::debug!(chunks = meta.chunk_count, model = %meta.model, "loaded vector index");
    Ok(Some(VectorIndex { meta, entries }))
}

async fn write_index(
    pool: &SqlitePool,
    meta: &IndexMeta,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    migrate::run_migrations(pool).await?;

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM index_meta")
        .execute(&mut *tx)
        .await?;

    for (chunk, vec) in chunks.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO chunks (id, row_index, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(chunk.row_index)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(embedding::vec_to_blob(vec))
            .execute(&mut *tx)
            .await?;
    }

    let mut pairs = vec![
        ("model", meta.model.clone()),
        ("dims", meta.dims.to_string()),
        ("chunk_count", meta.chunk_count.to_string()),
        ("built_at", meta.built_at.clone()),
    ];
    if let Some(fp) = &meta.source_fingerprint {
        pairs.push(("source_fingerprint", fp.as_str().to_string()));
    }
    for (key, value) in pairs {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> Option<usize> {
            Some(3)
        }
        async fn embed(&self, texts: &[String], _purpose: EmbedPurpose) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| match t.as_str() {
                    "x" => vec![1.0, 0.0, 0.0],
                    "y" => vec![0.0, 1.0, 0.0],
                    _ => vec![0.0, 0.0, 1.0],
                })
                .collect())
        }
    }

    fn chunk(row: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("c{}", row),
            row_index: row,
            chunk_index: 0,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn index_of(entries: Vec<(Chunk, Vec<f32>)>) -> VectorIndex {
        VectorIndex {
            meta: IndexMeta {
                model: "axis".into(),
                dims: 3,
                source_fingerprint: None,
                chunk_count: entries.len(),
                built_at: String::new(),
            },
            entries,
        }
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = index_of(vec![
            (chunk(0, "x"), vec![1.0, 0.0, 0.0]),
            (chunk(1, "y"), vec![0.0, 1.0, 0.0]),
            (chunk(2, "xy"), vec![0.7, 0.7, 0.0]),
        ]);
        let hits = index.search(&[0.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.row_index, 1);
        assert_eq!(hits[1].chunk.row_index, 2);
    }

    #[test]
    fn test_search_ties_break_by_position() {
        let index = index_of(vec![
            (chunk(3, "a"), vec![1.0, 0.0, 0.0]),
            (chunk(1, "b"), vec![1.0, 0.0, 0.0]),
        ]);
        let hits = index.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits[0].chunk.row_index, 1);
        assert_eq!(hits[1].chunk.row_index, 3);
    }

    #[test]
    fn test_search_rejects_wrong_dims() {
        let index = index_of(vec![(chunk(0, "x"), vec![1.0, 0.0, 0.0])]);
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(RagError::RetrievalError(_))
        ));
    }

    #[test]
    fn test_compatibility() {
        let index = index_of(vec![]);
        assert!(index.is_compatible(&AxisEmbedder));
        assert!(!index.is_compatible(&embedding::DisabledProvider));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = IndexStore::at(&tmp.path().join("index.sqlite"), 8);
        assert!(store.load().await.unwrap().is_none());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_build_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = IndexStore::at(&tmp.path().join("vs").join("index.sqlite"), 2);
        let fp = Fingerprint::of_bytes(b"a,b\n1,2\n");

        let built = store
            .build(vec![chunk(0, "x"), chunk(1, "y"), chunk(2, "z")], &AxisEmbedder, &fp)
            .await
            .unwrap();
        assert_eq!(built.len(), 3);

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.meta().model, "axis");
        assert_eq!(loaded.meta().dims, 3);
        assert_eq!(loaded.meta().chunk_count, 3);
        assert_eq!(loaded.meta().source_fingerprint.as_ref(), Some(&fp));

        let hits = loaded.search(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].chunk.text, "z");
    }

    #[tokio::test]
    async fn test_build_replaces_previous_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = IndexStore::at(&tmp.path().join("index.sqlite"), 16);
        let fp = Fingerprint::of_bytes(b"one");

        store
            .build(vec![chunk(0, "x"), chunk(1, "y")], &AxisEmbedder, &fp)
            .await
            .unwrap();
        store
            .build(vec![chunk(0, "z")], &AxisEmbedder, &Fingerprint::of_bytes(b"two"))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.chunks().next().unwrap().text, "z");
    }

    #[tokio::test]
    async fn test_build_empty_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = IndexStore::at(&tmp.path().join("index.sqlite"), 16);
        let err = store
            .build(vec![], &AxisEmbedder, &Fingerprint::of_bytes(b""))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyInput(_)));
    }

    #[tokio::test]
    async fn test_failed_embedding_keeps_previous_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = IndexStore::at(&tmp.path().join("index.sqlite"), 16);
        store
            .build(vec![chunk(0, "x")], &AxisEmbedder, &Fingerprint::of_bytes(b"v1"))
            .await
            .unwrap();

        let err = store
            .build(
                vec![chunk(0, "y")],
                &embedding::DisabledProvider,
                &Fingerprint::of_bytes(b"v2"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingProviderError(_)));

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.chunks().next().unwrap().text, "x");
    }
}
