use sqlx::SqlitePool;

use crate::error::Result;

/// Create the index tables if they do not exist yet. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Key/value metadata: model, dims, source fingerprint, build time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            row_index INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(row_index, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_position ON chunks(row_index, chunk_index)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Whether the schema has been created in this database.
pub async fn has_schema(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='index_meta'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
