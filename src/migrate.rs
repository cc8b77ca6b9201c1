use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            source TEXT NOT NULL,
            page INTEGER,
            start_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_collection_source ON chunks(collection, source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
