//! Persisted vector index.
//!
//! The [`ChunkIndex`] trait abstracts where embedded chunks live. The
//! Document Store never queries it directly during search; it loads a whole
//! collection into memory on reload and searches that snapshot.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteIndex`] | On-disk index under `index.dir` |
//! | [`MemoryIndex`] | Tests and throwaway sessions |

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::sync::RwLock;
use tokio::sync::OnceCell;

use crate::config::IndexConfig;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::DocumentChunk;

/// A chunk together with its embedding vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: DocumentChunk,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Replace every chunk of `source` in `collection` with `chunks`.
    /// `vectors[i]` is the embedding of `chunks[i]`.
    async fn replace_source(
        &self,
        collection: &str,
        source: &str,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()>;

    /// All chunks of a collection, ordered by source, page, and offset.
    async fn load_collection(&self, collection: &str) -> Result<Vec<IndexedChunk>>;

    async fn count(&self, collection: &str) -> Result<i64>;

    /// Distinct source identifiers in a collection, sorted.
    async fn sources(&self, collection: &str) -> Result<Vec<String>>;
}

fn check_lengths(chunks: &[DocumentChunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}

/// SQLite implementation of [`ChunkIndex`].
///
/// The database is opened on first use. Until something has been written,
/// reads against a missing database return nothing and leave the index
/// directory uncreated.
pub struct SqliteIndex {
    config: IndexConfig,
    pool: OnceCell<SqlitePool>,
}

impl SqliteIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            config: config.clone(),
            pool: OnceCell::new(),
        }
    }

    /// Open the index database now, creating the directory and schema.
    pub async fn open(config: &IndexConfig) -> Result<Self> {
        let index = Self::new(config);
        index.pool().await?;
        Ok(index)
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                let pool = db::connect(&self.config.db_path()).await?;
                migrate::run_migrations(&pool).await?;
                Ok::<_, anyhow::Error>(pool)
            })
            .await
    }

    /// The pool for a read, or `None` when no database exists yet.
    async fn read_pool(&self) -> Result<Option<&SqlitePool>> {
        if self.pool.get().is_none() && !self.config.db_path().exists() {
            return Ok(None);
        }
        self.pool().await.map(Some)
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl ChunkIndex for SqliteIndex {
    async fn replace_source(
        &self,
        collection: &str,
        source: &str,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool().await?.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE collection = ? AND source = ?")
            .bind(collection)
            .bind(source)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, collection, source, page, start_index, content,
                                    hash, embedding, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(collection)
            .bind(&chunk.source)
            .bind(chunk.page.map(i64::from))
            .bind(chunk.start_index as i64)
            .bind(&chunk.content)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .bind(model)
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<Vec<IndexedChunk>> {
        let Some(pool) = self.read_pool().await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT id, source, page, start_index, content, hash, embedding
            FROM chunks
            WHERE collection = ?
            ORDER BY source, page, start_index
            "#,
        )
        .bind(collection)
        .fetch_all(pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<IndexedChunk> {
                let page: Option<i64> = row.try_get("page")?;
                let start_index: i64 = row.try_get("start_index")?;
                let blob: Vec<u8> = row.try_get("embedding")?;
                Ok(IndexedChunk {
                    chunk: DocumentChunk {
                        id: row.try_get("id")?,
                        source: row.try_get("source")?,
                        page: page.and_then(|p| u32::try_from(p).ok()),
                        start_index: start_index.max(0) as usize,
                        content: row.try_get("content")?,
                        hash: row.try_get("hash")?,
                    },
                    vector: blob_to_vec(&blob),
                })
            })
            .collect()
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let Some(pool) = self.read_pool().await? else {
            return Ok(0);
        };
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(collection)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    async fn sources(&self, collection: &str) -> Result<Vec<String>> {
        let Some(pool) = self.read_pool().await? else {
            return Ok(Vec::new());
        };
        let sources: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source FROM chunks WHERE collection = ? ORDER BY source",
        )
        .bind(collection)
        .fetch_all(pool)
        .await?;
        Ok(sources)
    }
}

struct StoredChunk {
    collection: String,
    indexed: IndexedChunk,
}

/// In-memory [`ChunkIndex`] for tests and sessions without a disk index.
#[derive(Default)]
pub struct MemoryIndex {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("memory index lock poisoned")
}

#[async_trait]
impl ChunkIndex for MemoryIndex {
    async fn replace_source(
        &self,
        collection: &str,
        source: &str,
        chunks: &[DocumentChunk],
        vectors: &[Vec<f32>],
        _model: &str,
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let mut stored = self.chunks.write().map_err(|_| poisoned())?;
        stored.retain(|s| !(s.collection == collection && s.indexed.chunk.source == source));
        for (chunk, vector) in chunks.iter().zip(vectors) {
            stored.push(StoredChunk {
                collection: collection.to_string(),
                indexed: IndexedChunk {
                    chunk: chunk.clone(),
                    vector: vector.clone(),
                },
            });
        }
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<Vec<IndexedChunk>> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        let mut out: Vec<IndexedChunk> = stored
            .iter()
            .filter(|s| s.collection == collection)
            .map(|s| s.indexed.clone())
            .collect();
        out.sort_by(|a, b| {
            (&a.chunk.source, a.chunk.page, a.chunk.start_index).cmp(&(
                &b.chunk.source,
                b.chunk.page,
                b.chunk.start_index,
            ))
        });
        Ok(out)
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        Ok(stored.iter().filter(|s| s.collection == collection).count() as i64)
    }

    async fn sources(&self, collection: &str) -> Result<Vec<String>> {
        let stored = self.chunks.read().map_err(|_| poisoned())?;
        let set: BTreeSet<String> = stored
            .iter()
            .filter(|s| s.collection == collection)
            .map(|s| s.indexed.chunk.source.clone())
            .collect();
        Ok(set.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, start: usize, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            page: Some(1),
            start_index: start,
            content: content.to_string(),
            hash: format!("h{}", start),
        }
    }

    async fn exercise(index: &dyn ChunkIndex) {
        index
            .replace_source(
                "policies",
                "leave.pdf",
                &[chunk("leave.pdf", 0, "a"), chunk("leave.pdf", 800, "b")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "hash",
            )
            .await
            .unwrap();
        index
            .replace_source(
                "policies",
                "conduct.txt",
                &[chunk("conduct.txt", 0, "c")],
                &[vec![0.5, 0.5]],
                "hash",
            )
            .await
            .unwrap();
        index
            .replace_source("other", "x.txt", &[chunk("x.txt", 0, "x")], &[vec![1.0, 1.0]], "hash")
            .await
            .unwrap();

        assert_eq!(index.count("policies").await.unwrap(), 3);
        assert_eq!(
            index.sources("policies").await.unwrap(),
            vec!["conduct.txt".to_string(), "leave.pdf".to_string()]
        );

        // Re-ingesting a source replaces its chunks.
        index
            .replace_source(
                "policies",
                "leave.pdf",
                &[chunk("leave.pdf", 0, "a2")],
                &[vec![1.0, 0.0]],
                "hash",
            )
            .await
            .unwrap();
        let loaded = index.load_collection("policies").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].chunk.content, "a2");
        assert_eq!(loaded[1].vector, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn memory_index_replaces_by_source() {
        exercise(&MemoryIndex::new()).await;
    }

    #[tokio::test]
    async fn sqlite_index_replaces_by_source() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = IndexConfig {
            dir: tmp.path().join("vector_index"),
            collection: "policies".to_string(),
        };
        let index = SqliteIndex::new(&config);
        assert!(index.load_collection("policies").await.unwrap().is_empty());
        assert_eq!(index.count("policies").await.unwrap(), 0);
        assert!(!config.is_active());

        exercise(&index).await;
        assert!(config.is_active());
        index.close().await;
    }

    #[tokio::test]
    async fn mismatched_vectors_are_rejected() {
        let index = MemoryIndex::new();
        let err = index
            .replace_source("p", "s", &[chunk("s", 0, "a")], &[], "hash")
            .await;
        assert!(err.is_err());
    }
}
