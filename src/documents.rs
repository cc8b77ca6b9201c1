//! Document Store: similarity search over embedded policy chunks.
//!
//! Searches run against an immutable in-memory snapshot of one collection.
//! [`DocumentStore::reload`] reads the persisted index into a fresh snapshot
//! and swaps it in with a single pointer replacement, so a search that
//! already took the old snapshot finishes against it and no search ever
//! sees half of an update. Reloads run one at a time, so a slow reload
//! cannot replace a newer snapshot with the older collection it read.
//!
//! Search never raises: failures come back as [`SearchOutcome::Failed`].

use anyhow::Result;
use std::sync::{Arc, RwLock};

use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::index::{ChunkIndex, IndexedChunk};
use crate::models::ScoredChunk;

/// Result of a similarity search.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// Up to `k` chunks, most similar first. Empty when nothing is indexed.
    Found(Vec<ScoredChunk>),
    Failed(String),
}

impl SearchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SearchOutcome::Failed(_))
    }
}

enum Snapshot {
    Ready(Vec<IndexedChunk>),
    Unavailable(String),
}

pub struct DocumentStore {
    index: Arc<dyn ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    snapshot: RwLock<Arc<Snapshot>>,
    reloading: tokio::sync::Mutex<()>,
}

impl DocumentStore {
    /// Create the store and load its first snapshot. A failed first load
    /// leaves the store answering every search with `Failed`.
    pub async fn open(
        index: Arc<dyn ChunkIndex>,
        embedder: Arc<dyn Embedder>,
        collection: &str,
    ) -> Self {
        let store = Self {
            index,
            embedder,
            collection: collection.to_string(),
            snapshot: RwLock::new(Arc::new(Snapshot::Unavailable(
                "vector index not loaded".to_string(),
            ))),
            reloading: tokio::sync::Mutex::new(()),
        };
        if let Err(e) = store.reload().await {
            tracing::warn!(collection, error = %e, "vector index unavailable");
            store.swap(Snapshot::Unavailable(format!("{:#}", e)));
        }
        store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn index(&self) -> &Arc<dyn ChunkIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn current(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: Snapshot) {
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Re-read the persisted collection and replace the snapshot.
    ///
    /// Idempotent. On failure the previous snapshot keeps serving and the
    /// error is returned. Returns the number of chunks now searchable.
    pub async fn reload(&self) -> Result<usize> {
        let _reloading = self.reloading.lock().await;
        let chunks = self.index.load_collection(&self.collection).await?;
        let count = chunks.len();
        self.swap(Snapshot::Ready(chunks));
        tracing::info!(collection = %self.collection, chunks = count, "document snapshot reloaded");
        Ok(count)
    }

    /// Number of chunks in the current snapshot, if it loaded.
    pub fn snapshot_len(&self) -> Option<usize> {
        match self.current().as_ref() {
            Snapshot::Ready(chunks) => Some(chunks.len()),
            Snapshot::Unavailable(_) => None,
        }
    }

    /// Return the `k` chunks most similar to `query`, by cosine similarity
    /// of embeddings. No score threshold is applied.
    pub async fn search(&self, query: &str, k: usize) -> SearchOutcome {
        let snapshot = self.current();
        let chunks = match snapshot.as_ref() {
            Snapshot::Ready(chunks) => chunks,
            Snapshot::Unavailable(reason) => return SearchOutcome::Failed(reason.clone()),
        };
        if chunks.is_empty() || k == 0 {
            return SearchOutcome::Found(Vec::new());
        }

        let query_vec = match embed_query(self.embedder.as_ref(), query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed");
                return SearchOutcome::Failed(format!("query embedding failed: {:#}", e));
            }
        };

        SearchOutcome::Found(rank(chunks, &query_vec, k))
    }
}

/// Score every chunk and keep the best `k`. Ties keep index order.
fn rank(chunks: &[IndexedChunk], query_vec: &[f32], k: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<(usize, f32)> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query_vec, &c.vector)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(k)
        .map(|(i, score)| ScoredChunk {
            chunk: chunks[i].chunk.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::MemoryIndex;
    use crate::models::DocumentChunk;
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    fn chunk(source: &str, start: usize, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: format!("{}-{}", source, start),
            source: source.to_string(),
            page: Some(1),
            start_index: start,
            content: content.to_string(),
            hash: String::new(),
        }
    }

    async fn seeded(texts: &[&str]) -> (Arc<MemoryIndex>, Arc<HashEmbedder>) {
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(HashEmbedder::new(256));
        let chunks: Vec<DocumentChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| chunk("handbook.txt", i * 100, t))
            .collect();
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| embedder.embed_one(t)).collect();
        index
            .replace_source("policies", "handbook.txt", &chunks, &vectors, "hash")
            .await
            .unwrap();
        (index, embedder)
    }

    #[tokio::test]
    async fn search_returns_at_most_k_in_score_order() {
        let (index, embedder) = seeded(&[
            "Maternity leave is 26 weeks of paid leave.",
            "Laptops are returned on the last day.",
            "Maternity leave requests go to HR.",
            "The cafeteria opens at eight.",
        ])
        .await;
        let store = DocumentStore::open(index, embedder, "policies").await;
        let SearchOutcome::Found(hits) = store.search("maternity leave", 3).await else {
            panic!("expected results");
        };
        assert_eq!(hits.len(), 3);
        assert!(hits[0].chunk.content.contains("Maternity"));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn empty_collection_returns_empty_success() {
        let store = DocumentStore::open(
            Arc::new(MemoryIndex::new()),
            Arc::new(HashEmbedder::new(16)),
            "policies",
        )
        .await;
        match store.search("anything", 3).await {
            SearchOutcome::Found(hits) => assert!(hits.is_empty()),
            SearchOutcome::Failed(e) => panic!("unexpected failure: {}", e),
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl ChunkIndex for BrokenIndex {
        async fn replace_source(
            &self,
            _: &str,
            _: &str,
            _: &[DocumentChunk],
            _: &[Vec<f32>],
            _: &str,
        ) -> Result<()> {
            anyhow::bail!("read-only")
        }
        async fn load_collection(&self, _: &str) -> Result<Vec<IndexedChunk>> {
            anyhow::bail!("index directory missing")
        }
        async fn count(&self, _: &str) -> Result<i64> {
            Ok(0)
        }
        async fn sources(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn unavailable_index_fails_softly() {
        let store =
            DocumentStore::open(Arc::new(BrokenIndex), Arc::new(HashEmbedder::new(16)), "p").await;
        let outcome = store.search("leave", 3).await;
        assert!(outcome.is_failed());
        assert!(store.reload().await.is_err());
        assert_eq!(store.snapshot_len(), None);
    }

    #[tokio::test]
    async fn reload_is_idempotent_and_picks_up_new_chunks() {
        let (index, embedder) = seeded(&["Code of conduct applies to everyone."]).await;
        let store = DocumentStore::open(index.clone(), embedder.clone(), "policies").await;
        assert_eq!(store.reload().await.unwrap(), 1);
        assert_eq!(store.reload().await.unwrap(), 1);

        let extra = chunk("travel.txt", 0, "Travel must be approved in advance.");
        index
            .replace_source(
                "policies",
                "travel.txt",
                &[extra.clone()],
                &[embedder.embed_one(&extra.content)],
                "hash",
            )
            .await
            .unwrap();
        // Not visible until reload.
        assert_eq!(store.snapshot_len(), Some(1));
        assert_eq!(store.reload().await.unwrap(), 2);
        let SearchOutcome::Found(hits) = store.search("travel approved", 1).await else {
            panic!("expected results");
        };
        assert_eq!(hits[0].chunk.source, "travel.txt");
    }

    #[tokio::test]
    async fn in_flight_search_keeps_old_snapshot() {
        let (index, embedder) = seeded(&["Remote work needs manager approval."]).await;
        let store = Arc::new(DocumentStore::open(index.clone(), embedder, "policies").await);

        let held = store.current();
        index
            .replace_source("policies", "handbook.txt", &[], &[], "hash")
            .await
            .unwrap();
        store.reload().await.unwrap();

        match held.as_ref() {
            Snapshot::Ready(chunks) => assert_eq!(chunks.len(), 1),
            Snapshot::Unavailable(_) => panic!("old snapshot should stay readable"),
        }
        assert_eq!(store.snapshot_len(), Some(0));
    }

    type Park = (oneshot::Sender<()>, oneshot::Receiver<()>);

    /// Parks one `load_collection` call after it has read the collection.
    struct ParkedIndex {
        inner: Arc<MemoryIndex>,
        park: std::sync::Mutex<Option<Park>>,
    }

    #[async_trait]
    impl ChunkIndex for ParkedIndex {
        async fn replace_source(
            &self,
            collection: &str,
            source: &str,
            chunks: &[DocumentChunk],
            vectors: &[Vec<f32>],
            model: &str,
        ) -> Result<()> {
            self.inner
                .replace_source(collection, source, chunks, vectors, model)
                .await
        }
        async fn load_collection(&self, collection: &str) -> Result<Vec<IndexedChunk>> {
            let chunks = self.inner.load_collection(collection).await?;
            let park = self.park.lock().unwrap().take();
            if let Some((reached, release)) = park {
                reached.send(()).unwrap();
                release.await.unwrap();
            }
            Ok(chunks)
        }
        async fn count(&self, collection: &str) -> Result<i64> {
            self.inner.count(collection).await
        }
        async fn sources(&self, collection: &str) -> Result<Vec<String>> {
            self.inner.sources(collection).await
        }
    }

    #[tokio::test]
    async fn slow_reload_does_not_overwrite_a_newer_snapshot() {
        let inner = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(ParkedIndex {
            inner: inner.clone(),
            park: std::sync::Mutex::new(None),
        });
        let store = Arc::new(DocumentStore::open(index.clone(), embedder.clone(), "policies").await);

        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *index.park.lock().unwrap() = Some((reached_tx, release_rx));

        // The first reload reads the empty collection and stalls before swapping.
        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.reload().await })
        };
        reached_rx.await.unwrap();

        let extra = chunk("travel.txt", 0, "Travel must be approved in advance.");
        inner
            .replace_source(
                "policies",
                "travel.txt",
                &[extra.clone()],
                &[embedder.embed_one(&extra.content)],
                "hash",
            )
            .await
            .unwrap();
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.reload().await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        release_tx.send(()).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(second.await.unwrap().unwrap(), 1);
        assert_eq!(store.snapshot_len(), Some(1));
    }
}
