//! Engine behavior that must hold identically on every local backend.

use std::sync::Arc;
use tempfile::TempDir;

use docindex::config::Config;
use docindex::embedding::{Embedder, HashEmbedder};
use docindex::models::{IngestOutcome, Record, SOURCE_KEY};
use docindex::store::flat::FlatIndexStore;
use docindex::store::relational::RelationalStore;
use docindex::store::VectorStore;
use docindex::Engine;

const DIMS: usize = 32;

fn test_config() -> Config {
    let mut config = Config::default();
    config.chunking.size = 5;
    config.chunking.overlap = 1;
    config
}

async fn stores(tmp: &TempDir) -> Vec<Arc<dyn VectorStore>> {
    let flat = FlatIndexStore::open(&tmp.path().join("flat"), "default", "latest", DIMS).unwrap();
    let url = format!("sqlite://{}/rel.sqlite", tmp.path().display());
    let relational = RelationalStore::connect(&url, "documents", "default", "latest", DIMS)
        .await
        .unwrap();
    vec![Arc::new(flat), Arc::new(relational)]
}

fn engine(store: Arc<dyn VectorStore>) -> Engine {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIMS).unwrap());
    Engine::from_parts(embedder, store, &test_config()).unwrap()
}

/// Twelve words at size 5 / overlap 1: windows start at 0, 4, 8, so exactly three chunks.
const DOC1: &str = "doc1 keyword alpha bravo charlie delta echo foxtrot golf hotel india juliet";

#[tokio::test]
async fn test_doc1_lifecycle() {
    let tmp = TempDir::new().unwrap();
    for store in stores(&tmp).await {
        let backend = store.backend();
        let engine = engine(store);

        let outcome = engine.indexer().ingest_text("doc1", DOC1).await;
        assert_eq!(
            outcome,
            IngestOutcome::Added {
                source_id: "doc1".to_string(),
                chunks: 3
            },
            "{}",
            backend
        );
        assert!(engine.exists("doc1").await.unwrap());

        let hits = engine.search("doc1 keyword", 1).await.unwrap();
        assert_eq!(hits.len(), 1, "{}", backend);
        assert_eq!(hits[0].metadata.get(SOURCE_KEY).unwrap(), "doc1");
        assert!(DOC1.contains(hits[0].text.as_str()));

        let report = engine.remove("doc1").await.unwrap();
        assert_eq!(report.removed, 3);
        assert!(!engine.exists("doc1").await.unwrap());
        assert!(engine.search("doc1 keyword", 1).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_second_ingest_is_noop() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("notes.txt");
    std::fs::write(&file, DOC1).unwrap();

    for store in stores(&tmp).await {
        let engine = engine(store);
        assert!(matches!(
            engine.ingest(&file).await,
            IngestOutcome::Added { .. }
        ));
        let before = engine.get_all().await.unwrap().records.len();

        assert!(matches!(
            engine.ingest(&file).await,
            IngestOutcome::AlreadyPresent { .. }
        ));
        assert_eq!(engine.get_all().await.unwrap().records.len(), before);
    }
}

#[tokio::test]
async fn test_delete_leaves_other_sources() {
    let tmp = TempDir::new().unwrap();
    for store in stores(&tmp).await {
        let engine = engine(store);
        engine.indexer().ingest_text("a", "one two three four five six").await;
        engine.indexer().ingest_text("b", "seven eight nine").await;

        engine.remove("a").await.unwrap();
        let listing = engine.get_all().await.unwrap();
        assert!(!listing.records.is_empty());
        assert!(listing.records.iter().all(|r| r.source_id() == Some("b")));

        // Unknown source is a no-op, not an error.
        assert_eq!(engine.remove("missing").await.unwrap().removed, 0);
    }
}

#[tokio::test]
async fn test_query_ranking_and_clamping() {
    let tmp = TempDir::new().unwrap();
    let origin = vec![0.0f32; DIMS];
    let at = |d: f32| {
        let mut v = vec![0.0f32; DIMS];
        v[0] = d;
        v
    };

    for store in stores(&tmp).await {
        let records: Vec<Record> = [(3.0, "three"), (1.0, "one"), (2.0, "two")]
            .into_iter()
            .enumerate()
            .map(|(i, (d, text))| {
                let mut metadata = docindex::models::Metadata::new();
                metadata.insert(SOURCE_KEY.to_string(), "ranked".to_string());
                Record {
                    id: format!("ranked-{}", i),
                    source_id: "ranked".to_string(),
                    text: text.to_string(),
                    metadata,
                    embedding: at(d),
                }
            })
            .collect();
        store.upsert(&records).await.unwrap();

        let hits = store.query(&origin, 2).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"], "{}", store.backend());
        assert!(hits[0].distance <= hits[1].distance);

        assert_eq!(store.query(&origin, 50).await.unwrap().len(), 3);
        assert_eq!(store.count().await.unwrap(), 3);
    }
}

#[test]
fn test_embedding_is_batch_independent() {
    let embedder = HashEmbedder::new(DIMS).unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let batch = rt.block_on(embedder.embed(&texts)).unwrap();
    let single = rt.block_on(embedder.embed(&texts[1..2])).unwrap();
    assert_eq!(batch[1], single[0]);
}
