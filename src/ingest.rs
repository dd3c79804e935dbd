//! Indexing pipeline: load → exists check → chunk → embed → upsert.
//!
//! One [`Indexer`] owns the handles it needs (embedder, store, loader) and
//! runs each source through the same steps:
//!
//! 1. Verify the file is readable.
//! 2. `exists(source_id)`: if the store already holds the source, stop with
//!    [`IngestOutcome::AlreadyPresent`] without embedding anything.
//! 3. Load and normalize the text, chunk it into word windows.
//! 4. Embed every chunk in one batched call.
//! 5. Build one record per chunk and `upsert` the batch.
//!
//! Chunk order is preserved end to end: `sequence_index`, embedding batch
//! order, and upsert order all line up.
//!
//! If the upsert fails, any records that did land for the source are removed
//! with `delete_by_source` before the failure is reported, so a later run
//! starts from a clean slate.

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::{chunk_document, Provenance};
use crate::config::ChunkingConfig;
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::loader::{DocumentLoader, FileLoader};
use crate::models::{IngestOutcome, Record};
use crate::store::VectorStore;

/// Include patterns used by [`Indexer::ingest_dir`] when none are given.
pub const DEFAULT_INCLUDE_GLOBS: &[&str] = &["**/*.html", "**/*.pdf", "**/*.md", "**/*.txt"];

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    loader: Box<dyn DocumentLoader>,
    chunking: ChunkingConfig,
    provenance: Provenance,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            store,
            loader: Box::new(FileLoader),
            chunking,
            provenance: Provenance::default(),
        })
    }

    pub fn with_loader(mut self, loader: Box<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Ingest one file.
    pub async fn ingest(&self, path: &Path) -> IngestOutcome {
        let source_id = self.loader.source_id(path);

        if let Err(e) = std::fs::metadata(path).and_then(|m| {
            if m.is_file() {
                Ok(())
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ))
            }
        }) {
            return failed(source_id, IndexError::io(path, e));
        }

        match self.store.exists(&source_id).await {
            Ok(true) => {
                info!(source = %source_id, "already indexed, skipping");
                return IngestOutcome::AlreadyPresent { source_id };
            }
            Ok(false) => {}
            Err(e) => return failed(source_id, e),
        }

        let doc = match self.loader.load(path) {
            Ok(doc) => doc,
            Err(e) => return failed(source_id, e),
        };

        self.index_text(&doc.source_id, &doc.text).await
    }

    /// Ingest text that has already been extracted, under `source_id`.
    pub async fn ingest_text(&self, source_id: &str, text: &str) -> IngestOutcome {
        match self.store.exists(source_id).await {
            Ok(true) => IngestOutcome::AlreadyPresent {
                source_id: source_id.to_string(),
            },
            Ok(false) => self.index_text(source_id, text).await,
            Err(e) => failed(source_id.to_string(), e),
        }
    }

    /// Ingest every file under `dir` matching `include_globs`, in path order.
    ///
    /// Patterns match paths relative to `dir`. An empty slice uses
    /// [`DEFAULT_INCLUDE_GLOBS`]. A failing file does not stop the walk.
    pub async fn ingest_dir(
        &self,
        dir: &Path,
        include_globs: &[String],
    ) -> Result<Vec<(PathBuf, IngestOutcome)>> {
        if !dir.is_dir() {
            return Err(IndexError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let patterns: Vec<String> = if include_globs.is_empty() {
            DEFAULT_INCLUDE_GLOBS.iter().map(|s| s.to_string()).collect()
        } else {
            include_globs.to_vec()
        };
        let include = build_globset(&patterns)?;

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                IndexError::io(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            if include.is_match(relative) {
                paths.push(entry.path().to_path_buf());
            }
        }

        info!(dir = %dir.display(), files = paths.len(), "ingesting directory");

        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            let outcome = self.ingest(&path).await;
            outcomes.push((path, outcome));
        }
        Ok(outcomes)
    }

    async fn index_text(&self, source_id: &str, text: &str) -> IngestOutcome {
        let chunks = match chunk_document(source_id, text, &self.chunking, &self.provenance) {
            Ok(chunks) => chunks,
            Err(e) => return failed(source_id.to_string(), e),
        };
        if chunks.is_empty() {
            return IngestOutcome::Failed {
                source_id: source_id.to_string(),
                reason: "no extractable text".to_string(),
            };
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(v) => v,
            Err(e) => return failed(source_id.to_string(), e),
        };
        if vectors.len() != chunks.len() {
            return failed(
                source_id.to_string(),
                IndexError::embedding(format!(
                    "{} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                )),
            );
        }

        let ingested_at = Utc::now().to_rfc3339();
        let records: Vec<Record> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| Record::from_chunk(chunk, vector, &ingested_at))
            .collect();

        debug!(source = %source_id, records = records.len(), "upserting");
        if let Err(e) = self.store.upsert(&records).await {
            self.clean_up_partial(source_id).await;
            return failed(source_id.to_string(), e);
        }

        info!(source = %source_id, chunks = records.len(), "indexed");
        IngestOutcome::Added {
            source_id: source_id.to_string(),
            chunks: records.len(),
        }
    }

    async fn clean_up_partial(&self, source_id: &str) {
        match self.store.delete_by_source(source_id).await {
            Ok(report) if report.removed > 0 || !report.is_complete() => warn!(
                source = %source_id,
                removed = report.removed,
                remaining = report.remaining,
                "removed partial records after failed upsert"
            ),
            Ok(_) => {}
            Err(e) => warn!(
                source = %source_id,
                error = %e,
                "could not clean up after failed upsert; delete the source before retrying"
            ),
        }
    }
}

fn failed(source_id: String, err: IndexError) -> IngestOutcome {
    warn!(source = %source_id, error = %err, "ingest failed");
    IngestOutcome::Failed {
        source_id,
        reason: err.to_string(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{DeleteReport, Listing, QueryHit};
    use crate::store::flat::FlatIndexStore;
    use crate::store::BackendKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn chunking(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig { size, overlap }
    }

    fn flat_indexer(tmp: &TempDir) -> (Indexer, Arc<dyn VectorStore>) {
        let store: Arc<dyn VectorStore> =
            Arc::new(FlatIndexStore::open(tmp.path(), "lib", "v1", 32).unwrap());
        let embedder = Arc::new(HashEmbedder::new(32).unwrap());
        let indexer = Indexer::new(embedder, Arc::clone(&store), chunking(4, 1)).unwrap();
        (indexer, store)
    }

    #[tokio::test]
    async fn test_ingest_then_already_present() {
        let tmp = TempDir::new().unwrap();
        let (indexer, store) = flat_indexer(&tmp);
        let doc = tmp.path().join("doc.txt");
        std::fs::write(&doc, "one two three four five six seven").unwrap();

        let first = indexer.ingest(&doc).await;
        // Seven words at size 4 / overlap 1: windows start at 0, 3, 6.
        assert!(matches!(first, IngestOutcome::Added { chunks: 3, .. }));
        let count = store.count().await.unwrap();

        let second = indexer.ingest(&doc).await;
        assert!(matches!(second, IngestOutcome::AlreadyPresent { .. }));
        assert_eq!(store.count().await.unwrap(), count);
    }

    #[tokio::test]
    async fn test_missing_file_fails_with_source() {
        let tmp = TempDir::new().unwrap();
        let (indexer, _) = flat_indexer(&tmp);
        let missing = tmp.path().join("nope.pdf");

        match indexer.ingest(&missing).await {
            IngestOutcome::Failed { source_id, reason } => {
                assert!(source_id.ends_with("nope.pdf"));
                assert!(reason.contains("nope.pdf"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whitespace_only_text_fails() {
        let tmp = TempDir::new().unwrap();
        let (indexer, store) = flat_indexer(&tmp);
        let outcome = indexer.ingest_text("blank", "   \n\t ").await;
        assert!(matches!(outcome, IngestOutcome::Failed { .. }));
        assert!(!store.exists("blank").await.unwrap());
    }

    #[tokio::test]
    async fn test_ingest_dir_filters_and_orders() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(docs.join("sub")).unwrap();
        std::fs::write(docs.join("b.txt"), "bravo words here").unwrap();
        std::fs::write(docs.join("a.md"), "alpha words here").unwrap();
        std::fs::write(docs.join("sub/c.txt"), "charlie words here").unwrap();
        std::fs::write(docs.join("skip.bin"), "binary").unwrap();

        let store_dir = TempDir::new().unwrap();
        let (indexer, _) = flat_indexer(&store_dir);
        let outcomes = indexer.ingest_dir(&docs, &[]).await.unwrap();

        let names: Vec<String> = outcomes
            .iter()
            .map(|(p, _)| p.strip_prefix(&docs).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.txt", "sub/c.txt"]);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, IngestOutcome::Added { .. })));
    }

    #[tokio::test]
    async fn test_bad_glob_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let (indexer, _) = flat_indexer(&tmp);
        let err = indexer
            .ingest_dir(tmp.path(), &["[".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfiguration(_)));
    }

    /// Store whose upsert writes half the batch, then fails.
    struct HalfWritingStore {
        records: Mutex<Vec<Record>>,
    }

    #[async_trait]
    impl VectorStore for HalfWritingStore {
        fn backend(&self) -> BackendKind {
            BackendKind::Flat
        }

        async fn upsert(&self, records: &[Record]) -> Result<()> {
            let half = records.len() / 2;
            self.records.lock().unwrap().extend_from_slice(&records[..half]);
            Err(IndexError::Backend {
                backend: "test",
                reason: "disk full".to_string(),
            })
        }

        async fn exists(&self, source_id: &str) -> Result<bool> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.source_id == source_id))
        }

        async fn delete_by_source(&self, source_id: &str) -> Result<DeleteReport> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|r| r.source_id != source_id);
            Ok(DeleteReport {
                source_id: source_id.to_string(),
                removed: before - records.len(),
                remaining: 0,
            })
        }

        async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<QueryHit>> {
            Ok(Vec::new())
        }

        async fn get_all(&self) -> Result<Listing> {
            Ok(Listing::default())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.records.lock().unwrap().len())
        }
    }

    #[tokio::test]
    async fn test_failed_upsert_leaves_no_partial_records() {
        let store = Arc::new(HalfWritingStore {
            records: Mutex::new(Vec::new()),
        });
        let embedder = Arc::new(HashEmbedder::new(8).unwrap());
        let indexer = Indexer::new(embedder, store.clone(), chunking(2, 0)).unwrap();

        let outcome = indexer.ingest_text("doc", "a b c d e f g h").await;
        match outcome {
            IngestOutcome::Failed { reason, .. } => assert!(reason.contains("disk full")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!store.exists("doc").await.unwrap());
    }

    #[tokio::test]
    async fn test_provenance_stamped_on_records() {
        let tmp = TempDir::new().unwrap();
        let (indexer, store) = flat_indexer(&tmp);
        let indexer = indexer.with_provenance(Provenance {
            library: Some("phoenix".to_string()),
            version: Some("1.7".to_string()),
        });
        indexer.ingest_text("guide", "some guide text").await;

        let listing = store.get_all().await.unwrap();
        let meta = &listing.records[0].metadata;
        assert_eq!(meta.get("library").map(String::as_str), Some("phoenix"));
        assert_eq!(meta.get("version").map(String::as_str), Some("1.7"));
        assert_eq!(meta.get("chunk_index").map(String::as_str), Some("0"));
        assert_eq!(listing.records[0].id, "guide-0");
    }
}
