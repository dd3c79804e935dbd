//! The assembled engine: one embedder, one store, one indexer.
//!
//! [`Engine::open`] reads the configuration once and builds every handle.
//! Front ends (the `dix` CLI, tests) only talk to this type.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunk::Provenance;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{IndexError, Result};
use crate::ingest::Indexer;
use crate::models::{DeleteReport, IngestOutcome, Listing, QueryHit};
use crate::search::search;
use crate::store::{open_store, BackendKind, VectorStore};

pub struct Engine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    indexer: Indexer,
}

impl Engine {
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding)?;
        let store = open_store(&config.store, embedder.dims()).await?;
        let provenance = Provenance {
            library: Some(config.store.library.clone()),
            version: Some(config.store.version.clone()),
        };
        let mut engine = Self::from_parts(embedder, store, config)?;
        engine.indexer = engine.indexer.with_provenance(provenance);
        Ok(engine)
    }

    /// Assemble an engine from prebuilt handles.
    pub fn from_parts(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: &Config,
    ) -> Result<Self> {
        let indexer = Indexer::new(
            Arc::clone(&embedder),
            Arc::clone(&store),
            config.chunking.clone(),
        )?;
        info!(
            model = embedder.model_name(),
            dims = embedder.dims(),
            backend = %store.backend(),
            "engine ready"
        );
        Ok(Self {
            embedder,
            store,
            indexer,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.store.backend()
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub async fn ingest(&self, path: &Path) -> IngestOutcome {
        self.indexer.ingest(path).await
    }

    pub async fn ingest_dir(
        &self,
        dir: &Path,
        include_globs: &[String],
    ) -> Result<Vec<(PathBuf, IngestOutcome)>> {
        self.indexer.ingest_dir(dir, include_globs).await
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<QueryHit>> {
        search(self.embedder.as_ref(), self.store.as_ref(), query, k).await
    }

    pub async fn exists(&self, source_id: &str) -> Result<bool> {
        self.store.exists(source_id).await
    }

    pub async fn get_all(&self) -> Result<Listing> {
        self.store.get_all().await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Delete every record of `source_id`. Unknown sources are a no-op.
    ///
    /// A delete the backend only partly honored is an error carrying the
    /// number of records left behind.
    pub async fn remove(&self, source_id: &str) -> Result<DeleteReport> {
        let report = self.store.delete_by_source(source_id).await?;
        if !report.is_complete() {
            warn!(
                source = %source_id,
                remaining = report.remaining,
                "partial delete"
            );
            return Err(IndexError::Backend {
                backend: self.store.backend().as_str(),
                reason: format!(
                    "delete of {} removed {} records but {} remain",
                    source_id, report.removed, report.remaining
                ),
            });
        }
        info!(source = %source_id, removed = report.removed, "removed source");
        Ok(report)
    }
}
