//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the one capability set every backend
//! implements with identical observable behavior. The backend is picked once,
//! in [`open_store`], from the configured [`BackendKind`]; nothing downstream
//! inspects which variant it holds.
//!
//! | Backend | Storage | `exists` | `get_all` |
//! |---------|---------|----------|-----------|
//! | [`flat`] | flat L2 index file + JSON sidecar per (library, version) | in-memory metadata scan | exact |
//! | [`chroma`] | Chroma collection over HTTP | native `where` filter | paged native `get`, capped; sets `truncated` at the cap |
//! | [`relational`] | SQLite table with a vector BLOB column | indexed `SELECT EXISTS` | exact (`ORDER BY seq`) |
//!
//! A store is `Ready` as soon as construction returns. Construction fails
//! fast with [`IndexError::BackendUnavailable`] when the resource cannot be
//! reached; there is no reconnect, a failed store is simply rebuilt.

pub mod chroma;
pub mod flat;
pub mod relational;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::StoreConfig;
use crate::embedding::l2_distance;
use crate::error::{IndexError, Result};
use crate::models::{DeleteReport, Listing, Metadata, QueryHit, Record};

/// The enumerated set of storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Flat,
    Chroma,
    Relational,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Flat => "flat",
            BackendKind::Chroma => "chroma",
            BackendKind::Relational => "relational",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(BackendKind::Flat),
            "chroma" => Ok(BackendKind::Chroma),
            "relational" | "sql" => Ok(BackendKind::Relational),
            other => Err(IndexError::config(format!(
                "Unsupported store backend: '{}'. Choose flat, chroma, or relational.",
                other
            ))),
        }
    }
}

/// Persists, queries, and deletes embedded records.
///
/// # Operations
///
/// | Method | Contract |
/// |--------|----------|
/// | [`upsert`](VectorStore::upsert) | Add records; a record whose id already exists replaces it in place |
/// | [`exists`](VectorStore::exists) | True iff any record carries the source id |
/// | [`delete_by_source`](VectorStore::delete_by_source) | Remove every record of a source; no-op for unknown sources |
/// | [`query`](VectorStore::query) | `k` nearest records, closest first, ties in insertion order |
/// | [`get_all`](VectorStore::get_all) | Enumerate records (id, text, metadata) |
/// | [`count`](VectorStore::count) | Number of records in the collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Add records. Does not deduplicate by content; callers check [`exists`](VectorStore::exists) first.
    async fn upsert(&self, records: &[Record]) -> Result<()>;

    async fn exists(&self, source_id: &str) -> Result<bool>;

    /// Remove all records for `source_id`.
    ///
    /// A report with `remaining > 0` means the backend only partly honored
    /// the request; callers must treat that as a failure, not success.
    async fn delete_by_source(&self, source_id: &str) -> Result<DeleteReport>;

    /// Return up to `k` nearest records. `k` larger than the collection
    /// returns everything; an empty collection returns an empty vec.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>>;

    async fn get_all(&self) -> Result<Listing>;

    async fn count(&self) -> Result<usize>;
}

/// Open the configured backend. `dims` is the embedder's output dimension.
pub async fn open_store(config: &StoreConfig, dims: usize) -> Result<Arc<dyn VectorStore>> {
    let kind: BackendKind = config.backend.parse()?;
    info!(
        backend = %kind,
        library = %config.library,
        version = %config.version,
        "opening vector store"
    );

    let store: Arc<dyn VectorStore> = match kind {
        BackendKind::Flat => Arc::new(flat::FlatIndexStore::open(
            &config.flat.root,
            &config.library,
            &config.version,
            dims,
        )?),
        BackendKind::Chroma => Arc::new(
            chroma::ChromaStore::connect(&config.chroma, &config.library, &config.version).await?,
        ),
        BackendKind::Relational => {
            let url = config.relational.url.as_deref().ok_or_else(|| {
                IndexError::config("store.relational.url must be set for the relational backend")
            })?;
            Arc::new(
                relational::RelationalStore::connect(
                    url,
                    &config.relational.table,
                    &config.library,
                    &config.version,
                    dims,
                )
                .await?,
            )
        }
    };

    Ok(store)
}

/// A stored row offered to [`rank_by_l2`], in insertion order.
pub(crate) struct Candidate<'a> {
    pub embedding: &'a [f32],
    pub text: &'a str,
    pub metadata: &'a Metadata,
}

/// Rank candidates by L2 distance to `query`, closest first.
///
/// The sort is stable, so equal distances keep insertion order. `k` is
/// clamped to the number of candidates.
pub(crate) fn rank_by_l2<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<QueryHit>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    let mut scored: Vec<(f32, Candidate<'a>)> = candidates
        .into_iter()
        .map(|c| (l2_distance(query, c.embedding), c))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(distance, c)| QueryHit {
            text: c.text.to_string(),
            metadata: c.metadata.clone(),
            distance,
        })
        .collect()
}

/// Reject vectors whose dimension does not match the collection.
pub(crate) fn check_dims(expected: usize, actual: usize, what: &str) -> Result<()> {
    if expected != actual {
        return Err(IndexError::config(format!(
            "{} has dimension {}, collection expects {}",
            what, actual, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tag: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("source".to_string(), tag.to_string());
        m
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("flat".parse::<BackendKind>().unwrap(), BackendKind::Flat);
        assert_eq!("Chroma".parse::<BackendKind>().unwrap(), BackendKind::Chroma);
        assert_eq!("sql".parse::<BackendKind>().unwrap(), BackendKind::Relational);
        assert!("redis".parse::<BackendKind>().is_err());
        assert!("faiss".parse::<BackendKind>().is_err());
        assert!("pgvector".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_rank_ascending_and_clamped() {
        let vecs = [vec![3.0f32, 0.0], vec![1.0, 0.0], vec![2.0, 0.0]];
        let metas = [meta("c"), meta("a"), meta("b")];
        let texts = ["three", "one", "two"];
        let candidates = (0..3).map(|i| Candidate {
            embedding: &vecs[i],
            text: texts[i],
            metadata: &metas[i],
        });

        let hits = rank_by_l2(&[0.0, 0.0], candidates, 10);
        let order: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(order, vec!["one", "two", "three"]);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn test_rank_ties_keep_insertion_order() {
        let vecs = [vec![1.0f32], vec![-1.0], vec![1.0]];
        let m = meta("x");
        let texts = ["first", "second", "third"];
        let candidates = (0..3).map(|i| Candidate {
            embedding: &vecs[i],
            text: texts[i],
            metadata: &m,
        });

        let hits = rank_by_l2(&[0.0], candidates, 2);
        let order: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);
    }
}
