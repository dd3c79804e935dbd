//! Query pipeline: embed the query text once, delegate to the store.
//!
//! Results come back exactly as the store ranked them, closest first.

use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::error::{IndexError, Result};
use crate::models::QueryHit;
use crate::store::VectorStore;

/// Default number of results, matching the CLI's `--n-results`.
pub const DEFAULT_K: usize = 2;

pub async fn search(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    query: &str,
    k: usize,
) -> Result<Vec<QueryHit>> {
    if query.trim().is_empty() {
        return Err(IndexError::InvalidQuery("query text is empty".to_string()));
    }

    let vector = embed_query(embedder, query).await?;
    let hits = store.query(&vector, k).await?;
    debug!(backend = %store.backend(), k, hits = hits.len(), "search");
    Ok(hits)
}
