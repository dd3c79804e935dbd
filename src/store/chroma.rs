//! Client-server collection store backed by a Chroma server (HTTP API v2).
//!
//! The server owns persistence and the ANN index. This module only maps the
//! [`VectorStore`] calls onto Chroma's collection endpoints:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | connect | `GET /api/v2/heartbeat`, then `POST .../collections` (`get_or_create`) |
//! | `upsert` | `POST .../collections/{id}/upsert` |
//! | `exists` | `POST .../collections/{id}/get` with `where: {source}` and `limit: 1` |
//! | `delete_by_source` | `POST .../delete` with `where`, then a verifying `get` |
//! | `query` | `POST .../query` with `n_results` clamped to `count` |
//! | `get_all` | `POST .../get`, paged by `offset` |
//! | `count` | `GET .../count` |

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BackendKind, VectorStore};
use crate::config::ChromaConfig;
use crate::error::{IndexError, Result};
use crate::models::{DeleteReport, Listing, Metadata, QueryHit, Record, StoredRecord, SOURCE_KEY};

const BACKEND: &str = "chroma";

/// Page size for `get_all` and delete verification.
const PAGE_SIZE: usize = 1000;

/// Default upper bound on records returned by `get_all`.
const MAX_LISTING: usize = 100_000;

pub struct ChromaStore {
    client: Client,
    base: String,
    collection_id: String,
    collection_name: String,
    listing_cap: usize,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<serde_json::Map<String, Value>>>>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<serde_json::Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl ChromaStore {
    /// Check the server heartbeat and get or create the collection.
    pub async fn connect(config: &ChromaConfig, library: &str, version: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::BackendUnavailable {
                backend: BACKEND,
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        let root = config.base_url();

        client
            .get(format!("{}/api/v2/heartbeat", root))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IndexError::BackendUnavailable {
                backend: BACKEND,
                reason: format!("heartbeat to {} failed: {}", root, e),
            })?;

        let name = collection_name(&config.collection, library, version);
        let collections = format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            root, config.tenant, config.database
        );

        let resp = client
            .post(&collections)
            .json(&json!({ "name": name, "get_or_create": true }))
            .send()
            .await
            .map_err(|e| IndexError::BackendUnavailable {
                backend: BACKEND,
                reason: e.to_string(),
            })?;
        let collection: CollectionResponse = decode(resp).await?;

        info!(collection = %name, id = %collection.id, "connected to chroma");
        Ok(Self {
            client,
            base: format!("{}/{}", collections, collection.id),
            collection_id: collection.id,
            collection_name: name,
            listing_cap: MAX_LISTING,
        })
    }

    /// Bound `get_all` to `cap` records (at least one). When the collection
    /// holds more, the listing comes back with `truncated` set.
    pub fn with_listing_cap(mut self, cap: usize) -> Self {
        self.listing_cap = cap.max(1);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    async fn post<T: DeserializeOwned>(&self, op: &str, body: Value) -> Result<T> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base, op))
            .json(&body)
            .send()
            .await
            .map_err(request_err)?;
        decode(resp).await
    }

    /// POST where only the status matters; write endpoints may answer with an empty body.
    async fn post_unit(&self, op: &str, body: Value) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base, op))
            .json(&body)
            .send()
            .await
            .map_err(request_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexError::Backend {
                backend: BACKEND,
                reason: format!("{} returned HTTP {}: {}", op, status, body),
            });
        }
        Ok(())
    }

    async fn get_page(&self, filter: Option<&Value>, limit: usize, offset: usize) -> Result<GetResponse> {
        let mut body = json!({
            "limit": limit,
            "offset": offset,
            "include": ["documents", "metadatas"],
        });
        if let Some(filter) = filter {
            body["where"] = filter.clone();
        }
        self.post("get", body).await
    }

    async fn count_source(&self, filter: &Value) -> Result<usize> {
        let mut total = 0;
        loop {
            let page = self.get_page(Some(filter), PAGE_SIZE, total).await?;
            let n = page.ids.len();
            total += n;
            if n < PAGE_SIZE {
                return Ok(total);
            }
        }
    }
}

fn source_filter(source_id: &str) -> Value {
    let mut filter = serde_json::Map::new();
    filter.insert(SOURCE_KEY.to_string(), Value::String(source_id.to_string()));
    Value::Object(filter)
}

fn request_err(e: reqwest::Error) -> IndexError {
    if e.is_connect() || e.is_timeout() {
        IndexError::BackendUnavailable {
            backend: BACKEND,
            reason: e.to_string(),
        }
    } else {
        IndexError::Backend {
            backend: BACKEND,
            reason: e.to_string(),
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(IndexError::Backend {
            backend: BACKEND,
            reason: format!("HTTP {}: {}", status, body),
        });
    }
    resp.json::<T>().await.map_err(|e| IndexError::Backend {
        backend: BACKEND,
        reason: format!("unexpected response: {}", e),
    })
}

/// Chroma metadata values may be strings, numbers, or booleans. Everything
/// is stored as a string on the way in, and stringified on the way out.
fn to_metadata(raw: Option<serde_json::Map<String, Value>>) -> Metadata {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Null => None,
            other => Some((k, other.to_string())),
        })
        .collect()
}

/// Collection name for a (library, version) scope.
///
/// Chroma names are 3-63 characters from `[a-zA-Z0-9._-]`, starting and
/// ending with an alphanumeric.
pub fn collection_name(base: &str, library: &str, version: &str) -> String {
    let raw = if library == "default" {
        base.to_string()
    } else {
        format!("{}_{}_{}", base, library, version)
    };

    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(63);
    let name = name
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string();
    if name.len() < 3 {
        format!("{:0<3}", if name.is_empty() { "col" } else { name.as_str() })
    } else {
        name
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Chroma
    }

    async fn upsert(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        // `exists` and `delete_by_source` filter on the source key.
        let metadatas: Vec<Metadata> = records
            .iter()
            .map(|r| {
                let mut metadata = r.metadata.clone();
                metadata
                    .entry(SOURCE_KEY.to_string())
                    .or_insert_with(|| r.source_id.clone());
                metadata
            })
            .collect();
        let body = json!({
            "ids": records.iter().map(|r| &r.id).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|r| &r.embedding).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| &r.text).collect::<Vec<_>>(),
            "metadatas": metadatas,
        });
        self.post_unit("upsert", body).await?;
        debug!(collection = %self.collection_id, records = records.len(), "chroma upsert");
        Ok(())
    }

    async fn exists(&self, source_id: &str) -> Result<bool> {
        let page = self.get_page(Some(&source_filter(source_id)), 1, 0).await?;
        Ok(!page.ids.is_empty())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<DeleteReport> {
        let filter = source_filter(source_id);
        let before = self.count_source(&filter).await?;
        if before == 0 {
            return Ok(DeleteReport {
                source_id: source_id.to_string(),
                removed: 0,
                remaining: 0,
            });
        }

        self.post_unit("delete", json!({ "where": filter })).await?;

        let remaining = self.count_source(&filter).await?;
        if remaining > 0 {
            warn!(
                source = %source_id,
                collection = %self.collection_name,
                remaining,
                "chroma delete left records behind"
            );
        }
        Ok(DeleteReport {
            source_id: source_id.to_string(),
            removed: before.saturating_sub(remaining),
            remaining,
        })
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        // Chroma errors when n_results exceeds the collection size.
        let n = k.min(self.count().await?);
        if n == 0 {
            return Ok(Vec::new());
        }

        let resp: QueryResponse = self
            .post(
                "query",
                json!({
                    "query_embeddings": [vector],
                    "n_results": n,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        let documents = resp.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
        let mut metadatas = resp
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut distances = resp
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();

        Ok(documents
            .into_iter()
            .map(|text| QueryHit {
                text: text.unwrap_or_default(),
                metadata: to_metadata(metadatas.next().flatten()),
                distance: distances.next().flatten().unwrap_or(f32::INFINITY),
            })
            .collect())
    }

    async fn get_all(&self) -> Result<Listing> {
        let mut records = Vec::new();
        let mut truncated = false;
        loop {
            let limit = PAGE_SIZE.min(self.listing_cap - records.len());
            let page = self.get_page(None, limit, records.len()).await?;
            let n = page.ids.len();
            let mut documents = page.documents.unwrap_or_default().into_iter();
            let mut metadatas = page.metadatas.unwrap_or_default().into_iter();
            for id in page.ids {
                records.push(StoredRecord {
                    id,
                    text: documents.next().flatten().unwrap_or_default(),
                    metadata: to_metadata(metadatas.next().flatten()),
                });
            }
            if records.len() >= self.listing_cap {
                truncated = self.count().await? > records.len();
                if truncated {
                    warn!(collection = %self.collection_name, cap = self.listing_cap, "listing truncated");
                }
                break;
            }
            if n < limit {
                break;
            }
        }
        Ok(Listing { records, truncated })
    }

    async fn count(&self) -> Result<usize> {
        let resp = self
            .client
            .get(format!("{}/count", self.base))
            .send()
            .await
            .map_err(request_err)?;
        decode(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_default_library() {
        assert_eq!(collection_name("my_documents", "default", "latest"), "my_documents");
    }

    #[test]
    fn test_collection_name_sanitized() {
        assert_eq!(
            collection_name("docs", "phoenix", "1.7.0"),
            "docs_phoenix_1.7.0"
        );
        assert_eq!(collection_name("docs", "my lib", "v/2"), "docs_my_lib_v_2");
        assert_eq!(collection_name("docs", "x", "v!"), "docs_x_v");
    }

    #[test]
    fn test_collection_name_length_bounds() {
        let long = "a".repeat(80);
        assert_eq!(collection_name(&long, "default", "latest").len(), 63);
        assert_eq!(collection_name("a", "default", "latest"), "a00");
    }

    #[test]
    fn test_metadata_values_stringified() {
        let raw = json!({"source": "doc1", "chunk_index": 3, "flag": true, "gone": null});
        let meta = to_metadata(raw.as_object().cloned());
        assert_eq!(meta.get("source").unwrap(), "doc1");
        assert_eq!(meta.get("chunk_index").unwrap(), "3");
        assert_eq!(meta.get("flag").unwrap(), "true");
        assert!(!meta.contains_key("gone"));
    }
}
