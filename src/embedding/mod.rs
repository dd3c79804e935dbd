//! Embedding abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **`LocalEmbedder`**: runs a fastembed model in-process; the model is
//!   loaded on first use and cached for the life of the handle.
//! - **[`OpenAIEmbedder`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint.
//! - **[`HashEmbedder`]**: deterministic feature hashing; no model, no network.
//!
//! Also provides vector utilities used by the store backends:
//! - [`l2_distance`]: Euclidean distance between two vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` byte encoding
//!
//! # Contract
//!
//! Every implementation returns exactly one vector per input, in input
//! order, each of length [`Embedder::dims`]. Empty input texts are rejected
//! with [`IndexError::Embedding`] rather than silently dropped. Nothing here
//! retries; a failed call fails the ingest or query that made it.
//!
//! # Provider Selection
//!
//! ```rust
//! # use docindex::config::EmbeddingConfig;
//! # use docindex::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "hash".to_string(),
//!     dims: Some(64),
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 64);
//! ```

#[cfg(feature = "local-embeddings")]
mod local;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};

/// Maps ordered batches of text to fixed-dimension vectors.
///
/// Handles are shared (`Arc<dyn Embedder>`) between the indexing and query
/// pipelines; implementations must be safe to call concurrently.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| IndexError::embedding("empty embedding response"))
}

/// Create the [`Embedder`] selected by configuration.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"local"` | `LocalEmbedder` (needs the `local-embeddings` feature) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(IndexError::config(
            "local embedding provider requires --features local-embeddings",
        )),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| IndexError::config("embedding.dims required for hash provider"))?;
            Ok(Arc::new(HashEmbedder::new(dims)?))
        }
        other => Err(IndexError::config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Reject empty inputs before any model work happens.
pub(crate) fn check_inputs(texts: &[String]) -> Result<()> {
    if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(IndexError::embedding(format!(
            "input text at position {} is empty",
            pos
        )));
    }
    Ok(())
}

/// Enforce one vector per input, each of the expected dimension.
pub(crate) fn check_outputs(
    expected: usize,
    dims: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(IndexError::embedding(format!(
            "model returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(IndexError::embedding(format!(
            "model returned a {}-dimensional vector, expected {}",
            bad.len(),
            dims
        )));
    }
    Ok(vectors)
}

// ============ OpenAI ============

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedder backed by the OpenAI embeddings API.
///
/// Requires `OPENAI_API_KEY` at construction. Large batches are split into
/// requests of at most `batch_size` texts.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| IndexError::config("OPENAI_API_KEY environment variable not set"))?;
        let dims = config
            .dims
            .ok_or_else(|| IndexError::config("embedding.dims required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            dims,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::embedding(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(IndexError::embedding(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| IndexError::embedding(format!("invalid OpenAI response: {}", e)))?;
        Ok(parsed.into_ordered())
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIResponse {
    /// Rows may arrive out of order; `index` is authoritative.
    fn into_ordered(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_inputs(texts)?;
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "embedding batch via OpenAI");
            out.extend(self.embed_batch(batch).await?);
        }
        check_outputs(texts.len(), self.dims, out)
    }
}

// ============ Hashing ============

/// Deterministic feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed (FNV-1a) into `dims` signed
/// buckets and the result is L2-normalized. Texts sharing words land close
/// together, which is enough for offline runs and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(IndexError::config("hash embedder dims must be > 0"));
        }
        Ok(Self { dims })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_inputs(texts)?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use docindex::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes back into a vector. Trailing bytes are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Euclidean (L2) distance. Vectors of different lengths are infinitely far apart.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(l2_distance(&[1.0], &[1.0]), 0.0);
        assert!(l2_distance(&[1.0, 2.0], &[1.0]).is_infinite());
    }

    #[tokio::test]
    async fn test_hash_embedder_order_preserving() {
        let embedder = HashEmbedder::new(32).unwrap();
        let texts: Vec<String> = ["alpha beta", "gamma delta", "epsilon"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let batch = embedder.embed(&texts).await.unwrap();
        let single = embedder.embed(&texts[1..2]).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], single[0]);
        assert!(batch.iter().all(|v| v.len() == 32));
    }

    #[tokio::test]
    async fn test_hash_embedder_rejects_empty_text() {
        let embedder = HashEmbedder::new(8).unwrap();
        let err = embedder
            .embed(&["ok".to_string(), "  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[test]
    fn test_hash_embedder_similarity() {
        let embedder = HashEmbedder::new(256).unwrap();
        let q = embedder.embed_one("rust cargo crates");
        let near = embedder.embed_one("Rust uses cargo to build crates");
        let far = embedder.embed_one("python machine learning");
        assert!(l2_distance(&q, &near) < l2_distance(&q, &far));
    }

    #[test]
    fn test_check_outputs_length_mismatch() {
        let err = check_outputs(2, 3, vec![vec![0.0; 3]]).unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
        let err = check_outputs(1, 3, vec![vec![0.0; 4]]).unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[test]
    fn test_openai_response_reordered_by_index() {
        let json = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#;
        let parsed: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_ordered(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_create_embedder_unknown() {
        let config = EmbeddingConfig {
            provider: "bogus".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
