//! In-process embedding with fastembed.
//!
//! The ONNX model is downloaded from Hugging Face on first use and cached on
//! disk by fastembed. In memory, the loaded model lives in a `OnceCell` owned
//! by the [`LocalEmbedder`] handle: the first `embed` call initializes it,
//! every later call (from any task sharing the handle) reuses it. The model
//! is never reloaded mid-process.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::info;

use super::{check_inputs, check_outputs, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

type SharedModel = Arc<Mutex<fastembed::TextEmbedding>>;

pub struct LocalEmbedder {
    model_name: String,
    model_id: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    model: OnceCell<SharedModel>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let (model_id, native_dims) = resolve_model(&model_name)?;

        if let Some(dims) = config.dims {
            if dims != native_dims {
                return Err(IndexError::config(format!(
                    "embedding.dims = {} does not match {} ({} dims)",
                    dims, model_name, native_dims
                )));
            }
        }

        Ok(Self {
            model_name,
            model_id,
            dims: native_dims,
            batch_size: config.batch_size.max(1),
            model: OnceCell::new(),
        })
    }

    async fn model(&self) -> Result<SharedModel> {
        let model = self
            .model
            .get_or_try_init(|| async {
                info!(model = %self.model_name, "loading local embedding model");
                let id = self.model_id.clone();
                let loaded = tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(id).with_show_download_progress(true),
                    )
                })
                .await
                .map_err(|e| IndexError::embedding(format!("model loader panicked: {}", e)))?
                .map_err(|e| {
                    IndexError::embedding(format!("failed to initialize local model: {}", e))
                })?;
                Ok::<_, IndexError>(Arc::new(Mutex::new(loaded)))
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        other => Err(IndexError::config(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_inputs(texts)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model().await?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let expected = texts.len();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| IndexError::embedding("local model lock poisoned"))?;
            guard
                .embed(texts, Some(batch_size))
                .map_err(|e| IndexError::embedding(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| IndexError::embedding(format!("embedding task panicked: {}", e)))??;

        check_outputs(expected, self.dims, vectors)
    }
}
