//! TOML configuration parsing and validation.
//!
//! Configuration is read once, when the embedder and store are built. The
//! engine never re-reads it. A handful of environment variables override
//! file values so containers can be configured without editing the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `DB_BACKEND` | `store.backend` |
//! | `CHROMA_HOST` | `store.chroma.host` |
//! | `CHROMA_PORT` | `store.chroma.port` |
//! | `DOCINDEX_RELATIONAL_URL` | `store.relational.url` (a `sqlite:` URL) |
//! | `DOCINDEX_EMBEDDING_PROVIDER` | `embedding.provider` |

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::store::{relational, BackendKind};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Words per window.
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    /// Words shared between consecutive windows. Must be smaller than `size`.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(IndexError::config("chunking.size must be > 0"));
        }
        if self.overlap >= self.size {
            return Err(IndexError::config(format!(
                "chunking.overlap ({}) must be smaller than chunking.size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Partition key for multi-corpus stores. Each (library, version)
    /// pair maps to its own collection, table scope, or directory.
    #[serde(default = "default_library")]
    pub library: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub flat: FlatConfig,
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            library: default_library(),
            version: default_version(),
            flat: FlatConfig::default(),
            chroma: ChromaConfig::default(),
            relational: RelationalConfig::default(),
        }
    }
}

fn default_backend() -> String {
    "flat".to_string()
}
fn default_library() -> String {
    "default".to_string()
}
fn default_version() -> String {
    "latest".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlatConfig {
    #[serde(default = "default_flat_root")]
    pub root: PathBuf,
}

impl Default for FlatConfig {
    fn default() -> Self {
        Self {
            root: default_flat_root(),
        }
    }
}

fn default_flat_root() -> PathBuf {
    PathBuf::from("./rag_store")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChromaConfig {
    #[serde(default = "default_chroma_host")]
    pub host: String,
    #[serde(default = "default_chroma_port")]
    pub port: u16,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            host: default_chroma_host(),
            port: default_chroma_port(),
            collection: default_collection(),
            tenant: default_tenant(),
            database: default_database(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ChromaConfig {
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

fn default_chroma_host() -> String {
    "localhost".to_string()
}
fn default_chroma_port() -> u16 {
    8000
}
fn default_collection() -> String {
    "my_documents".to_string()
}
fn default_tenant() -> String {
    "default_tenant".to_string()
}
fn default_database() -> String {
    "default_database".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelationalConfig {
    /// Connection string, e.g. `sqlite://./data/docindex.sqlite`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            url: None,
            table: default_table(),
        }
    }
}

fn default_table() -> String {
    "documents".to_string()
}

impl Config {
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.store.backend.parse()
    }

    /// Apply environment overrides. `lookup` is injectable for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("DB_BACKEND") {
            self.store.backend = backend.to_lowercase();
        }
        if let Some(host) = lookup("CHROMA_HOST") {
            self.store.chroma.host = host;
        }
        if let Some(port) = lookup("CHROMA_PORT") {
            self.store.chroma.port = port
                .trim()
                .parse()
                .map_err(|_| IndexError::config(format!("CHROMA_PORT is not a port: '{}'", port)))?;
        }
        if let Some(url) = lookup("DOCINDEX_RELATIONAL_URL") {
            self.store.relational.url = Some(url);
        }
        if let Some(provider) = lookup("DOCINDEX_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.to_lowercase();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.embedding.batch_size == 0 {
            return Err(IndexError::config("embedding.batch_size must be > 0"));
        }
        match self.embedding.provider.as_str() {
            "local" => {}
            "openai" | "hash" => {
                if self.embedding.dims.unwrap_or(0) == 0 {
                    return Err(IndexError::config(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    )));
                }
            }
            other => {
                return Err(IndexError::config(format!(
                    "Unknown embedding provider: '{}'. Must be local, openai, or hash.",
                    other
                )))
            }
        }

        if self.store.library.trim().is_empty() || self.store.version.trim().is_empty() {
            return Err(IndexError::config(
                "store.library and store.version must not be empty",
            ));
        }

        match self.backend_kind()? {
            BackendKind::Flat => {}
            BackendKind::Chroma => {
                if self.store.chroma.collection.trim().is_empty() {
                    return Err(IndexError::config("store.chroma.collection must not be empty"));
                }
            }
            BackendKind::Relational => {
                let url = self.store.relational.url.as_deref().unwrap_or("");
                if url.is_empty() {
                    return Err(IndexError::config(
                        "store.relational.url (or DOCINDEX_RELATIONAL_URL) must be set for the relational backend",
                    ));
                }
                relational::check_sqlite_url(url)?;
                let table = &self.store.relational.table;
                if table.is_empty()
                    || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(IndexError::config(format!(
                        "store.relational.table must be a plain identifier, got '{}'",
                        table
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Parse and validate configuration text without consulting the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| IndexError::config(format!("Failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Read a config file, apply environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
    let mut config: Config = toml::from_str(&content)
        .map_err(|e| IndexError::config(format!("Failed to parse config file: {}", e)))?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
