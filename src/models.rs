//! Core data models used throughout the engine.
//!
//! These types represent the chunks, persisted records, and query results
//! that flow through the indexing and retrieval pipelines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-to-string metadata attached to every record.
///
/// A `BTreeMap` keeps key order stable in JSON output and sidecar files.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the originating source id. Present on every record.
pub const SOURCE_KEY: &str = "source";
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
pub const CHUNK_HASH_KEY: &str = "chunk_hash";
pub const INGESTED_AT_KEY: &str = "ingested_at";
pub const LIBRARY_KEY: &str = "library";
pub const VERSION_KEY: &str = "version";

/// A contiguous window of source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    /// Position within the source; strictly increasing from 0.
    pub sequence_index: usize,
    pub library: Option<String>,
    pub version: Option<String>,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// The persisted unit: one record per chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub source_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Deterministic record id for a chunk.
pub fn record_id(source_id: &str, sequence_index: usize) -> String {
    format!("{}-{}", source_id, sequence_index)
}

impl Record {
    /// Build a record from a chunk and its embedding, stamping provenance metadata.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>, ingested_at: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), chunk.source_id.clone());
        metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk.sequence_index.to_string());
        metadata.insert(CHUNK_HASH_KEY.to_string(), chunk.hash.clone());
        metadata.insert(INGESTED_AT_KEY.to_string(), ingested_at.to_string());
        if let Some(library) = &chunk.library {
            metadata.insert(LIBRARY_KEY.to_string(), library.clone());
        }
        if let Some(version) = &chunk.version {
            metadata.insert(VERSION_KEY.to_string(), version.clone());
        }

        Self {
            id: record_id(&chunk.source_id, chunk.sequence_index),
            source_id: chunk.source_id.clone(),
            text: chunk.text.clone(),
            metadata,
            embedding,
        }
    }
}

/// A record as returned by enumeration, without its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl StoredRecord {
    pub fn source_id(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }
}

/// One ranked query result. Lower `distance` is closer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub text: String,
    pub metadata: Metadata,
    pub distance: f32,
}

/// Result of `get_all`.
///
/// `truncated` is set when a backend had to approximate enumeration and
/// hit its cap, so `records` may be missing entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Listing {
    pub records: Vec<StoredRecord>,
    pub truncated: bool,
}

/// Result of `delete_by_source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub source_id: String,
    pub removed: usize,
    /// Records still carrying the source after the delete. Non-zero means
    /// the backend only partially honored the request.
    pub remaining: usize,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Outcome of ingesting one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Added { source_id: String, chunks: usize },
    AlreadyPresent { source_id: String },
    Failed { source_id: String, reason: String },
}

impl IngestOutcome {
    pub fn source_id(&self) -> &str {
        match self {
            IngestOutcome::Added { source_id, .. }
            | IngestOutcome::AlreadyPresent { source_id }
            | IngestOutcome::Failed { source_id, .. } => source_id,
        }
    }
}
