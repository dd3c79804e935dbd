//! Word-window text chunker.
//!
//! Splits normalized document text on whitespace and emits windows of
//! `size` words, advancing the window start by `size - overlap` words each
//! step. The trailing partial window is kept, even when it holds only the
//! overlap words of the previous window. Word counts keep chunks inside
//! an embedding model's token budget regardless of language.
//!
//! [`chunk_document`] wraps the raw windows into [`Chunk`]s carrying the
//! source id, a contiguous sequence index, and a SHA-256 of the text.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::{IndexError, Result};
use crate::models::Chunk;

/// Split `text` into overlapping word windows.
///
/// Empty (or all-whitespace) input yields no windows. `overlap >= size`
/// and `size == 0` are rejected.
pub fn chunk_words(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    if size == 0 {
        return Err(IndexError::config("chunk size must be > 0"));
    }
    if overlap >= size {
        return Err(IndexError::config(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let step = size - overlap;
    let mut windows = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + size).min(words.len());
        windows.push(words[start..end].join(" "));
        start += step;
    }

    Ok(windows)
}

/// Provenance stamped onto every chunk of a document.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub library: Option<String>,
    pub version: Option<String>,
}

/// Chunk one document's text into [`Chunk`]s with indices starting at 0.
pub fn chunk_document(
    source_id: &str,
    text: &str,
    config: &ChunkingConfig,
    provenance: &Provenance,
) -> Result<Vec<Chunk>> {
    let windows = chunk_words(text, config.size, config.overlap)?;
    Ok(windows
        .into_iter()
        .enumerate()
        .map(|(i, window)| make_chunk(source_id, i, window, provenance))
        .collect())
}

fn make_chunk(source_id: &str, index: usize, text: String, provenance: &Provenance) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        text,
        source_id: source_id.to_string(),
        sequence_index: index,
        library: provenance.library.clone(),
        version: provenance.version.clone(),
        hash,
    }
}
