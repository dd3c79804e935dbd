//! Flat in-memory L2 index persisted next to a JSON sidecar.
//!
//! One directory per `(library, version)` under the configured root:
//!
//! ```text
//! <root>/<library>/<version>/
//!   index.bin        magic "DXFLAT01", u32 dims, u64 count, count × dims f32 (LE)
//!   documents.json   {"ids": [...], "chunks": [...], "metadatas": [...]}
//! ```
//!
//! Index position `i` corresponds to `ids[i]`, `chunks[i]` and `metadatas[i]`.
//! The whole collection is held in memory. Every mutating call writes
//! `documents.tmp` and `index.tmp` in full, renames the sidecar into place,
//! then renames the index. On open, a surviving `documents.tmp` means no
//! rename happened and both temporaries are dropped; a lone `index.tmp` means
//! the sidecar already landed and the index is rolled forward. Queries are brute-force
//! over all vectors. The index has no filtered lookup, so `exists` and
//! `delete_by_source` scan the sidecar metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::{check_dims, rank_by_l2, BackendKind, Candidate, VectorStore};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{IndexError, Result};
use crate::models::{DeleteReport, Listing, Metadata, QueryHit, Record, StoredRecord, SOURCE_KEY};

const BACKEND: &str = "flat";
const MAGIC: &[u8; 8] = b"DXFLAT01";
const HEADER_LEN: usize = 8 + 4 + 8;
pub const INDEX_FILE: &str = "index.bin";
pub const SIDECAR_FILE: &str = "documents.json";
const INDEX_TMP: &str = "index.tmp";
const SIDECAR_TMP: &str = "documents.tmp";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Sidecar {
    ids: Vec<String>,
    chunks: Vec<String>,
    metadatas: Vec<Metadata>,
}

#[derive(Debug, Clone, Default)]
struct FlatState {
    /// Row-major, `len() == ids.len() * dims`.
    vectors: Vec<f32>,
    sidecar: Sidecar,
}

impl FlatState {
    fn len(&self) -> usize {
        self.sidecar.ids.len()
    }

    fn source_of(&self, i: usize) -> Option<&str> {
        self.sidecar.metadatas[i].get(SOURCE_KEY).map(String::as_str)
    }
}

pub struct FlatIndexStore {
    dir: PathBuf,
    dims: usize,
    state: Mutex<FlatState>,
}

impl FlatIndexStore {
    /// Open (or create) the collection directory for `(library, version)`.
    pub fn open(root: &Path, library: &str, version: &str, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(IndexError::config("flat index dimension must be > 0"));
        }
        let dir = root.join(sanitize(library)).join(sanitize(version));
        std::fs::create_dir_all(&dir).map_err(|e| IndexError::BackendUnavailable {
            backend: BACKEND,
            reason: format!("cannot create {}: {}", dir.display(), e),
        })?;

        let state = load_state(&dir, dims)?;
        info!(dir = %dir.display(), records = state.len(), "opened flat index");

        Ok(Self {
            dir,
            dims,
            state: Mutex::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FlatState>> {
        self.state.lock().map_err(|_| IndexError::Backend {
            backend: BACKEND,
            reason: "index lock poisoned".to_string(),
        })
    }

    /// Persist `next` and only then make it the live state.
    fn commit(&self, guard: &mut FlatState, next: FlatState) -> Result<()> {
        save_state(&self.dir, self.dims, &next)?;
        *guard = next;
        Ok(())
    }
}

/// Keep directory names to a single safe path component.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

fn corrupt(dir: &Path, why: impl std::fmt::Display) -> IndexError {
    IndexError::Backend {
        backend: BACKEND,
        reason: format!("corrupt flat index in {}: {}", dir.display(), why),
    }
}

/// Finish or discard a commit interrupted between its two renames.
fn recover_commit(dir: &Path) -> Result<()> {
    let index_tmp = dir.join(INDEX_TMP);
    let sidecar_tmp = dir.join(SIDECAR_TMP);

    if sidecar_tmp.exists() {
        warn!(dir = %dir.display(), "discarding uncommitted flat index write");
        std::fs::remove_file(&sidecar_tmp).map_err(|e| IndexError::io(&sidecar_tmp, e))?;
        if index_tmp.exists() {
            std::fs::remove_file(&index_tmp).map_err(|e| IndexError::io(&index_tmp, e))?;
        }
    } else if index_tmp.exists() {
        warn!(dir = %dir.display(), "completing interrupted flat index write");
        let index_path = dir.join(INDEX_FILE);
        std::fs::rename(&index_tmp, &index_path).map_err(|e| IndexError::io(&index_path, e))?;
    }
    Ok(())
}

fn load_state(dir: &Path, dims: usize) -> Result<FlatState> {
    recover_commit(dir)?;

    let index_path = dir.join(INDEX_FILE);
    let sidecar_path = dir.join(SIDECAR_FILE);

    match (index_path.exists(), sidecar_path.exists()) {
        (false, false) => return Ok(FlatState::default()),
        (true, true) => {}
        _ => return Err(corrupt(dir, "index and sidecar must both exist")),
    }

    let bytes = std::fs::read(&index_path).map_err(|e| IndexError::io(&index_path, e))?;
    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        return Err(corrupt(dir, "bad index header"));
    }
    let stored_dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    if stored_dims != dims {
        return Err(IndexError::config(format!(
            "flat index in {} has dimension {}, embedder produces {}",
            dir.display(),
            stored_dims,
            dims
        )));
    }
    let vectors = blob_to_vec(&bytes[HEADER_LEN..]);
    if vectors.len() != count * dims {
        return Err(corrupt(dir, "vector payload length does not match header"));
    }

    let raw = std::fs::read_to_string(&sidecar_path).map_err(|e| IndexError::io(&sidecar_path, e))?;
    let sidecar: Sidecar = serde_json::from_str(&raw).map_err(|e| corrupt(dir, e))?;
    if sidecar.ids.len() != count
        || sidecar.chunks.len() != count
        || sidecar.metadatas.len() != count
    {
        return Err(corrupt(dir, "sidecar arrays are not aligned with the index"));
    }

    Ok(FlatState { vectors, sidecar })
}

fn save_state(dir: &Path, dims: usize, state: &FlatState) -> Result<()> {
    let mut index = Vec::with_capacity(HEADER_LEN + state.vectors.len() * 4);
    index.extend_from_slice(MAGIC);
    index.extend_from_slice(&(dims as u32).to_le_bytes());
    index.extend_from_slice(&(state.len() as u64).to_le_bytes());
    index.extend_from_slice(&vec_to_blob(&state.vectors));

    let sidecar = serde_json::to_vec_pretty(&state.sidecar).map_err(|e| IndexError::Backend {
        backend: BACKEND,
        reason: format!("failed to serialize sidecar: {}", e),
    })?;

    let sidecar_tmp = dir.join(SIDECAR_TMP);
    let index_tmp = dir.join(INDEX_TMP);
    std::fs::write(&sidecar_tmp, &sidecar).map_err(|e| IndexError::io(&sidecar_tmp, e))?;
    std::fs::write(&index_tmp, &index).map_err(|e| IndexError::io(&index_tmp, e))?;

    // The sidecar rename is the commit point; `recover_commit` relies on it.
    let sidecar_path = dir.join(SIDECAR_FILE);
    std::fs::rename(&sidecar_tmp, &sidecar_path).map_err(|e| IndexError::io(&sidecar_path, e))?;
    let index_path = dir.join(INDEX_FILE);
    std::fs::rename(&index_tmp, &index_path).map_err(|e| IndexError::io(&index_path, e))
}

#[async_trait]
impl VectorStore for FlatIndexStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Flat
    }

    async fn upsert(&self, records: &[Record]) -> Result<()> {
        for r in records {
            check_dims(self.dims, r.embedding.len(), "record embedding")?;
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut guard = self.lock()?;
        let mut next: FlatState = (*guard).clone();
        for r in records {
            let mut metadata = r.metadata.clone();
            metadata
                .entry(SOURCE_KEY.to_string())
                .or_insert_with(|| r.source_id.clone());

            match next.sidecar.ids.iter().position(|id| id == &r.id) {
                Some(i) => {
                    next.vectors[i * self.dims..(i + 1) * self.dims].copy_from_slice(&r.embedding);
                    next.sidecar.chunks[i] = r.text.clone();
                    next.sidecar.metadatas[i] = metadata;
                }
                None => {
                    next.vectors.extend_from_slice(&r.embedding);
                    next.sidecar.ids.push(r.id.clone());
                    next.sidecar.chunks.push(r.text.clone());
                    next.sidecar.metadatas.push(metadata);
                }
            }
        }
        self.commit(&mut guard, next)?;
        debug!(records = records.len(), total = guard.len(), "flat upsert");
        Ok(())
    }

    async fn exists(&self, source_id: &str) -> Result<bool> {
        let guard = self.lock()?;
        Ok((0..guard.len()).any(|i| guard.source_of(i) == Some(source_id)))
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<DeleteReport> {
        let mut guard = self.lock()?;
        let keep: Vec<usize> = (0..guard.len())
            .filter(|&i| guard.source_of(i) != Some(source_id))
            .collect();
        let removed = guard.len() - keep.len();

        if removed > 0 {
            let mut next = FlatState::default();
            for &i in &keep {
                next.vectors
                    .extend_from_slice(&guard.vectors[i * self.dims..(i + 1) * self.dims]);
                next.sidecar.ids.push(guard.sidecar.ids[i].clone());
                next.sidecar.chunks.push(guard.sidecar.chunks[i].clone());
                next.sidecar.metadatas.push(guard.sidecar.metadatas[i].clone());
            }
            self.commit(&mut guard, next)?;
        }

        Ok(DeleteReport {
            source_id: source_id.to_string(),
            removed,
            remaining: 0,
        })
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        check_dims(self.dims, vector.len(), "query vector")?;
        let guard = self.lock()?;
        let state: &FlatState = &guard;
        let dims = self.dims;
        let candidates = (0..state.len()).map(|i| Candidate {
            embedding: &state.vectors[i * dims..(i + 1) * dims],
            text: &state.sidecar.chunks[i],
            metadata: &state.sidecar.metadatas[i],
        });
        Ok(rank_by_l2(vector, candidates, k))
    }

    async fn get_all(&self) -> Result<Listing> {
        let guard = self.lock()?;
        let records = (0..guard.len())
            .map(|i| StoredRecord {
                id: guard.sidecar.ids[i].clone(),
                text: guard.sidecar.chunks[i].clone(),
                metadata: guard.sidecar.metadatas[i].clone(),
            })
            .collect();
        Ok(Listing {
            records,
            truncated: false,
        })
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}
