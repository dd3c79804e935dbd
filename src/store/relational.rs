//! Relational backend: one SQL table with a vector BLOB column.
//!
//! The table lives in SQLite. Server URLs such as `postgres://` are rejected
//! at configuration time.
//!
//! Every `(library, version)` pair is a scope of rows in the same table.
//! The pool holds a single connection, so calls on one store handle are
//! serialized by the pool; there is no pooling to share between callers.
//!
//! ```sql
//! CREATE TABLE <table> (
//!     seq           INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
//!     library       TEXT NOT NULL,
//!     version       TEXT NOT NULL,
//!     id            TEXT NOT NULL,
//!     source_id     TEXT NOT NULL,
//!     text          TEXT NOT NULL,
//!     metadata_json TEXT NOT NULL,
//!     embedding     BLOB NOT NULL,                      -- little-endian f32
//!     dims          INTEGER NOT NULL,
//!     UNIQUE(library, version, id)
//! )
//! ```
//!
//! `exists` and `delete_by_source` go through an index on
//! `(library, version, source_id)`, keyed on the stored column rather than on
//! anything optional in the metadata. Distances are L2, computed over the
//! scoped rows in `seq` order.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::{check_dims, rank_by_l2, BackendKind, Candidate, VectorStore};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{IndexError, Result};
use crate::models::{DeleteReport, Listing, Metadata, QueryHit, Record, StoredRecord};

const BACKEND: &str = "relational";

fn db_err(e: sqlx::Error) -> IndexError {
    IndexError::Backend {
        backend: BACKEND,
        reason: e.to_string(),
    }
}

/// Reject connection strings that name a server database.
pub fn check_sqlite_url(url: &str) -> Result<()> {
    if url.trim_start().to_ascii_lowercase().starts_with("sqlite:") {
        return Ok(());
    }
    Err(IndexError::config(format!(
        "relational backend only supports sqlite: URLs, got scheme '{}'",
        url.split("://").next().unwrap_or(url)
    )))
}

pub struct RelationalStore {
    pool: SqlitePool,
    table: String,
    library: String,
    version: String,
    dims: usize,
}

impl RelationalStore {
    /// Connect, create the table if missing, and return a ready store.
    ///
    /// `table` must be a plain identifier; config validation enforces this.
    pub async fn connect(
        url: &str,
        table: &str,
        library: &str,
        version: &str,
        dims: usize,
    ) -> Result<Self> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IndexError::config(format!(
                "invalid table name: '{}'",
                table
            )));
        }

        check_sqlite_url(url)?;
        ensure_parent_dir(url)?;

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| IndexError::config(format!("invalid connection string: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| IndexError::BackendUnavailable {
                backend: BACKEND,
                reason: e.to_string(),
            })?;

        let store = Self {
            pool,
            table: table.to_string(),
            library: library.to_string(),
            version: version.to_string(),
            dims,
        };
        store.migrate().await?;
        info!(table = %store.table, library, version, "opened relational store");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                library TEXT NOT NULL,
                version TEXT NOT NULL,
                id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{{}}',
                embedding BLOB NOT NULL,
                dims INTEGER NOT NULL,
                UNIQUE(library, version, id)
            )
            "#,
            t = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_source ON {t}(library, version, source_id)",
            t = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn count_source(&self, source_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE library = ? AND version = ? AND source_id = ?",
            self.table
        ))
        .bind(&self.library)
        .bind(&self.version)
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(n as usize)
    }
}

/// Create the parent directory of a file-backed SQLite URL.
fn ensure_parent_dir(url: &str) -> Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::BackendUnavailable {
                backend: BACKEND,
                reason: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }
    }
    Ok(())
}

fn parse_metadata(raw: &str) -> Result<Metadata> {
    serde_json::from_str(raw).map_err(|e| IndexError::Backend {
        backend: BACKEND,
        reason: format!("unreadable metadata_json: {}", e),
    })
}

#[async_trait]
impl VectorStore for RelationalStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn upsert(&self, records: &[Record]) -> Result<()> {
        for r in records {
            check_dims(self.dims, r.embedding.len(), "record embedding")?;
        }

        // One transaction per batch: either every record lands or none do.
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let sql = format!(
            r#"
            INSERT INTO {} (library, version, id, source_id, text, metadata_json, embedding, dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(library, version, id) DO UPDATE SET
                source_id = excluded.source_id,
                text = excluded.text,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                dims = excluded.dims
            "#,
            self.table
        );
        for r in records {
            let metadata_json = serde_json::to_string(&r.metadata).map_err(|e| {
                IndexError::Backend {
                    backend: BACKEND,
                    reason: format!("failed to encode metadata: {}", e),
                }
            })?;
            sqlx::query(&sql)
                .bind(&self.library)
                .bind(&self.version)
                .bind(&r.id)
                .bind(&r.source_id)
                .bind(&r.text)
                .bind(metadata_json)
                .bind(vec_to_blob(&r.embedding))
                .bind(r.embedding.len() as i64)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(records = records.len(), "relational upsert");
        Ok(())
    }

    async fn exists(&self, source_id: &str) -> Result<bool> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE library = ? AND version = ? AND source_id = ?)",
            self.table
        ))
        .bind(&self.library)
        .bind(&self.version)
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<DeleteReport> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE library = ? AND version = ? AND source_id = ?",
            self.table
        ))
        .bind(&self.library)
        .bind(&self.version)
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let remaining = self.count_source(source_id).await?;
        Ok(DeleteReport {
            source_id: source_id.to_string(),
            removed: result.rows_affected() as usize,
            remaining,
        })
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        check_dims(self.dims, vector.len(), "query vector")?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT text, metadata_json, embedding FROM {} WHERE library = ? AND version = ? ORDER BY seq",
            self.table
        ))
        .bind(&self.library)
        .bind(&self.version)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let text: String = row.get("text");
            let metadata = parse_metadata(row.get("metadata_json"))?;
            let blob: Vec<u8> = row.get("embedding");
            decoded.push((blob_to_vec(&blob), text, metadata));
        }

        let candidates = decoded.iter().map(|(embedding, text, metadata)| Candidate {
            embedding,
            text,
            metadata,
        });
        Ok(rank_by_l2(vector, candidates, k))
    }

    async fn get_all(&self) -> Result<Listing> {
        let rows = sqlx::query(&format!(
            "SELECT id, text, metadata_json FROM {} WHERE library = ? AND version = ? ORDER BY seq",
            self.table
        ))
        .bind(&self.library)
        .bind(&self.version)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(StoredRecord {
                id: row.get("id"),
                text: row.get("text"),
                metadata: parse_metadata(row.get("metadata_json"))?,
            });
        }
        Ok(Listing {
            records,
            truncated: false,
        })
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE library = ? AND version = ?",
            self.table
        ))
        .bind(&self.library)
        .bind(&self.version)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(n as usize)
    }
}
