//! # docindex
//!
//! A document indexing and retrieval engine. Documents (PDF, HTML, text)
//! are split into word windows, embedded as vectors, and stored in one of
//! several interchangeable vector stores that all answer the same calls the
//! same way: idempotent ingestion, delete-by-source, and ranked top-k queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────────┐
//! │  Loader  │──▶│ Chunker │──▶│ Embedder │──▶│   VectorStore    │
//! │ PDF/HTML │   │  words  │   │ local/API│   │ flat│chroma│sql  │
//! └──────────┘   └─────────┘   └────┬─────┘   └────────┬─────────┘
//!                                   │                  │
//!                                   └──── search ◀─────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dix add ./docs/guide.pdf          # index one document
//! dix add-dir ./saved_pages         # index a directory of pages
//! dix query "how do I deploy" --n-results 3
//! dix remove ./docs/guide.pdf --yes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and env overrides |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Chunks, records, query hits, outcomes |
//! | [`chunk`] | Word-window chunking |
//! | [`loader`] | File → normalized text |
//! | [`embedding`] | Embedder abstraction and providers |
//! | [`store`] | Vector store trait and backends |
//! | [`ingest`] | Indexing pipeline |
//! | [`search`] | Query pipeline |
//! | [`engine`] | Everything above, assembled from one config |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod search;
pub mod store;

pub use engine::Engine;
pub use error::{IndexError, Result};
