//! # mhtml-search
//!
//! Find, extract, index, and query JSON embedded in saved web pages
//! (MHTML archives).
//!
//! Archives are discovered under one or more roots, parsed as MIME
//! messages, and scanned for JSON objects in `<script>` blocks, `data-*`
//! attributes, and brace-balanced text. Fragments are either persisted to a
//! local SQLite index with full-text search, or held in memory for a single
//! quick-scan query.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌────────────┐
//! │ Discovery │──▶│ Extractor │──▶│ IndexStore │  SQLite + FTS5
//! │ find/walk │   │ MIME+JSON │   └─────┬──────┘
//! └───────────┘   └─────┬─────┘         │
//!                       │ quick scan    ▼
//!                       └──────────▶ QueryBackend ◀── analytics (DataFusion)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mhtml-search index --path ~/saved-pages
//! mhtml-search sql "SELECT file_path, json_count FROM mhtml_files ORDER BY json_count DESC"
//! mhtml-search sql John
//! mhtml-search scan ~/saved-pages --query john
//! mhtml-search scan ~/saved-pages --analytics \
//!     --query "SELECT file_path, COUNT(*) AS n FROM mhtml_data GROUP BY file_path"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error types |
//! | [`models`] | Archives, fragments, result rows |
//! | [`storage`] | Storage-medium probe and worker-count hint |
//! | [`discovery`] | Native listing and portable walk |
//! | [`extract`] | MIME parsing and JSON heuristics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Persistent index: upsert and query |
//! | [`query`] | Query backends and selection |
//! | `analytics` | In-memory analytical engine (`analytics` feature) |
//! | [`ingest`] | Index and quick-scan orchestration |
//! | [`progress`] | Progress reporting |
//! | [`stats`] | Index statistics |
//! | [`output`] | Table, CSV, and JSON rendering |

#[cfg(feature = "analytics")]
pub mod analytics;
pub mod config;
pub mod db;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod output;
pub mod progress;
pub mod query;
pub mod stats;
pub mod storage;
pub mod store;
