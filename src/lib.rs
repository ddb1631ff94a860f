//! # tm-engine
//!
//! Translation-memory matching and retrieval.
//!
//! tm-engine finds, scores and ranks stored translation units (source/target
//! segment pairs) against a query. It covers fuzzy edit-distance matching,
//! domain penalties, inline XML tag normalization and transfer between
//! languages, streaming TMX import/export, and the chunked scans used by
//! maintenance jobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ TMX reader  │──▶│   Chunker   │──▶│ CandidateStore │
//! │ file / zip  │   │  (batches)  │   │  (search/scan) │
//! └─────────────┘   └─────────────┘   └───────┬────────┘
//!                                             │
//!                  ┌──────────────────────────┤
//!                  ▼                          ▼
//!          ┌───────────────┐          ┌──────────────┐
//!          │ Orchestrator  │          │  Export /    │
//!          │ score + tags  │          │  maintenance │
//!          └───────────────┘          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tm pairs memory.zip
//! tm query memory.tmx "Press the button" --pair en-es
//! tm export memory.tmx --pair en-es --load-domain Legal --domain Legal --out ./exports
//! tm dedup memory.tmx --pair en-es
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`markup`] | Inline tag codec and normalization |
//! | [`tag_transfer`] | Tag transfer from source onto target |
//! | [`scoring`] | Edit distance, penalties, best-candidate selection |
//! | [`query`] | Query orchestration |
//! | [`chunk`] | Bounded batching of lazy sequences |
//! | [`tmx`] | Streaming TMX reader and writer |
//! | [`store`] | Retrieval backend contract and in-memory store |
//! | [`import`], [`export`], [`maintenance`] | Long-running jobs |

pub mod chunk;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod maintenance;
pub mod markup;
pub mod models;
pub mod progress;
pub mod query;
pub mod scoring;
pub mod store;
pub mod tag_transfer;
pub mod tmx;
pub mod tokenizer;
pub mod translate;

pub use error::{TmError, TmResult};
