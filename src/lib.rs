//! # Quire
//!
//! A local-first versioned document store with hybrid retrieval.
//!
//! Quire ingests documents, splits them into typed chunks under a
//! configurable profile, and keeps every published state as an immutable
//! version: whole-document versions from re-chunks, per-chunk versions
//! from targeted edits. Retrieval fuses lexical (FTS5) and vector search
//! over the current version of every document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────────────────┐
//! │  Sources │──▶│   Pipeline   │──▶│     Tri-store writer      │
//! │ files/dir│   │ parse+chunk  │   │ archive │ sqlite │ index  │
//! └──────────┘   └──────────────┘   └────────────┬──────────────┘
//!                                                │
//!                                 ┌──────────────┤
//!                                 ▼              ▼
//!                           ┌──────────┐   ┌──────────┐
//!                           │   CLI    │   │  Search  │
//!                           │ (quire)  │   │  fusion  │
//!                           └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! quire init                        # create database and archive
//! quire ingest ./docs               # ingest a file or directory
//! quire search "rollback procedure" --mode hybrid
//! quire edit <chunk-id> --text "corrected paragraph"
//! quire versions <document-id>      # version history
//! quire repair                      # re-index stale chunks
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`parse`] | Text-to-element extraction |
//! | [`chunker`] | Profile-driven chunking |
//! | [`reconcile`] | Element-order reconciliation of chunks and images |
//! | [`ledger`] | Chunk identity matching and version allocation |
//! | [`archive`] | Version artifact codec (gzip JSONL) |
//! | [`stores`] | Object archive, metadata store, and search index traits |
//! | [`writer`] | Ordered tri-store writes and index repair |
//! | [`images`] | Deduplicated image storage and associations |
//! | [`ingest`] | End-to-end ingestion pipeline |
//! | [`search`] | Hybrid retrieval fusion |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod archive;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod images;
pub mod ingest;
pub mod ledger;
pub mod locks;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod reconcile;
pub mod search;
pub mod stores;
pub mod writer;
