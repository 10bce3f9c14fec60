//! # docsum
//!
//! A document ingestion and summarization pipeline.
//!
//! Files landing in a watched blob store (PDF, Word, plain text and Outlook
//! `.msg`) are extracted to text, summarized in chunks sized to the
//! summarization service's input limit, and persisted as one queryable
//! record per item. Attachments of mail messages, including messages
//! attached to messages, are expanded into items of their own.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌─────────┐
//! │ Blob store  │──▶│ Extractor │──▶│ Chunker  │──▶│ Summarizer│──▶│ Records │
//! │ FS / S3     │   │ per kind  │   └──────────┘   └───────────┘   │ SQLite  │
//! └─────────────┘   └─────┬─────┘                                  └─────────┘
//!        ▲                │ .msg attachments
//!        │          ┌─────▼─────┐
//!        └──────────│ Expander  │  (handoff store + work queue)
//!                   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsum init                        # create database
//! docsum process inbox/report.pdf    # one trigger notification
//! docsum scan                        # everything new under the root
//! docsum get inbox/report.pdf        # inspect the record
//! docsum stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Items, extraction results, chunks, records |
//! | [`error`] | Error types |
//! | [`blob`] | Blob store trait, filesystem store, discovery filter |
//! | [`blob_s3`] | S3 blob store |
//! | [`analysis`] | Document analysis services (local, Azure) |
//! | [`mail`] | Outlook `.msg` parsing |
//! | [`extract`] | Text extraction dispatch |
//! | [`chunk`] | Line-aware text chunking |
//! | [`summarize`] | Chunked abstractive summarization |
//! | [`expand`] | Attachment expansion |
//! | [`markings`] | Classification marking detection |
//! | [`record`] | Record building and the record writer |
//! | [`store`] | Record persistence |
//! | [`pipeline`] | The orchestrator |
//! | [`ingest`] | `process` and `scan` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod azure;
pub mod blob;
pub mod blob_s3;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod expand;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod mail;
pub mod markings;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod stats;
pub mod store;
pub mod summarize;
