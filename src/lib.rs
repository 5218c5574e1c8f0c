//! # sheet-rag
//!
//! Retrieval-augmented question answering over tabular data.
//!
//! A CSV or Excel file is loaded into a [`Table`](models::Table), each row is
//! serialized as `column: value` lines and split into chunks, the chunks are
//! embedded into a SQLite-persisted vector index, and questions are answered
//! by a hosted language model grounded in the most similar chunks. The index
//! is rebuilt only when the file's content fingerprint changes. Every
//! question/answer pair is kept in a per-user JSON history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │  Loader  │──▶│ Chunker  │──▶│ Vector index │──▶│  Pipeline  │
//! │ CSV/XLSX │   │ row→text │   │ SQLite+BLOB  │   │ embed→LLM  │
//! └──────────┘   └──────────┘   └──────▲───────┘   └─────┬──────┘
//!       │ fingerprint                  │ build-or-reuse   │ record
//!       └──────────────▶ Session ──────┘                  ▼
//!                                                   ┌────────────┐
//!                                                   │  History   │
//!                                                   │ JSON/user  │
//!                                                   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`loader`] | CSV / XLSX / XLS reading |
//! | [`fingerprint`] | Content hashing for change detection |
//! | [`chunk`] | Row serialization and recursive text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Language model provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`pipeline`] | Retrieval + prompt + generation |
//! | [`history`] | Per-user chat history |
//! | [`session`] | Per-interaction context and rebuild policy |
//! | [`stats`] | Index status report |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod history;
mod http;
pub mod index;
pub mod loader;
mod lock;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod stats;
