//! # repochat — conversational Q&A over code repositories
//!
//! Indexes a repository into overlapping, citable units, then answers
//! multi-turn questions about it with retrieval-augmented generation.
//!
//! ## Architecture
//!
//! - **[`indexer`]** — Document sources, boundary-aware chunking, index builds
//! - **[`index`]** — In-memory vector index, SQLite persistence, per-repository catalog
//! - **[`embedder`]** — Embedding capability (deterministic mock, OpenAI-compatible HTTP)
//! - **[`llm`]** — Answer-generation capability (OpenAI-compatible chat, mock)
//! - **[`retriever`]** — Query embedding and top-k search
//! - **[`conversation`]** — Bounded turn log and follow-up rewriting
//! - **[`composer`]** — Token-budgeted grounded request assembly
//! - **[`session`]** — The question cycle, one in flight per session
//! - **[`config`]** — JSON configuration with validated defaults

pub mod composer;
pub mod config;
pub mod conversation;
pub mod embedder;
pub mod error;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod models;
pub mod retriever;
pub mod session;

pub use config::Config;
pub use error::{CapabilityError, ConfigError, IndexError, SessionError};
pub use index::{IndexCatalog, VectorIndex};
pub use session::{Answer, Session, SessionEvent};
