//! # SentinELLE
//!
//! **Retrieval-augmented multimodal moderation for online gender-based
//! violence.**
//!
//! A post (text, image, audio) flows through four stages:
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Extract   │──▶│  Archivist  │──▶│   Decision   │──▶│  Report  │
//! │ OCR / ASR  │   │ history+img │   │  LLM judge   │   │  trace + │
//! │ embeddings │   │   +KB ctx   │   │ (fail-open)  │   │  verdict │
//! └────────────┘   └──────┬──────┘   └──────────────┘   └──────────┘
//!                         │
//!               ┌─────────┴─────────┐
//!               ▼         ▼         ▼
//!            Qdrant     SQLite    memory
//! ```
//!
//! The context engine, store trait, verdict contract and orchestrator live
//! in [`sentinelle_core`]. This crate supplies the concrete backends, model
//! adapters, configuration, the `sentinelle` CLI and the HTTP server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`db`], [`migrate`], [`sqlite_store`] | Local SQLite backend (FTS5 + BLOB vectors) |
//! | [`qdrant_store`] | Qdrant REST backend |
//! | [`embedding`] | Text and image embedders (fastembed, OpenAI, Ollama) |
//! | [`extract`] | OCR / ASR adapters and the modality extractor |
//! | [`judge`] | LLM decision backend |
//! | [`services`] | Config → pipeline wiring |
//! | [`seed`], [`moderate`] | CLI commands |
//! | [`server`] | axum HTTP API |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod judge;
pub mod migrate;
pub mod moderate;
pub mod qdrant_store;
pub mod retry;
pub mod seed;
pub mod server;
pub mod services;
pub mod sqlite_store;
