//! # SentinELLE Core
//!
//! Backend-agnostic logic for the SentinELLE moderation pipeline: data
//! models, collection schema, the vector store trait, the context engine
//! (archivist), and the contracts for signal extraction and the decision
//! step.
//!
//! This crate has no tokio runtime, sqlx, HTTP client, or model runtime.
//! Concrete stores, embedders, extractors and judges live in the
//! `sentinelle` application crate.

pub mod archivist;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod signal;
pub mod store;
pub mod vector;
pub mod verdict;

pub use error::{Error, Result, StoreError};
