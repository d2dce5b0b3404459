//! Memora - personal life-logging memory core
//!
//! Ingests a user's photos, videos, and audio through a versioned, idempotent
//! pipeline that extracts structured contexts, clusters them into episodes and
//! daily summaries, and serves natural-language recall through hybrid
//! semantic + keyword retrieval.

pub mod api;
pub mod config;
pub mod embedding;
pub mod episode;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod query;
pub mod retrieval;
pub mod storage;
pub mod taxonomy;

pub use error::{MemoraError, Result};

/// Initialize tracing from `RUST_LOG`, defaulting to info-level crate logs
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memora=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}
