//! Patentgraph Core Library
//!
//! This crate provides the enrichment pipeline behind the `patentgraph` CLI:
//! - Work catalog (normalized patent records and derived entities)
//! - Durable, session-scoped JSON store with a progress ledger
//! - Rate-limited LLM client (OpenAI-compatible chat completions)
//! - Batch orchestrator with resumable, cancellable runs
//! - Session management and classification taxonomy

pub mod catalog;
pub mod config;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod llm;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod taxonomy;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::WorkCatalog;
    pub use crate::config::Config;
    pub use crate::enrich::{EnrichOptions, Orchestrator, RunReport};
    pub use crate::error::{Error, Result};
    pub use crate::llm::LlmClient;
    pub use crate::session::SessionManager;
    pub use crate::shutdown::ShutdownSignal;
    pub use crate::storage::DurableStore;
    pub use crate::taxonomy::Taxonomy;
}
