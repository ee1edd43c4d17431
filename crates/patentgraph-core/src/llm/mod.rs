//! LLM integration - OpenAI-compatible chat completions
//!
//! This module provides:
//! - A transport seam with an HTTP implementation
//! - The rate-limited client used by the enrichment orchestrator
//! - Request/response types and request statistics

mod client;
mod stats;
mod types;

pub use client::{ChatTransport, HttpTransport, LlmClient, LlmClientBuilder, RetryPolicy};
pub use stats::{RequestStats, StatsSnapshot};
pub use types::{ChatRequest, ChatResponse, Choice, ChoiceMessage, Message, MessageRole, Usage};
